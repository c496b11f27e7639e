//! Fixed-universe sparse bitset: the identity-set primitive every other
//! component builds on.
//!
//! Backed by `bitvec`, the same bit-packing crate the rest of this codebase's
//! lineage reaches for whenever it needs compact membership sets. All set
//! operations return a freshly allocated bitset of the same universe size.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::core::errors::{EngineError, Result};

/// An identity id, a bit position in `[0, universe_size)`.
pub type IdentityId = u32;

/// A fixed-universe sparse set of [`IdentityId`]s.
///
/// Two bitsets with equal universe size and equal membership always produce
/// equal [`Bitset::hash64`] fingerprints; collisions across distinct content
/// are possible (64-bit hash) but rare in practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitset {
    universe_size: u32,
    #[serde(with = "bits_serde")]
    bits: BitVec<u64, Lsb0>,
    len: u32,
}

mod bits_serde {
    use bitvec::prelude::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bits: &BitVec<u64, Lsb0>, ser: S) -> Result<S::Ok, S::Error> {
        let words: Vec<u64> = bits.as_raw_slice().to_vec();
        (bits.len(), words).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BitVec<u64, Lsb0>, D::Error> {
        let (len, words): (usize, Vec<u64>) = Deserialize::deserialize(de)?;
        let mut bits = BitVec::<u64, Lsb0>::from_vec(words);
        bits.truncate(len);
        Ok(bits)
    }
}

impl Bitset {
    /// Create an empty bitset over the universe `[0, universe_size)`.
    pub fn new(universe_size: u32) -> Self {
        Self {
            universe_size,
            bits: bitvec![u64, Lsb0; 0; universe_size as usize],
            len: 0,
        }
    }

    /// Build a bitset from an iterator of identity ids.
    pub fn from_ids(ids: impl IntoIterator<Item = IdentityId>, universe_size: u32) -> Result<Self> {
        let mut bitset = Self::new(universe_size);
        for id in ids {
            bitset.add(id)?;
        }
        Ok(bitset)
    }

    /// The universe size this bitset was constructed with.
    pub fn universe_size(&self) -> u32 {
        self.universe_size
    }

    fn check_bounds(&self, id: IdentityId) -> Result<()> {
        if id >= self.universe_size {
            return Err(EngineError::domain_field(
                format!("identity {id} out of universe [0, {})", self.universe_size),
                "identity_id",
            ));
        }
        Ok(())
    }

    /// Insert `id`. Returns `Ok(true)` if it was newly inserted.
    pub fn add(&mut self, id: IdentityId) -> Result<bool> {
        self.check_bounds(id)?;
        let was_set = self.bits.replace(id as usize, true);
        if !was_set {
            self.len += 1;
        }
        Ok(!was_set)
    }

    /// Remove `id`. Returns `Ok(true)` if it was present.
    pub fn remove(&mut self, id: IdentityId) -> Result<bool> {
        self.check_bounds(id)?;
        let was_set = self.bits.replace(id as usize, false);
        if was_set {
            self.len -= 1;
        }
        Ok(was_set)
    }

    /// Test membership of `id`.
    pub fn has(&self, id: IdentityId) -> bool {
        id < self.universe_size && self.bits[id as usize]
    }

    /// Population count (cardinality of the set).
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over members in ascending identity order.
    pub fn iter(&self) -> impl Iterator<Item = IdentityId> + '_ {
        self.bits.iter_ones().map(|i| i as IdentityId)
    }

    fn combine(&self, other: &Self, f: impl Fn(bool, bool) -> bool) -> Self {
        debug_assert_eq!(self.universe_size, other.universe_size, "bitsets must share a universe");
        let mut bits = bitvec![u64, Lsb0; 0; self.universe_size as usize];
        let mut len = 0u32;
        for i in 0..self.universe_size as usize {
            let bit = f(self.bits[i], other.bits[i]);
            bits.set(i, bit);
            if bit {
                len += 1;
            }
        }
        Self {
            universe_size: self.universe_size,
            bits,
            len,
        }
    }

    /// Set intersection: a new bitset containing ids present in both.
    pub fn and(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a && b)
    }

    /// Set union: a new bitset containing ids present in either.
    pub fn or(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a || b)
    }

    /// Set difference: a new bitset containing ids present in `self` but not `other`.
    pub fn and_not(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a && !b)
    }

    /// A stable 64-bit fingerprint of the bit pattern (not the universe size).
    pub fn hash64(&self) -> u64 {
        let bytes: Vec<u8> = self
            .bits
            .as_raw_slice()
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        xxh3_64(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_has_roundtrip() {
        let mut b = Bitset::new(16);
        assert!(!b.has(3));
        assert!(b.add(3).unwrap());
        assert!(b.has(3));
        assert!(!b.add(3).unwrap());
        assert!(b.remove(3).unwrap());
        assert!(!b.has(3));
    }

    #[test]
    fn out_of_universe_is_domain_error() {
        let mut b = Bitset::new(4);
        assert!(b.add(4).is_err());
        assert!(b.remove(10).is_err());
    }

    #[test]
    fn or_size_inclusion_exclusion() {
        let a = Bitset::from_ids([1, 2, 3], 8).unwrap();
        let b = Bitset::from_ids([3, 4], 8).unwrap();
        let or = a.or(&b);
        let and = a.and(&b);
        assert_eq!(or.len() as i64, a.len() as i64 + b.len() as i64 - and.len() as i64);
    }

    #[test]
    fn and_not_disjoint_from_other() {
        let a = Bitset::from_ids([1, 2, 3], 8).unwrap();
        let b = Bitset::from_ids([3, 4], 8).unwrap();
        let diff = a.and_not(&b);
        assert_eq!(diff.and(&b).len(), 0);
        assert!(diff.has(1) && diff.has(2) && !diff.has(3));
    }

    #[test]
    fn equal_bitsets_hash_equal() {
        let a = Bitset::from_ids([5, 9, 100], 256).unwrap();
        let b = Bitset::from_ids([100, 5, 9], 256).unwrap();
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn json_round_trip_preserves_membership() {
        let original = Bitset::from_ids([0, 10, 200, 255], 256).unwrap();
        let json = serde_json::to_string(&original).unwrap();
        let restored: Bitset = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
        assert_eq!(original.hash64(), restored.hash64());
    }

    #[test]
    fn iter_is_ascending() {
        let b = Bitset::from_ids([5, 1, 9, 3], 16).unwrap();
        let collected: Vec<_> = b.iter().collect();
        assert_eq!(collected, vec![1, 3, 5, 9]);
    }
}
