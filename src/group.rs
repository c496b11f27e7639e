//! Learned co-occurrence patterns.
//!
//! A [`Group`] is the unit of pattern memory: a bitset of identities that
//! tend to co-occur, plus the bookkeeping ([`Group::member_counts`],
//! salience, usage) the learner needs to drift membership and prune noise.
//! Groups never mutate their own `belongsTo` backlinks directly: every
//! structural change routes through [`crate::store::GroupStore`], which is
//! the sole owner of that invariant.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bitset::{Bitset, IdentityId};

/// Stable, monotonically increasing identifier for a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A learned co-occurrence pattern over identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier, fixed for the group's lifetime.
    pub id: GroupId,
    /// Identities currently associated with this pattern.
    pub members: Bitset,
    /// Per-identity observation-frequency counter. Invariant:
    /// `members.has(i) <=> member_counts[i] > 0`.
    pub member_counts: IndexMap<IdentityId, f64>,
    /// Exponentially decayed utility in `[0, 1]`.
    pub salience: f64,
    /// Lifetime activation count.
    pub usage_count: u64,
    /// Step counter at creation.
    pub created_at: u64,
    /// Step counter of the most recent activation.
    pub last_seen: u64,
}

impl Group {
    /// Construct a new group over `members`, seeding each member's count to 1.0.
    pub fn new(id: GroupId, members: Bitset, step: u64) -> Self {
        let mut member_counts = IndexMap::new();
        for identity in members.iter() {
            member_counts.insert(identity, 1.0);
        }
        Self {
            id,
            members,
            member_counts,
            salience: 0.5,
            usage_count: 0,
            created_at: step,
            last_seen: step,
        }
    }

    /// Whether this group's invariant (`members.has(i) <=> member_counts[i] > 0`)
    /// currently holds. Used by tests and debug assertions, not the hot path.
    pub fn invariant_holds(&self) -> bool {
        for identity in self.members.iter() {
            if !(self.member_counts.get(&identity).copied().unwrap_or(0.0) > 0.0) {
                return false;
            }
        }
        self.member_counts
            .iter()
            .all(|(&identity, &count)| count <= 0.0 || self.members.has(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_group_seeds_counts_to_one() {
        let members = Bitset::from_ids([1, 2, 3], 16).unwrap();
        let group = Group::new(GroupId(0), members, 0);
        assert_eq!(group.member_counts.get(&1), Some(&1.0));
        assert!(group.invariant_holds());
    }

    #[test]
    fn invariant_detects_mismatch() {
        let members = Bitset::from_ids([1, 2], 16).unwrap();
        let mut group = Group::new(GroupId(0), members, 0);
        group.member_counts.insert(1, 0.0);
        assert!(!group.invariant_holds());
    }
}
