//! The group store: primary map of groups plus an inverted membership index.
//!
//! `belongs_to` is the single consistency hotspot in the whole engine: only
//! [`GroupStore`] methods may mutate it. Every caller (the learner included)
//! routes membership changes through [`GroupStore::update_members`] so the
//! index never drifts out of sync with a group's `members` bitset.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitset::{Bitset, IdentityId};
use crate::core::config::{IndexEvictPolicy, StoreConfig};
use crate::core::errors::{EngineError, Result};
use crate::group::{Group, GroupId};

/// Owns every [`Group`] and the inverted `identity -> {group}` index.
#[derive(Debug, Serialize, Deserialize)]
pub struct GroupStore {
    config: StoreConfig,
    groups: IndexMap<GroupId, Group>,
    belongs_to: IndexMap<IdentityId, Vec<GroupId>>,
    next_id: u64,
    /// Lifetime count of inverted-index evictions (capacity events, not errors).
    pub total_evicted: u64,
}

impl GroupStore {
    /// Construct an empty store under the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            groups: IndexMap::new(),
            belongs_to: IndexMap::new(),
            next_id: 0,
            total_evicted: 0,
        }
    }

    /// Number of groups currently owned by the store.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the store owns no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Look up a group by id.
    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Look up a group mutably by id. Prefer [`GroupStore::update_members`]
    /// for membership changes so `belongs_to` stays consistent; this exists
    /// for mutations (salience, usage_count, last_seen) that don't touch
    /// membership.
    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&id)
    }

    /// Candidate groups for `input`: the union of `belongs_to[i]` for every
    /// identity `i` present in `input`.
    pub fn candidates(&self, input: &Bitset) -> HashSet<GroupId> {
        let mut out = HashSet::new();
        for identity in input.iter() {
            if let Some(bucket) = self.belongs_to.get(&identity) {
                out.extend(bucket.iter().copied());
            }
        }
        out
    }

    /// Create a new group from `members`, assigning a fresh monotonic id.
    /// Evicts the lowest-priority group under `max_groups` afterward if the
    /// store is now over capacity.
    pub fn create(&mut self, members: Bitset, step: u64) -> GroupId {
        let id = GroupId(self.next_id);
        self.next_id += 1;
        let group = Group::new(id, members, step);
        let member_ids: Vec<IdentityId> = group.members.iter().collect();
        self.groups.insert(id, group);
        for identity in member_ids {
            self.insert_into_bucket(identity, id);
        }
        self.enforce_group_capacity();
        id
    }

    /// Mutate `members`/`member_counts` for group `id`: add `add_ids`, remove
    /// `remove_ids`. Keeps `belongs_to` consistent for every touched identity.
    pub fn update_members(
        &mut self,
        id: GroupId,
        add_ids: &[IdentityId],
        remove_ids: &[IdentityId],
    ) -> Result<()> {
        {
            let group = self
                .groups
                .get_mut(&id)
                .ok_or_else(|| EngineError::domain_field("unknown group id", id.to_string()))?;
            for &identity in add_ids {
                group.members.add(identity)?;
                group.member_counts.entry(identity).or_insert(1.0);
            }
            for &identity in remove_ids {
                group.members.remove(identity)?;
                group.member_counts.shift_remove(&identity);
            }
        }
        for &identity in add_ids {
            self.insert_into_bucket(identity, id);
        }
        for &identity in remove_ids {
            self.remove_from_bucket(identity, id);
        }
        Ok(())
    }

    /// Delete a group entirely: from the primary map and every `belongs_to`
    /// bucket it appears in.
    pub fn delete(&mut self, id: GroupId) {
        if let Some(group) = self.groups.shift_remove(&id) {
            for identity in group.members.iter() {
                self.remove_from_bucket(identity, id);
            }
        }
    }

    /// Merge `loser` into `winner`: union members, merge counts, re-point the
    /// inverted index, then delete `loser`.
    pub fn merge(&mut self, winner: GroupId, loser: GroupId) -> Result<()> {
        if winner == loser {
            return Ok(());
        }
        let loser_group = self
            .groups
            .get(&loser)
            .ok_or_else(|| EngineError::domain_field("unknown group id", loser.to_string()))?
            .clone();

        let winner_group = self
            .groups
            .get_mut(&winner)
            .ok_or_else(|| EngineError::domain_field("unknown group id", winner.to_string()))?;
        for identity in loser_group.members.iter() {
            winner_group.members.add(identity)?;
            let incoming = loser_group.member_counts.get(&identity).copied().unwrap_or(1.0);
            let slot = winner_group.member_counts.entry(identity).or_insert(0.0);
            *slot += incoming;
        }

        for identity in loser_group.members.iter() {
            self.insert_into_bucket(identity, winner);
        }
        self.delete(loser);
        Ok(())
    }

    fn insert_into_bucket(&mut self, identity: IdentityId, id: GroupId) {
        let over_cap = {
            let bucket = self.belongs_to.entry(identity).or_default();
            if bucket.contains(&id) {
                return;
            }
            bucket.push(id);
            bucket.len() > self.config.max_groups_per_identity
        };
        if over_cap {
            let victim = self.pick_eviction_victim(self.belongs_to.get(&identity).into_iter().flatten().copied());
            if let Some(victim) = victim {
                if let Some(bucket) = self.belongs_to.get_mut(&identity) {
                    bucket.retain(|&g| g != victim);
                }
                self.total_evicted += 1;
                debug!(identity, victim = victim.0, "evicted group from identity bucket");
            }
        }
        if self.belongs_to.get(&identity).map(|b| b.is_empty()).unwrap_or(false) {
            self.belongs_to.shift_remove(&identity);
        }
    }

    fn remove_from_bucket(&mut self, identity: IdentityId, id: GroupId) {
        if let Some(bucket) = self.belongs_to.get_mut(&identity) {
            bucket.retain(|&g| g != id);
            if bucket.is_empty() {
                self.belongs_to.shift_remove(&identity);
            }
        }
    }

    /// Evict groups (by the configured policy) while the store holds more
    /// than `max_groups`. A cap of `0` disables enforcement.
    fn enforce_group_capacity(&mut self) {
        if self.config.max_groups == 0 {
            return;
        }
        while self.groups.len() > self.config.max_groups {
            let victim = self.pick_eviction_victim(self.groups.keys().copied());
            let Some(victim) = victim else { break };
            self.delete(victim);
            self.total_evicted += 1;
            debug!(victim = victim.0, "evicted group over max_groups capacity");
        }
    }

    fn pick_eviction_victim(&self, candidates: impl Iterator<Item = GroupId>) -> Option<GroupId> {
        match self.config.evict_policy {
            IndexEvictPolicy::LowestSalience => candidates.min_by(|&a, &b| {
                let sa = self.groups.get(&a).map(|g| g.salience).unwrap_or(0.0);
                let sb = self.groups.get(&b).map(|g| g.salience).unwrap_or(0.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            }),
            IndexEvictPolicy::Oldest => {
                candidates.min_by_key(|g| self.groups.get(g).map(|g| g.created_at).unwrap_or(0))
            }
        }
    }

    /// All group ids currently owned by the store.
    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.keys().copied()
    }

    /// Iterate over every group.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_cap(cap: usize) -> GroupStore {
        GroupStore::new(StoreConfig {
            max_groups_per_identity: cap,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn create_populates_inverted_index() {
        let mut store = store_with_cap(8);
        let id = store.create(Bitset::from_ids([1, 2], 16).unwrap(), 0);
        let candidates = store.candidates(&Bitset::from_ids([1], 16).unwrap());
        assert!(candidates.contains(&id));
    }

    #[test]
    fn invariant_holds_after_random_like_operations() {
        let mut store = store_with_cap(8);
        let g1 = store.create(Bitset::from_ids([1, 2], 16).unwrap(), 0);
        let g2 = store.create(Bitset::from_ids([2, 3], 16).unwrap(), 0);
        store.update_members(g1, &[4], &[1]).unwrap();
        store.merge(g2, g1).unwrap();
        assert_invariant(&store);
    }

    fn assert_invariant(store: &GroupStore) {
        for group in store.iter() {
            for identity in group.members.iter() {
                let bucket = store.belongs_to.get(&identity);
                assert!(
                    bucket.map(|b| b.contains(&group.id)).unwrap_or(false),
                    "identity {identity} missing group {:?} in belongs_to",
                    group.id
                );
            }
        }
        for bucket in store.belongs_to.values() {
            assert!(!bucket.is_empty());
            assert!(bucket.len() <= store.config.max_groups_per_identity);
        }
    }

    #[test]
    fn eviction_keeps_highest_salience() {
        let mut store = store_with_cap(1);
        let g1 = store.create(Bitset::new(16), 0);
        let g2 = store.create(Bitset::new(16), 0);
        store.get_mut(g1).unwrap().salience = 0.9;
        store.get_mut(g2).unwrap().salience = 0.1;
        store.update_members(g1, &[1], &[]).unwrap();
        store.update_members(g2, &[1], &[]).unwrap();
        let candidates = store.candidates(&Bitset::from_ids([1], 16).unwrap());
        assert_eq!(candidates.len(), 1);
        assert!(candidates.contains(&g1));
    }

    #[test]
    fn delete_clears_all_buckets() {
        let mut store = store_with_cap(8);
        let id = store.create(Bitset::from_ids([1, 2, 3], 16).unwrap(), 0);
        store.delete(id);
        assert!(store.get(id).is_none());
        for identity in [1, 2, 3] {
            assert!(store.candidates(&Bitset::from_ids([identity], 16).unwrap()).is_empty());
        }
    }

    #[test]
    fn update_members_seeds_new_identity_count_to_one() {
        let mut store = store_with_cap(8);
        let g = store.create(Bitset::new(16), 0);
        store.update_members(g, &[5], &[]).unwrap();
        let group = store.get(g).unwrap();
        assert_eq!(group.member_counts.get(&5), Some(&1.0));
        assert!(group.invariant_holds());
    }

    #[test]
    fn create_enforces_max_groups_capacity() {
        let mut store = GroupStore::new(StoreConfig { max_groups: 2, ..StoreConfig::default() });
        let g1 = store.create(Bitset::new(16), 0);
        store.get_mut(g1).unwrap().salience = 0.9;
        let g2 = store.create(Bitset::new(16), 0);
        store.get_mut(g2).unwrap().salience = 0.1;
        store.create(Bitset::new(16), 0);
        assert_eq!(store.len(), 2);
        assert!(store.get(g2).is_none());
        assert!(store.get(g1).is_some());
    }

    #[test]
    fn merge_unions_members_and_deletes_loser() {
        let mut store = store_with_cap(8);
        let winner = store.create(Bitset::from_ids([1, 2], 16).unwrap(), 0);
        let loser = store.create(Bitset::from_ids([2, 3], 16).unwrap(), 0);
        store.merge(winner, loser).unwrap();
        assert!(store.get(loser).is_none());
        let winner_group = store.get(winner).unwrap();
        assert!(winner_group.members.has(1) && winner_group.members.has(2) && winner_group.members.has(3));
        assert_invariant(&store);
    }
}
