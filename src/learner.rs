//! The learner: activation scoring, group creation, and membership drift.
//!
//! The learner never mutates the store directly except through its public
//! methods, and those methods in turn only ever call [`GroupStore`]'s own
//! mutation API (`create`, `update_members`) so the inverted index stays
//! consistent no matter which component initiated the change.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::bitset::{Bitset, IdentityId};
use crate::core::config::LearnerConfig;
use crate::group::GroupId;
use crate::store::GroupStore;

/// Result of one activation pass: which groups fired and how well the input
/// was explained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    /// Groups selected as active this step, ranked by score.
    pub active: Vec<GroupId>,
    /// Union of input identities covered by an active group's members.
    pub explained: Bitset,
    /// Count of input identities no active group explains.
    pub surprise: u32,
    /// Count of identities active groups claim that the input lacks.
    pub hallucination: u32,
}

/// Per-input scoring, selection, group creation, and membership drift.
#[derive(Debug, Serialize, Deserialize)]
pub struct Learner {
    config: LearnerConfig,
}

impl Learner {
    /// Construct a learner under the given configuration.
    pub fn new(config: LearnerConfig) -> Self {
        Self { config }
    }

    /// `|g.members ∩ input| / sqrt(|g.members|) * (1 + beta * salience)`.
    fn score(&self, overlap: u32, member_len: u32, salience: f64) -> f64 {
        if member_len == 0 {
            return 0.0;
        }
        (overlap as f64) / (member_len as f64).sqrt() * (1.0 + self.config.beta * salience)
    }

    /// Rank candidates, select up to `max_active` above `min_score`, and
    /// derive `explained`/`surprise`/`hallucination`.
    pub fn activate(&self, input: &Bitset, candidates: &HashSet<GroupId>, store: &GroupStore) -> Activation {
        let mut scored: Vec<(GroupId, f64)> = candidates
            .iter()
            .filter_map(|&id| {
                let group = store.get(id)?;
                let overlap = group.members.and(input).len();
                let s = self.score(overlap, group.members.len(), group.salience);
                (s >= self.config.min_score).then_some((id, s))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(self.config.max_active);
        let active: Vec<GroupId> = scored.iter().map(|(id, _)| *id).collect();

        let mut explained = Bitset::new(input.universe_size());
        let mut union_members = Bitset::new(input.universe_size());
        for &id in &active {
            if let Some(group) = store.get(id) {
                let overlap = group.members.and(input);
                for identity in overlap.iter() {
                    let _ = explained.add(identity);
                }
                for identity in group.members.iter() {
                    let _ = union_members.add(identity);
                }
            }
        }
        let surprise = input.and_not(&explained).len();
        let hallucination = union_members.len().saturating_sub(explained.len());

        trace!(active = active.len(), surprise, hallucination, "activation complete");
        Activation { active, explained, surprise, hallucination }
    }

    /// Highest candidate score in the pool, or 0.0 if the pool is empty.
    fn best_candidate_score(&self, input: &Bitset, candidates: &HashSet<GroupId>, store: &GroupStore) -> f64 {
        candidates
            .iter()
            .filter_map(|&id| store.get(id))
            .map(|group| self.score(group.members.and(input).len(), group.members.len(), group.salience))
            .fold(0.0, f64::max)
    }

    /// Create a new group from the unexplained remainder if the surprise
    /// ratio clears `creation_threshold` and no candidate already scores
    /// `>= min_merge_score`. Returns the new group id, if any.
    pub fn maybe_create_group(
        &self,
        input: &Bitset,
        candidates: &HashSet<GroupId>,
        activation: &Activation,
        store: &mut GroupStore,
        step: u64,
    ) -> Option<GroupId> {
        if input.len() == 0 {
            return None;
        }
        let ratio = activation.surprise as f64 / input.len() as f64;
        if ratio < self.config.creation_threshold {
            return None;
        }
        if self.best_candidate_score(input, candidates, store) >= self.config.min_merge_score {
            return None;
        }
        let remainder = input.and_not(&activation.explained);
        if remainder.is_empty() {
            return None;
        }
        if let Some(existing) = self.find_duplicate(&remainder, store) {
            let add_ids: Vec<IdentityId> = remainder.iter().collect();
            let _ = store.update_members(existing, &add_ids, &[]);
            return None;
        }
        Some(store.create(remainder, step))
    }

    fn find_duplicate(&self, members: &Bitset, store: &GroupStore) -> Option<GroupId> {
        store.iter().find(|g| g.members == *members).map(|g| g.id)
    }

    /// Drift membership toward the input for every active group: grow
    /// explained identities, shrink hallucinated ones.
    pub fn update_memberships(
        &self,
        active: &[GroupId],
        input: &Bitset,
        reward: f64,
        store: &mut GroupStore,
    ) {
        for &id in active {
            let (grow, shrink) = {
                let Some(group) = store.get_mut(id) else { continue };
                let mut grow = Vec::new();
                let mut shrink = Vec::new();
                for identity in input.iter() {
                    if !group.members.has(identity) {
                        let slot = group.member_counts.entry(identity).or_insert(0.0);
                        *slot += self.config.alpha * reward;
                        if *slot >= self.config.membership_threshold {
                            grow.push(identity);
                        }
                    }
                }
                let hallucinated: Vec<IdentityId> = group
                    .members
                    .iter()
                    .filter(|&identity| !input.has(identity))
                    .collect();
                for identity in hallucinated {
                    let remove_now = {
                        let slot = group.member_counts.entry(identity).or_insert(0.0);
                        *slot -= self.config.alpha_decay;
                        *slot <= 0.0
                    };
                    if remove_now {
                        shrink.push(identity);
                    }
                }
                (grow, shrink)
            };
            if !grow.is_empty() || !shrink.is_empty() {
                let _ = store.update_members(id, &grow, &shrink);
            }
        }
    }

    /// Blend `novelty`/`utility`/`stability` into a new salience for each
    /// active group, clamped to `[0.1, 1.0]`.
    pub fn update_salience(&self, active: &[GroupId], explained: &Bitset, store: &mut GroupStore) {
        for &id in active {
            let Some(group) = store.get_mut(id) else { continue };
            let novelty = 1.0 / (1.0 + group.usage_count as f64);
            let overlap = group.members.and(explained).len();
            let utility = overlap as f64 / (group.members.len().max(1) as f64);
            let stability = group.salience;
            let importance = (self.config.w_novelty * novelty
                + self.config.w_utility * utility
                + self.config.w_stability * stability)
                .clamp(0.1, 1.0);
            group.salience = (1.0 - self.config.lambda) * group.salience + self.config.lambda * importance;
            group.usage_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StoreConfig;

    fn learner() -> Learner {
        Learner::new(LearnerConfig {
            beta: 0.5,
            min_score: 0.1,
            max_active: 8,
            creation_threshold: 0.4,
            min_merge_score: 0.6,
            membership_threshold: 3.0,
            alpha: 1.0,
            alpha_decay: 1.0,
            lambda: 0.2,
            w_novelty: 0.3,
            w_utility: 0.5,
            w_stability: 0.2,
        })
    }

    #[test]
    fn activate_selects_overlapping_groups_above_threshold() {
        let l = learner();
        let mut store = GroupStore::new(StoreConfig::default());
        let g = store.create(Bitset::from_ids([1, 2, 3], 32).unwrap(), 0);
        let candidates: HashSet<GroupId> = [g].into_iter().collect();
        let input = Bitset::from_ids([1, 2], 32).unwrap();
        let activation = l.activate(&input, &candidates, &store);
        assert_eq!(activation.active, vec![g]);
        assert_eq!(activation.surprise, 0);
    }

    #[test]
    fn surprise_counts_unexplained_bits() {
        let l = learner();
        let store = GroupStore::new(StoreConfig::default());
        let input = Bitset::from_ids([1, 2, 3], 32).unwrap();
        let activation = l.activate(&input, &HashSet::new(), &store);
        assert!(activation.active.is_empty());
        assert_eq!(activation.surprise, 3);
    }

    #[test]
    fn creates_group_from_unexplained_remainder_when_surprised() {
        let l = learner();
        let mut store = GroupStore::new(StoreConfig::default());
        let input = Bitset::from_ids([10, 20, 30], 32).unwrap();
        let activation = l.activate(&input, &HashSet::new(), &store);
        let created = l.maybe_create_group(&input, &HashSet::new(), &activation, &mut store, 0);
        assert!(created.is_some());
        let group = store.get(created.unwrap()).unwrap();
        assert!(group.members.has(10) && group.members.has(20) && group.members.has(30));
    }

    #[test]
    fn membership_grows_past_threshold() {
        let l = learner();
        let mut store = GroupStore::new(StoreConfig::default());
        let g = store.create(Bitset::from_ids([1, 2], 32).unwrap(), 0);
        let input = Bitset::from_ids([1, 2, 99], 32).unwrap();
        for _ in 0..3 {
            l.update_memberships(&[g], &input, 1.0, &mut store);
        }
        assert!(store.get(g).unwrap().members.has(99));
    }

    #[test]
    fn salience_stays_within_bounds() {
        let l = learner();
        let mut store = GroupStore::new(StoreConfig::default());
        let g = store.create(Bitset::from_ids([1, 2], 32).unwrap(), 0);
        let explained = Bitset::from_ids([1, 2], 32).unwrap();
        l.update_salience(&[g], &explained, &mut store);
        let salience = store.get(g).unwrap().salience;
        assert!((0.0..=1.0).contains(&salience));
    }
}
