//! The deduction graph: weighted directed edges between group ids.
//!
//! `forward` and `backward` are maintained as exact mirrors at every public
//! API boundary, and `edge_count` always equals the total number of forward
//! edges. Pruning on strengthen and removal on weaken/decay are the only
//! ways edges disappear; both update both mirrors atomically.

use std::collections::VecDeque;

use ahash::RandomState;
use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::GraphConfig;
use crate::group::GroupId;

/// Prediction score accumulator, keyed by target group. Built on `hashbrown`
/// with an `ahash` hasher: scores are summed/maxed and then sorted by the
/// caller, so iteration order here is never observed.
pub type ScoreMap = HashMap<GroupId, f64, RandomState>;

/// Weighted directed multigraph over [`GroupId`]s, backing the engine's
/// succession predictions.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeductionGraph {
    config: GraphConfig,
    forward: IndexMap<GroupId, IndexMap<GroupId, f64>>,
    backward: IndexMap<GroupId, IndexMap<GroupId, f64>>,
    edge_count: usize,
    /// Lifetime count of edges dropped by pruning (capacity events).
    pub total_pruned: u64,
    /// Lifetime count of node merges performed.
    pub total_merged: u64,
}

impl DeductionGraph {
    /// Construct an empty graph under the given configuration.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            forward: IndexMap::new(),
            backward: IndexMap::new(),
            edge_count: 0,
            total_pruned: 0,
            total_merged: 0,
        }
    }

    /// Total number of forward edges, always equal to the mirrored backward count.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// The raw outgoing edge weight, if any.
    pub fn weight(&self, from: GroupId, to: GroupId) -> Option<f64> {
        self.forward.get(&from).and_then(|row| row.get(&to)).copied()
    }

    /// All outgoing edges of `from`, sorted by descending weight.
    pub fn deductions(&self, from: GroupId) -> Vec<(GroupId, f64)> {
        let mut edges: Vec<_> = self
            .forward
            .get(&from)
            .map(|row| row.iter().map(|(&to, &w)| (to, w)).collect())
            .unwrap_or_default();
        edges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        edges
    }

    /// Strengthen `from -> to` by `delta`, pruning the lowest-weight outgoing
    /// edges of `from` if it now exceeds `max_edges_per_node`.
    pub fn strengthen(&mut self, from: GroupId, to: GroupId, delta: f64) {
        let row = self.forward.entry(from).or_default();
        let was_new = !row.contains_key(&to);
        let entry = row.entry(to).or_insert(0.0);
        *entry += delta;
        let new_weight = *entry;

        let back_row = self.backward.entry(to).or_default();
        back_row.insert(from, new_weight);

        if was_new {
            self.edge_count += 1;
        }

        self.prune_node_if_over_cap(from);
    }

    fn prune_node_if_over_cap(&mut self, from: GroupId) {
        let cap = self.config.max_edges_per_node;
        loop {
            let over_cap = self.forward.get(&from).map(|row| row.len() > cap).unwrap_or(false);
            if !over_cap {
                break;
            }
            let victim = {
                let row = self.forward.get(&from).expect("checked above");
                row.iter()
                    .min_by(|a, b| {
                        a.1.partial_cmp(b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(b.0.cmp(a.0))
                    })
                    .map(|(&to, _)| to)
            };
            if let Some(victim) = victim {
                self.remove_edge(from, victim);
                self.total_pruned += 1;
                debug!(from = from.0, to = victim.0, "pruned lowest-weight edge over cap");
            } else {
                break;
            }
        }
    }

    /// Weaken `from -> to` by `delta`; removes the edge if the result falls
    /// at or below the configured threshold.
    pub fn weaken(&mut self, from: GroupId, to: GroupId, delta: f64) {
        let remaining = {
            let Some(row) = self.forward.get_mut(&from) else { return };
            let Some(entry) = row.get_mut(&to) else { return };
            *entry -= delta;
            *entry
        };
        if remaining <= self.config.threshold {
            self.remove_edge(from, to);
        } else if let Some(back_row) = self.backward.get_mut(&to) {
            back_row.insert(from, remaining);
        }
    }

    fn remove_edge(&mut self, from: GroupId, to: GroupId) {
        let removed = self
            .forward
            .get_mut(&from)
            .map(|row| row.shift_remove(&to).is_some())
            .unwrap_or(false);
        if !removed {
            return;
        }
        if self.forward.get(&from).map(|row| row.is_empty()).unwrap_or(false) {
            self.forward.shift_remove(&from);
        }
        if let Some(back_row) = self.backward.get_mut(&to) {
            back_row.shift_remove(&from);
            if back_row.is_empty() {
                self.backward.shift_remove(&to);
            }
        }
        self.edge_count -= 1;
    }

    /// Multiply every edge weight by `(1 - decay_factor)`, dropping any edge
    /// that falls at or below `threshold`.
    pub fn apply_decay(&mut self) {
        let factor = 1.0 - self.config.decay_factor;
        let mut to_remove = Vec::new();
        for (&from, row) in self.forward.iter_mut() {
            for (&to, weight) in row.iter_mut() {
                *weight *= factor;
                if *weight <= self.config.threshold {
                    to_remove.push((from, to));
                }
            }
        }
        for (from, to) in to_remove {
            self.remove_edge(from, to);
        }
        // backward mirror values need the same decay applied even for surviving edges.
        for row in self.backward.values_mut() {
            for weight in row.values_mut() {
                *weight *= factor;
            }
        }
    }

    /// Sum of forward weights from every active source, one score per reachable target.
    pub fn predict_direct(&self, active: &[GroupId]) -> ScoreMap {
        let mut scores = ScoreMap::default();
        for &source in active {
            if let Some(row) = self.forward.get(&source) {
                for (&target, &weight) in row {
                    *scores.entry(target).or_insert(0.0) += weight;
                }
            }
        }
        scores
    }

    /// BFS multi-hop prediction: weight-product accumulation along paths of
    /// length up to `max_depth`, per-hop decayed by `decay_per_hop`. The same
    /// target reached via multiple paths takes the max score.
    pub fn predict_multi_hop(
        &self,
        active: &[GroupId],
        max_depth: u32,
        decay_per_hop: f64,
    ) -> ScoreMap {
        let mut best = ScoreMap::default();
        let mut queue: VecDeque<(GroupId, f64, u32)> = VecDeque::new();
        for &source in active {
            queue.push_back((source, 1.0, 0));
        }
        let starting: std::collections::HashSet<GroupId> = active.iter().copied().collect();

        while let Some((node, acc_weight, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(row) = self.forward.get(&node) else { continue };
            for (&target, &edge_weight) in row {
                if starting.contains(&target) {
                    continue;
                }
                let score = acc_weight * edge_weight * decay_per_hop.powi(depth as i32);
                let slot = best.entry(target).or_insert(0.0);
                if score > *slot {
                    *slot = score;
                }
                queue.push_back((target, acc_weight * edge_weight, depth + 1));
            }
        }
        best
    }

    /// Fold `loser`'s outgoing and incoming edges into `winner` (summing
    /// weights on conflict), then delete `loser` from both sides entirely.
    pub fn merge_nodes(&mut self, winner: GroupId, loser: GroupId) {
        if winner == loser {
            return;
        }
        let outgoing: Vec<(GroupId, f64)> = self
            .forward
            .get(&loser)
            .map(|row| row.iter().map(|(&to, &w)| (to, w)).collect())
            .unwrap_or_default();
        let incoming: Vec<(GroupId, f64)> = self
            .backward
            .get(&loser)
            .map(|row| row.iter().map(|(&from, &w)| (from, w)).collect())
            .unwrap_or_default();

        self.remove_group(loser);

        for (to, weight) in outgoing {
            if to != winner {
                self.strengthen(winner, to, weight);
            }
        }
        for (from, weight) in incoming {
            if from != winner {
                self.strengthen(from, winner, weight);
            }
        }
        self.total_merged += 1;
    }

    /// Remove every edge touching `id`, in either direction.
    pub fn remove_group(&mut self, id: GroupId) {
        let outgoing: Vec<GroupId> = self
            .forward
            .get(&id)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default();
        for to in outgoing {
            self.remove_edge(id, to);
        }
        let incoming: Vec<GroupId> = self
            .backward
            .get(&id)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default();
        for from in incoming {
            self.remove_edge(from, id);
        }
    }

    /// Assert that `forward`/`backward` are exact mirrors and `edge_count`
    /// matches the total forward edge count. Used by tests; cheap enough to
    /// call from `debug_assert!` sites if desired.
    pub fn invariant_holds(&self) -> bool {
        let total: usize = self.forward.values().map(|row| row.len()).sum();
        if total != self.edge_count {
            return false;
        }
        for (&from, row) in &self.forward {
            for (&to, &weight) in row {
                match self.backward.get(&to).and_then(|back_row| back_row.get(&from)) {
                    Some(&back_weight) if (back_weight - weight).abs() < 1e-9 => {}
                    _ => return false,
                }
            }
        }
        let back_total: usize = self.backward.values().map(|row| row.len()).sum();
        back_total == self.edge_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DeductionGraph {
        DeductionGraph::new(GraphConfig {
            threshold: 0.01,
            max_edges_per_node: 64,
            decay_factor: 0.1,
        })
    }

    #[test]
    fn strengthen_accumulates_weight() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(2), 0.5);
        g.strengthen(GroupId(1), GroupId(2), 0.5);
        assert!((g.weight(GroupId(1), GroupId(2)).unwrap() - 1.0).abs() < 1e-9);
        assert!(g.invariant_holds());
    }

    #[test]
    fn weaken_removes_edge_at_threshold() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(2), 1.0);
        g.weaken(GroupId(1), GroupId(2), 0.5);
        assert!((g.weight(GroupId(1), GroupId(2)).unwrap() - 0.5).abs() < 1e-9);
        g.weaken(GroupId(1), GroupId(2), 1.0);
        assert_eq!(g.weight(GroupId(1), GroupId(2)), None);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn multi_hop_applies_default_decay() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(2), 1.0);
        g.strengthen(GroupId(2), GroupId(3), 1.0);
        let scores = g.predict_multi_hop(&[GroupId(1)], 2, 0.5);
        assert!((scores[&GroupId(3)] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pruning_preserves_cap_and_invariants() {
        let mut g = DeductionGraph::new(GraphConfig {
            threshold: 0.01,
            max_edges_per_node: 10,
            decay_factor: 0.1,
        });
        for target in 0..25u64 {
            g.strengthen(GroupId(1), GroupId(target), 1.0 + target as f64 * 0.01);
        }
        assert_eq!(g.deductions(GroupId(1)).len(), 10);
        assert!(g.invariant_holds());
    }

    #[test]
    fn decay_removes_weak_edges() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(2), 0.02);
        g.apply_decay();
        // 0.02 * 0.9 = 0.018 > 0.01, survives.
        assert!(g.weight(GroupId(1), GroupId(2)).is_some());
        g.apply_decay();
        g.apply_decay();
        // after repeated decay it must eventually fall at/below threshold.
        assert!(g.invariant_holds());
    }

    #[test]
    fn merge_nodes_sums_conflicting_edges() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(3), 1.0);
        g.strengthen(GroupId(2), GroupId(3), 2.0);
        g.merge_nodes(GroupId(1), GroupId(2));
        assert!((g.weight(GroupId(1), GroupId(3)).unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(g.weight(GroupId(2), GroupId(3)), None);
        assert!(g.invariant_holds());
    }

    #[test]
    fn remove_group_clears_both_directions() {
        let mut g = graph();
        g.strengthen(GroupId(1), GroupId(2), 1.0);
        g.strengthen(GroupId(2), GroupId(3), 1.0);
        g.remove_group(GroupId(2));
        assert_eq!(g.weight(GroupId(1), GroupId(2)), None);
        assert_eq!(g.weight(GroupId(2), GroupId(3)), None);
        assert!(g.invariant_holds());
    }
}
