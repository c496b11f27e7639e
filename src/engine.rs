//! Orchestrates the per-step pipeline: activation, transition strengthening,
//! prediction, learning, and decay.
//!
//! [`Engine`] is the only type embedders construct directly. It owns every
//! other component and drives them through exactly one pipeline per
//! [`Engine::process`] call; nothing here spawns threads or performs I/O.

use serde::{Deserialize, Serialize};

use crate::attention::AttentionBuffer;
use crate::bitset::Bitset;
use crate::concerns::PersistentConcerns;
use crate::core::config::EngineConfig;
use crate::core::errors::Result;
use crate::graph::{DeductionGraph, ScoreMap};
use crate::group::GroupId;
use crate::learner::Learner;
use crate::store::GroupStore;

/// Per-call knobs for [`Engine::process`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepOptions {
    /// Whether this step is allowed to mutate any engine state.
    pub learn: bool,
    /// External reward signal in `[-1, 1]`-ish range, blended with `base_reward`.
    pub reward: f64,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self { learn: true, reward: 0.0 }
    }
}

/// Everything observable about one [`Engine::process`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Identities in the input left unexplained by any active group.
    pub surprise: u32,
    /// Identities active groups claim that the input lacks.
    pub hallucination: u32,
    /// Mean of active groups' post-update salience, or 0.0 if none fired.
    pub importance: f64,
    /// Groups selected as active this step.
    pub active_group_ids: Vec<GroupId>,
    /// Direct/multi-hop prediction scores, ranked highest first.
    pub predictions: Vec<(GroupId, f64)>,
}

/// Lifetime counters surfaced for observability and non-mutation testing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_evicted: u64,
    pub total_promoted: u64,
    pub total_pruned: u64,
    pub total_merged: u64,
    pub total_decayed: u64,
}

/// The root orchestrator. Owns the store, graph, learner, attention buffer,
/// and persistent concerns; nothing outside this type mutates them.
///
/// Persistence goes through [`Engine::to_json`]/[`Engine::from_json`] rather
/// than a derived `Serialize`/`Deserialize` impl, so the on-disk snapshot
/// shape can diverge from the in-memory layout.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: GroupStore,
    graph: DeductionGraph,
    learner: Learner,
    attention: AttentionBuffer,
    concerns: PersistentConcerns,
    step: u64,
    previous_active: Vec<GroupId>,
    stats: Stats,
}

const SNAPSHOT_VERSION: u32 = 1;

/// Borrowed view used to serialize a live [`Engine`] without cloning its components.
#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    step: u64,
    config: &'a EngineConfig,
    store: &'a GroupStore,
    graph: &'a DeductionGraph,
    learner: &'a Learner,
    attention: &'a AttentionBuffer,
    previous_active: &'a [GroupId],
    persistent_concerns: &'a PersistentConcerns,
    stats: &'a Stats,
}

/// Owned snapshot shape used to reconstruct an [`Engine`] via [`Engine::from_json`].
#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default = "default_version")]
    version: u32,
    step: u64,
    config: EngineConfig,
    store: GroupStore,
    graph: DeductionGraph,
    learner: Learner,
    attention: AttentionBuffer,
    #[serde(default)]
    previous_active: Vec<GroupId>,
    persistent_concerns: PersistentConcerns,
    #[serde(default)]
    stats: Stats,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Engine {
    /// Construct a fresh engine under the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let learner = Learner::new(config.learner.clone());
        let store = GroupStore::new(config.store.clone());
        let graph = DeductionGraph::new(config.graph.clone());
        let attention = AttentionBuffer::new(config.attention.clone());
        let concerns = PersistentConcerns::new(config.concerns.clone());
        Self {
            config,
            store,
            graph,
            learner,
            attention,
            concerns,
            step: 0,
            previous_active: Vec::new(),
            stats: Stats::default(),
        }
    }

    /// Universe size the engine's bitsets must be constructed with.
    pub fn universe_size(&self) -> u32 {
        self.config.bitset.universe_size
    }

    /// Lifetime counters (capacity events, promotions, merges, decays).
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Current step counter.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Number of groups currently held by the store.
    pub fn group_count(&self) -> usize {
        self.store.len()
    }

    /// Run one pipeline pass over `input`. With `options.learn == false`, no
    /// field of `self` changes: not `store`, `graph`, `learner`, `step`,
    /// `attention`, or `stats`.
    pub fn process(&mut self, input: &Bitset, options: StepOptions) -> Metrics {
        let candidates = self.store.candidates(input);
        let activation = self.learner.activate(input, &candidates, &self.store);

        let shaped_reward = self.config.runtime.base_reward + self.config.runtime.rl_pressure * options.reward;

        if options.learn && !self.previous_active.is_empty() {
            for &prev in &self.previous_active {
                for &active in &activation.active {
                    self.graph.strengthen(prev, active, self.config.runtime.eta * shaped_reward);
                }
            }
        }

        let mut predictions = self.predict(&activation.active);

        if options.learn {
            self.learner.update_memberships(&activation.active, input, shaped_reward, &mut self.store);
            self.learner.update_salience(&activation.active, &activation.explained, &mut self.store);

            if let Some(new_group) =
                self.learner.maybe_create_group(input, &candidates, &activation, &mut self.store, self.step)
            {
                self.stats.total_promoted += 1;
                let _ = new_group;
            }

            if self.config.runtime.decay_every > 0 && self.step % self.config.runtime.decay_every == 0 {
                self.graph.apply_decay();
                self.stats.total_decayed += 1;
            }

            if input.len() > 0 {
                let ratio = activation.surprise as f64 / input.len() as f64;
                if ratio >= self.config.runtime.surprise_admission_ratio {
                    self.attention.add(input, activation.surprise, activation.active.clone(), self.step);
                }
            }

            self.stats.total_pruned = self.graph.total_pruned;
            self.stats.total_merged = self.graph.total_merged;
            self.stats.total_evicted = self.store.total_evicted;

            self.previous_active = activation.active.clone();
            self.step += 1;
        }

        predictions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        let importance = if activation.active.is_empty() {
            0.0
        } else {
            activation
                .active
                .iter()
                .filter_map(|&id| self.store.get(id))
                .map(|g| g.salience)
                .sum::<f64>()
                / activation.active.len() as f64
        };

        Metrics {
            surprise: activation.surprise,
            hallucination: activation.hallucination,
            importance,
            active_group_ids: activation.active,
            predictions,
        }
    }

    fn predict(&self, active: &[GroupId]) -> Vec<(GroupId, f64)> {
        let direct = self.graph.predict_direct(active);
        let scores: ScoreMap = if active.len() <= self.config.runtime.multi_hop_when_active_at_most {
            let multi = self.graph.predict_multi_hop(
                active,
                self.config.runtime.multi_hop_max_depth,
                self.config.runtime.decay_per_hop,
            );
            let mut merged = direct;
            for (target, score) in multi {
                let slot = merged.entry(target).or_insert(0.0);
                if score > *slot {
                    *slot = score;
                }
            }
            merged
        } else {
            direct
        };
        scores.into_iter().collect()
    }

    /// Begin a new session: grows every concern's persistence bonus.
    pub fn session_start(&mut self) {
        self.concerns.session_start();
    }

    /// End a session: promotes sufficiently recurrent attention items into
    /// cross-session concerns.
    pub fn session_end(&mut self, now_days: i64) {
        self.concerns.session_end(&self.attention, self.step, now_days);
    }

    /// Serialize the full engine state (config, store, graph, buffers,
    /// concerns, stats) to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            step: self.step,
            config: &self.config,
            store: &self.store,
            graph: &self.graph,
            learner: &self.learner,
            attention: &self.attention,
            previous_active: &self.previous_active,
            persistent_concerns: &self.concerns,
            stats: &self.stats,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Reconstruct an engine from a snapshot produced by [`Engine::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(crate::core::errors::EngineError::domain_field(
                format!("snapshot version {} is newer than supported version {SNAPSHOT_VERSION}", snapshot.version),
                "version",
            ));
        }
        Ok(Self {
            config: snapshot.config,
            store: snapshot.store,
            graph: snapshot.graph,
            learner: snapshot.learner,
            attention: snapshot.attention,
            concerns: snapshot.persistent_concerns,
            step: snapshot.step,
            previous_active: snapshot.previous_active,
            stats: snapshot.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine() -> Engine {
        let mut config = EngineConfig::default();
        config.bitset.universe_size = 64;
        Engine::new(config)
    }

    #[test]
    fn process_returns_nonzero_surprise_for_novel_input() {
        let mut engine = small_engine();
        let input = Bitset::from_ids([1, 2, 3], 64).unwrap();
        let metrics = engine.process(&input, StepOptions { learn: true, reward: 1.0 });
        assert_eq!(metrics.surprise, 3);
    }

    #[test]
    fn repeated_training_reduces_surprise() {
        let mut engine = small_engine();
        let input = Bitset::from_ids([1, 2, 3], 64).unwrap();
        let first = engine.process(&input, StepOptions { learn: true, reward: 1.0 }).surprise;
        for _ in 0..20 {
            engine.process(&input, StepOptions { learn: true, reward: 1.0 });
        }
        let later = engine.process(&input, StepOptions { learn: true, reward: 1.0 }).surprise;
        assert!(later <= first);
    }

    #[test]
    fn learn_false_is_side_effect_free() {
        let mut engine = small_engine();
        let train = Bitset::from_ids([1, 2, 3], 64).unwrap();
        for _ in 0..5 {
            engine.process(&train, StepOptions { learn: true, reward: 1.0 });
        }
        let step_before = engine.step();
        let groups_before = engine.group_count();
        let snapshot_before = engine.to_json().unwrap();

        let probe = Bitset::from_ids([9, 10], 64).unwrap();
        for _ in 0..3 {
            engine.process(&probe, StepOptions { learn: false, reward: 1.0 });
        }

        assert_eq!(engine.step(), step_before);
        assert_eq!(engine.group_count(), groups_before);
        assert_eq!(engine.to_json().unwrap(), snapshot_before);
    }

    #[test]
    fn snapshot_round_trips_store_and_graph_state() {
        let mut engine = small_engine();
        let input = Bitset::from_ids([1, 2, 3], 64).unwrap();
        for _ in 0..3 {
            engine.process(&input, StepOptions { learn: true, reward: 1.0 });
        }
        let json = engine.to_json().unwrap();
        let restored = Engine::from_json(&json).unwrap();
        assert_eq!(restored.group_count(), engine.group_count());
        assert_eq!(restored.step(), engine.step());
    }
}
