//! Configuration types for the groupmind-rs engine.
//!
//! Composable, YAML/JSON-loadable, and validated before use, the same shape
//! the engine's own snapshot format embeds so a restored engine reproduces
//! its tuning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};

/// Root configuration for an [`crate::engine::Engine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed-universe bitset sizing.
    pub bitset: BitsetConfig,
    /// Group store caps and eviction policy.
    pub store: StoreConfig,
    /// Deduction graph thresholds and caps.
    pub graph: GraphConfig,
    /// Learner scoring/creation/membership parameters.
    pub learner: LearnerConfig,
    /// Attention buffer sizing and priority weights.
    pub attention: AttentionConfig,
    /// Persistent concerns promotion parameters.
    pub concerns: ConcernsConfig,
    /// Engine-level runtime cadence (decay, reward shaping, multi-hop).
    pub runtime: EngineRuntimeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bitset: BitsetConfig::default(),
            store: StoreConfig::default(),
            graph: GraphConfig::default(),
            learner: LearnerConfig::default(),
            attention: AttentionConfig::default(),
            concerns: ConcernsConfig::default(),
            runtime: EngineRuntimeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::io(format!("failed to read config file: {}", path.display()), e))?;
        serde_yaml::from_str(&content).map_err(Into::into)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)
            .map_err(|e| EngineError::io(format!("failed to write config file: {}", path.display()), e))
    }

    /// Validate every sub-config, failing fast on the first contract violation.
    pub fn validate(&self) -> Result<()> {
        self.bitset.validate()?;
        self.store.validate()?;
        self.graph.validate()?;
        self.learner.validate()?;
        self.attention.validate()?;
        self.concerns.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

/// Fixed-universe bitset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitsetConfig {
    /// Universe size `U`; identities live in `[0, U)`.
    pub universe_size: u32,
}

impl Default for BitsetConfig {
    fn default() -> Self {
        Self { universe_size: 32_768 }
    }
}

impl BitsetConfig {
    fn validate(&self) -> Result<()> {
        if self.universe_size == 0 {
            return Err(EngineError::config_field(
                "universe_size must be positive",
                "bitset.universe_size",
            ));
        }
        Ok(())
    }
}

/// Eviction policy applied to a `belongsTo` bucket that exceeds its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexEvictPolicy {
    /// Drop the bucket member with the smallest salience.
    LowestSalience,
    /// Drop the bucket member that was created longest ago.
    Oldest,
}

impl Default for IndexEvictPolicy {
    fn default() -> Self {
        Self::LowestSalience
    }
}

/// Group store caps and eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of groups retained in the primary map (0 = unbounded).
    pub max_groups: usize,
    /// Per-identity cap on the inverted `belongsTo` bucket.
    pub max_groups_per_identity: usize,
    /// Eviction policy applied when a bucket exceeds `max_groups_per_identity`.
    pub evict_policy: IndexEvictPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_groups: 50_000,
            max_groups_per_identity: 32,
            evict_policy: IndexEvictPolicy::LowestSalience,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.max_groups_per_identity == 0 {
            return Err(EngineError::config_field(
                "max_groups_per_identity must be positive",
                "store.max_groups_per_identity",
            ));
        }
        Ok(())
    }
}

/// Deduction graph thresholds and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Edges with weight at or below this threshold are removed.
    pub threshold: f64,
    /// Maximum outgoing edges retained per source node.
    pub max_edges_per_node: usize,
    /// Multiplicative decay applied to every edge weight on `apply_decay`.
    pub decay_factor: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            max_edges_per_node: 64,
            decay_factor: 0.1,
        }
    }
}

impl GraphConfig {
    fn validate(&self) -> Result<()> {
        if self.max_edges_per_node == 0 {
            return Err(EngineError::config_field(
                "max_edges_per_node must be positive",
                "graph.max_edges_per_node",
            ));
        }
        if !(0.0..1.0).contains(&self.decay_factor) {
            return Err(EngineError::config_field(
                "decay_factor must be in [0, 1)",
                "graph.decay_factor",
            ));
        }
        Ok(())
    }
}

/// Learner scoring, creation, and membership-drift parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Salience boost weight `β` in the activation score.
    pub beta: f64,
    /// Minimum score for a candidate to be considered active.
    pub min_score: f64,
    /// Maximum number of active groups per step.
    pub max_active: usize,
    /// Surprise ratio above which group creation is considered.
    pub creation_threshold: f64,
    /// Minimum candidate score that suppresses creation (prefer widening).
    pub min_merge_score: f64,
    /// Count threshold at which a drifting identity joins `members`.
    pub membership_threshold: f64,
    /// Reward-scaled increment applied to `member_counts` on explained hits.
    pub alpha: f64,
    /// Decrement applied to `member_counts` on hallucinated misses.
    pub alpha_decay: f64,
    /// Salience EMA smoothing factor `λ`.
    pub lambda: f64,
    /// Weight of novelty in the `importance` blend.
    pub w_novelty: f64,
    /// Weight of utility in the `importance` blend.
    pub w_utility: f64,
    /// Weight of stability in the `importance` blend.
    pub w_stability: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            beta: 0.5,
            min_score: 0.15,
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
        }
    }
}

impl LearnerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(EngineError::config_field(
                "max_active must be positive",
                "learner.max_active",
            ));
        }
        if self.membership_threshold <= 0.0 {
            return Err(EngineError::config_field(
                "membership_threshold must be positive",
                "learner.membership_threshold",
            ));
        }
        let weight_sum = self.w_novelty + self.w_utility + self.w_stability;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::config_field(
                "importance weights (w_novelty + w_utility + w_stability) must sum to 1.0",
                "learner.w_*",
            ));
        }
        Ok(())
    }
}

/// Attention buffer sizing and priority weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Maximum retained items; lowest-priority item is evicted past this cap.
    pub max_items: usize,
    /// Weight applied to the surprise ratio in the priority formula.
    pub surprise_weight: f64,
    /// Weight applied to recurrence in the priority formula.
    pub recurrence_weight: f64,
    /// Per-minute multiplicative recency decay.
    pub recency_decay: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            surprise_weight: 1.0,
            recurrence_weight: 0.5,
            recency_decay: 0.98,
        }
    }
}

impl AttentionConfig {
    fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(EngineError::config_field(
                "max_items must be positive",
                "attention.max_items",
            ));
        }
        if !(0.0..=1.0).contains(&self.recency_decay) {
            return Err(EngineError::config_field(
                "recency_decay must be in [0, 1]",
                "attention.recency_decay",
            ));
        }
        Ok(())
    }
}

/// Persistent concerns promotion and pruning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcernsConfig {
    /// Minimum recurrence within a session for promotion to a concern.
    pub min_recurrence: u32,
    /// Maximum number of retained concerns.
    pub max_concerns: usize,
    /// Multiplicative growth applied to `persistence_bonus` each session start.
    pub persistence_bonus_growth: f64,
    /// Minimum sessions a concern must survive to avoid age-based pruning.
    pub min_sessions: u32,
    /// Maximum age in days before an under-attended concern is pruned.
    pub max_age_days: i64,
}

impl Default for ConcernsConfig {
    fn default() -> Self {
        Self {
            min_recurrence: 3,
            max_concerns: 2_000,
            persistence_bonus_growth: 1.1,
            min_sessions: 2,
            max_age_days: 30,
        }
    }
}

impl ConcernsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_concerns == 0 {
            return Err(EngineError::config_field(
                "max_concerns must be positive",
                "concerns.max_concerns",
            ));
        }
        Ok(())
    }
}

/// Engine-level runtime cadence: decay scheduling, reward shaping, multi-hop depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineRuntimeConfig {
    /// Apply `graph.apply_decay()` every this many steps (0 disables periodic decay).
    pub decay_every: u64,
    /// Learning-rate applied to graph strengthening.
    pub eta: f64,
    /// Baseline reward term added regardless of the caller-supplied reward.
    pub base_reward: f64,
    /// Scales the caller-supplied reward before it's added to `base_reward`.
    pub rl_pressure: f64,
    /// Minimum surprise/size ratio for an input to enter the attention buffer.
    pub surprise_admission_ratio: f64,
    /// Maximum BFS depth for multi-hop prediction.
    pub multi_hop_max_depth: u32,
    /// Multiplicative decay applied per hop during multi-hop prediction.
    pub decay_per_hop: f64,
    /// Multi-hop prediction only runs automatically when `|active| <= this`.
    pub multi_hop_when_active_at_most: usize,
}

impl Default for EngineRuntimeConfig {
    fn default() -> Self {
        Self {
            decay_every: 500,
            eta: 0.3,
            base_reward: 0.1,
            rl_pressure: 1.0,
            surprise_admission_ratio: 0.3,
            multi_hop_max_depth: 3,
            decay_per_hop: 0.5,
            multi_hop_when_active_at_most: 3,
        }
    }
}

impl EngineRuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.multi_hop_max_depth == 0 {
            return Err(EngineError::config_field(
                "multi_hop_max_depth must be positive",
                "runtime.multi_hop_max_depth",
            ));
        }
        if !(0.0..1.0).contains(&self.decay_per_hop) {
            return Err(EngineError::config_field(
                "decay_per_hop must be in [0, 1)",
                "runtime.decay_per_hop",
            ));
        }
        Ok(())
    }
}
