//! Bounded priority buffer of surprising inputs awaiting attention.
//!
//! Priority combines how much of the input went unexplained (surprise as a
//! fraction of input size, not a raw count) with how often a near-identical
//! input has recurred; a recency decay pulls stale items back down so fresh
//! surprises can surface ahead of them without being evicted outright.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bitset::Bitset;
use crate::core::config::AttentionConfig;
use crate::group::GroupId;

/// A single buffered item: an input that surprised the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionItem {
    /// Stable id within this buffer's lifetime.
    pub id: u64,
    /// Content fingerprint of the input that produced this item.
    pub input_hash: u64,
    /// Surprise magnitude recorded at insertion time.
    pub surprise: u32,
    /// Total identity count of the input that produced this item, used to
    /// normalize `surprise` into a ratio.
    pub input_size: u32,
    /// Groups active when this item was recorded.
    pub active_ids: Vec<GroupId>,
    /// Count of prior items sharing `input_hash`.
    pub recurrence: u32,
    /// Engine step at which this item was recorded.
    pub created_at_step: u64,
    /// Whether this item has been marked resolved.
    pub resolved: bool,
}

impl AttentionItem {
    /// `surprise_weight * (surprise / input_size) * (1 + recurrence_weight * recurrence)`.
    fn base_priority(&self, config: &AttentionConfig) -> f64 {
        let ratio = if self.input_size == 0 { 0.0 } else { self.surprise as f64 / self.input_size as f64 };
        config.surprise_weight * ratio * (1.0 + config.recurrence_weight * self.recurrence as f64)
    }
}

/// Bounded store of attention items, ranked by a decayed priority score.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttentionBuffer {
    config: AttentionConfig,
    items: Vec<AttentionItem>,
    /// `input_hash -> indices into items` sharing that fingerprint.
    recurrence_index: IndexMap<u64, Vec<usize>>,
    next_id: u64,
}

impl AttentionBuffer {
    /// Construct an empty buffer under the given configuration.
    pub fn new(config: AttentionConfig) -> Self {
        Self { config, items: Vec::new(), recurrence_index: IndexMap::new(), next_id: 0 }
    }

    /// Number of items currently retained.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record a surprising input. Computes recurrence from prior items
    /// sharing the same content fingerprint, assigns an id, and evicts the
    /// lowest-priority item if the buffer is now over capacity.
    pub fn add(&mut self, input: &Bitset, surprise: u32, active_ids: Vec<GroupId>, step: u64) -> u64 {
        let input_hash = input.hash64();
        let recurrence = self.recurrence_index.get(&input_hash).map(|v| v.len() as u32).unwrap_or(0);
        let id = self.next_id;
        self.next_id += 1;

        let item = AttentionItem {
            id,
            input_hash,
            surprise,
            input_size: input.len(),
            active_ids,
            recurrence,
            created_at_step: step,
            resolved: false,
        };
        let index = self.items.len();
        self.items.push(item);
        self.recurrence_index.entry(input_hash).or_default().push(index);

        if self.items.len() > self.config.max_items {
            self.evict_lowest_priority(step);
        }
        id
    }

    fn evict_lowest_priority(&mut self, step: u64) {
        let victim = self
            .items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                self.priority_at(a, step)
                    .partial_cmp(&self.priority_at(b, step))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.id.cmp(&a.id))
            })
            .map(|(i, _)| i);
        if let Some(index) = victim {
            self.remove_at(index);
        }
    }

    fn priority_at(&self, item: &AttentionItem, step: u64) -> f64 {
        let age_steps = step.saturating_sub(item.created_at_step);
        let recency_factor = self.config.recency_decay.powi((age_steps / 60) as i32);
        item.base_priority(&self.config) * recency_factor
    }

    fn remove_at(&mut self, index: usize) {
        let removed = self.items.swap_remove(index);
        if let Some(bucket) = self.recurrence_index.get_mut(&removed.input_hash) {
            bucket.retain(|&i| i != index);
            if bucket.is_empty() {
                self.recurrence_index.shift_remove(&removed.input_hash);
            }
        }
        // swap_remove moved the last element into `index`; fix up its stored position.
        if index < self.items.len() {
            let moved_hash = self.items[index].input_hash;
            if let Some(bucket) = self.recurrence_index.get_mut(&moved_hash) {
                let last = self.items.len();
                for slot in bucket.iter_mut() {
                    if *slot == last {
                        *slot = index;
                    }
                }
            }
        }
    }

    /// Top `n` unresolved items by decayed priority, highest first.
    pub fn get_top_problems(&self, n: usize, step: u64) -> Vec<&AttentionItem> {
        let mut ranked: Vec<&AttentionItem> = self.items.iter().filter(|item| !item.resolved).collect();
        ranked.sort_by(|a, b| {
            self.priority_at(b, step)
                .partial_cmp(&self.priority_at(a, step))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        ranked.truncate(n);
        ranked
    }

    /// Flag an item resolved by id, returning whether it was found.
    pub fn mark_resolved(&mut self, item_id: u64) -> bool {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
            item.resolved = true;
            true
        } else {
            false
        }
    }

    /// Drop every resolved item, compacting storage.
    pub fn clear_resolved(&mut self) {
        let resolved_indices: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.resolved)
            .map(|(i, _)| i)
            .collect();
        for index in resolved_indices.into_iter().rev() {
            self.remove_at(index);
        }
    }

    /// Look up an item by id.
    pub fn item(&self, item_id: u64) -> Option<&AttentionItem> {
        self.items.iter().find(|i| i.id == item_id)
    }
}
