//! Cross-session persistence of recurring attention items.
//!
//! A [`Concern`] is what an [`crate::attention::AttentionItem`] becomes once
//! it has recurred often enough within a session to be worth remembering
//! across sessions. Concerns track improvement attempts and self-resolve
//! once cumulative improvement covers half the underlying signature.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::attention::AttentionBuffer;
use crate::core::config::ConcernsConfig;

/// One attempt at addressing a concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Identifier of the transform that was tried.
    pub transform_id: String,
    /// Measured improvement from this attempt.
    pub improvement: f64,
}

/// A recurring problem tracked across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concern {
    /// Stable id within this registry's lifetime.
    pub id: u64,
    /// Content fingerprint of the attention item this concern was promoted from.
    pub signature_hash: u64,
    /// Bit count of the originating signature, used for resolution thresholds.
    pub signature_bits: u32,
    /// Number of sessions this concern has recurred in.
    pub sessions: u32,
    /// Step at which this concern was last observed recurring.
    pub last_seen_step: u64,
    /// Day (caller-defined epoch) this concern was first created.
    pub created_at_days: i64,
    /// Multiplicative priority bonus, grown each session start.
    pub persistence_bonus: f64,
    /// Every attempt recorded against this concern.
    pub attempts: Vec<Attempt>,
    /// Index into `attempts` of the best-performing attempt so far.
    pub best_attempt: Option<usize>,
    /// Running sum of recorded improvement across all attempts.
    pub cumulative_improvement: f64,
}

impl Concern {
    fn priority(&self) -> f64 {
        self.persistence_bonus * self.sessions as f64
    }
}

/// Cross-session registry of recurring concerns.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistentConcerns {
    config: ConcernsConfig,
    concerns: IndexMap<u64, Concern>,
    next_id: u64,
}

impl PersistentConcerns {
    /// Construct an empty registry under the given configuration.
    pub fn new(config: ConcernsConfig) -> Self {
        Self { config, concerns: IndexMap::new(), next_id: 0 }
    }

    /// Number of concerns currently tracked.
    pub fn len(&self) -> usize {
        self.concerns.len()
    }

    /// Whether the registry holds no concerns.
    pub fn is_empty(&self) -> bool {
        self.concerns.is_empty()
    }

    /// Look up a concern by its signature hash.
    pub fn get(&self, id: u64) -> Option<&Concern> {
        self.concerns.get(&id)
    }

    /// Promote every unresolved attention item with sufficient recurrence
    /// into a concern (new, or merged into an existing one by signature).
    pub fn session_end(&mut self, buffer: &AttentionBuffer, step: u64, now_days: i64) {
        for item in buffer.get_top_problems(usize::MAX, step) {
            if item.recurrence < self.config.min_recurrence {
                continue;
            }
            if let Some(existing) = self.concerns.get_mut(&item.input_hash) {
                existing.sessions += 1;
                existing.last_seen_step = step;
            } else {
                let id = self.next_id;
                self.next_id += 1;
                let concern = Concern {
                    id,
                    signature_hash: item.input_hash,
                    signature_bits: item.input_size,
                    sessions: 1,
                    last_seen_step: step,
                    created_at_days: now_days,
                    persistence_bonus: 1.0,
                    attempts: Vec::new(),
                    best_attempt: None,
                    cumulative_improvement: 0.0,
                };
                self.concerns.insert(item.input_hash, concern);
                self.enforce_capacity();
            }
        }
    }

    /// Grow every concern's `persistence_bonus` at the start of a session.
    pub fn session_start(&mut self) {
        for concern in self.concerns.values_mut() {
            concern.persistence_bonus *= self.config.persistence_bonus_growth;
        }
    }

    /// Record an attempt to address `concern_id`. Resolves (removes) the
    /// concern once cumulative improvement covers half its signature's bits.
    pub fn record_attempt(&mut self, concern_id_hash: u64, transform_id: impl Into<String>, improvement: f64) {
        let resolved = {
            let Some(concern) = self.concerns.get_mut(&concern_id_hash) else { return };
            concern.attempts.push(Attempt { transform_id: transform_id.into(), improvement });
            concern.cumulative_improvement += improvement;
            let best = concern
                .attempts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.improvement.partial_cmp(&b.1.improvement).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            concern.best_attempt = best;
            concern.cumulative_improvement >= concern.signature_bits as f64 / 2.0
        };
        if resolved {
            self.concerns.shift_remove(&concern_id_hash);
        }
    }

    fn enforce_capacity(&mut self) {
        while self.concerns.len() > self.config.max_concerns {
            let victim = self
                .concerns
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.priority().partial_cmp(&b.priority()).unwrap_or(std::cmp::Ordering::Equal).then(b.id.cmp(&a.id))
                })
                .map(|(&hash, _)| hash);
            if let Some(hash) = victim {
                self.concerns.shift_remove(&hash);
            } else {
                break;
            }
        }
    }

    /// Remove concerns older than `max_age_days` that never reached `min_sessions`.
    pub fn prune(&mut self, now_days: i64) {
        let cutoff = now_days - self.config.max_age_days;
        self.concerns.retain(|_, concern| {
            concern.sessions >= self.config.min_sessions || concern.created_at_days > cutoff
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::AttentionConfig;
    use crate::bitset::Bitset;

    fn concerns(min_recurrence: u32, max_concerns: usize) -> PersistentConcerns {
        PersistentConcerns::new(ConcernsConfig {
            min_recurrence,
            max_concerns,
            persistence_bonus_growth: 1.1,
            min_sessions: 2,
            max_age_days: 30,
        })
    }

    fn buffer_with_recurring_item(recurrence_hits: u32) -> AttentionBuffer {
        let mut buf = AttentionBuffer::new(AttentionConfig {
            max_items: 100,
            surprise_weight: 1.0,
            recurrence_weight: 0.5,
            recency_decay: 0.98,
        });
        let input = Bitset::from_ids([1, 2], 16).unwrap();
        for _ in 0..=recurrence_hits {
            buf.add(&input, 2, vec![], 0);
        }
        buf
    }

    #[test]
    fn session_end_promotes_recurring_items() {
        let mut pc = concerns(2, 100);
        let buf = buffer_with_recurring_item(3);
        pc.session_end(&buf, 0, 0);
        assert_eq!(pc.len(), 1);
    }

    #[test]
    fn session_end_uses_input_size_not_surprise_for_signature_bits() {
        let mut pc = concerns(1, 100);
        let mut buf = AttentionBuffer::new(AttentionConfig {
            max_items: 100,
            surprise_weight: 1.0,
            recurrence_weight: 0.5,
            recency_decay: 0.98,
        });
        let input = Bitset::from_ids([1, 2, 3, 4], 16).unwrap();
        buf.add(&input, 1, vec![], 0);
        buf.add(&input, 1, vec![], 0);
        pc.session_end(&buf, 0, 0);
        let concern = pc.concerns.values().next().unwrap();
        assert_eq!(concern.signature_bits, 4);
    }

    #[test]
    fn session_end_ignores_low_recurrence() {
        let mut pc = concerns(5, 100);
        let buf = buffer_with_recurring_item(1);
        pc.session_end(&buf, 0, 0);
        assert!(pc.is_empty());
    }

    #[test]
    fn session_start_grows_persistence_bonus() {
        let mut pc = concerns(1, 100);
        let buf = buffer_with_recurring_item(1);
        pc.session_end(&buf, 0, 0);
        let before = pc.concerns.values().next().unwrap().persistence_bonus;
        pc.session_start();
        let after = pc.concerns.values().next().unwrap().persistence_bonus;
        assert!(after > before);
    }

    #[test]
    fn record_attempt_resolves_when_improvement_covers_half_signature() {
        let mut pc = concerns(1, 100);
        let buf = buffer_with_recurring_item(1);
        pc.session_end(&buf, 0, 0);
        let hash = pc.concerns.keys().next().copied().unwrap();
        pc.record_attempt(hash, "fix-a", 1.5);
        assert!(pc.get(0).is_none() || pc.concerns.get(&hash).is_none());
    }

    #[test]
    fn prune_removes_stale_low_session_concerns() {
        let mut pc = concerns(1, 100);
        let buf = buffer_with_recurring_item(1);
        pc.session_end(&buf, 0, 0);
        pc.prune(60);
        assert!(pc.is_empty());
    }
}
