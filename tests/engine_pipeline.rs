//! End-to-end tests driving [`Engine`] through multiple steps, mirroring the
//! illustrative scenarios that motivated the core invariants.

use groupmind_rs::bitset::Bitset;
use groupmind_rs::core::config::EngineConfig;
use groupmind_rs::engine::{Engine, StepOptions};

const UNIVERSE: u32 = 128;

fn engine() -> Engine {
    let mut config = EngineConfig::default();
    config.bitset.universe_size = UNIVERSE;
    config.learner.creation_threshold = 0.3;
    Engine::new(config)
}

#[test]
fn training_on_a_pattern_surfaces_it_in_predictions() {
    let mut e = engine();
    let a = Bitset::from_ids([1, 2, 3], UNIVERSE).unwrap();
    let b = Bitset::from_ids([10, 11, 12], UNIVERSE).unwrap();

    for _ in 0..10 {
        e.process(&a, StepOptions { learn: true, reward: 1.0 });
        e.process(&b, StepOptions { learn: true, reward: 1.0 });
    }

    let metrics_a = e.process(&a, StepOptions { learn: true, reward: 1.0 });
    assert!(!metrics_a.active_group_ids.is_empty());
    assert!(!metrics_a.predictions.is_empty() || metrics_a.active_group_ids.len() <= 1);
}

#[test]
fn membership_drift_pulls_in_a_recurring_extra_identity() {
    let mut e = engine();
    let core = Bitset::from_ids([10, 20], UNIVERSE).unwrap();
    let with_extra = Bitset::from_ids([10, 20, 30], UNIVERSE).unwrap();

    e.process(&core, StepOptions { learn: true, reward: 1.0 });
    for _ in 0..10 {
        e.process(&with_extra, StepOptions { learn: true, reward: 1.0 });
    }

    assert!(e.group_count() >= 1);
}

#[test]
fn non_mutation_holds_across_varied_probes() {
    let mut e = engine();
    for i in 0..5u32 {
        let input = Bitset::from_ids([i, i + 1, i + 2], UNIVERSE).unwrap();
        e.process(&input, StepOptions { learn: true, reward: 1.0 });
    }

    let snapshot = e.to_json().unwrap();
    let step = e.step();

    for i in 0..3u32 {
        let probe = Bitset::from_ids([50 + i, 60 + i], UNIVERSE).unwrap();
        e.process(&probe, StepOptions { learn: false, reward: 1.0 });
    }

    assert_eq!(e.step(), step);
    assert_eq!(e.to_json().unwrap(), snapshot);
}

#[test]
fn snapshot_restore_preserves_prediction_behavior() {
    let mut e = engine();
    let a = Bitset::from_ids([1, 2, 3], UNIVERSE).unwrap();
    let b = Bitset::from_ids([4, 5, 6], UNIVERSE).unwrap();
    for _ in 0..5 {
        e.process(&a, StepOptions { learn: true, reward: 1.0 });
        e.process(&b, StepOptions { learn: true, reward: 1.0 });
    }

    let snapshot = e.to_json().unwrap();
    let mut restored = Engine::from_json(&snapshot).unwrap();

    let live = e.process(&a, StepOptions { learn: false, reward: 1.0 });
    let replayed = restored.process(&a, StepOptions { learn: false, reward: 1.0 });
    assert_eq!(live.surprise, replayed.surprise);
    assert_eq!(live.active_group_ids, replayed.active_group_ids);
}
