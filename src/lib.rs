//! # groupmind-rs: an online compression-based pattern learner
//!
//! This library implements the engine half of a predictive, self-organizing
//! pattern learner. It ingests a stream of sparse identity bitsets and
//! incrementally discovers *groups* (recurring co-occurrence patterns)
//! together with a directed *deduction graph* capturing which groups tend to
//! follow which. Given a context, the engine returns a ranked list of groups
//! likely to explain the next input.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                              │
//! ├───────────────┬───────────────┬───────────────┬──────────────┤
//! │  GroupStore    │  DeductionGraph │   Learner    │  Attention   │
//! │  + inverted    │  forward/backward│  activation  │  + Concerns  │
//! │    index       │  mirrors        │  scoring      │  buffers     │
//! └───────────────┴───────────────┴───────────────┴──────────────┘
//!          all built on the fixed-universe Bitset primitive
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use groupmind_rs::core::config::EngineConfig;
//! use groupmind_rs::engine::{Engine, StepOptions};
//! use groupmind_rs::bitset::Bitset;
//!
//! let config = EngineConfig::default();
//! let mut engine = Engine::new(config);
//!
//! let mut input = Bitset::new(engine.universe_size());
//! input.add(7).unwrap();
//! input.add(42).unwrap();
//!
//! let metrics = engine.process(&input, StepOptions { learn: true, reward: 1.0 });
//! println!("surprise = {}", metrics.surprise);
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_arguments)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

// Memory allocator selection (mutually exclusive)
#[cfg(all(feature = "mimalloc", not(feature = "jemalloc")))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(feature = "jemalloc", not(feature = "mimalloc")))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Ambient engineering concerns shared by every component: errors and configuration.
pub mod core {
    //! Cross-cutting concerns: the error taxonomy and the configuration tree.

    pub mod config;
    pub mod errors;
}

/// Fixed-universe sparse bitset primitive.
pub mod bitset;

/// Learned co-occurrence patterns and the store that owns them.
pub mod group;

/// The group store: primary map plus inverted membership index.
pub mod store;

/// The weighted directed deduction graph over group ids.
pub mod graph;

/// Per-input activation, scoring, creation, and membership drift.
pub mod learner;

/// Bounded priority queue of surprising, unresolved inputs.
pub mod attention;

/// Cross-session promotion of recurring unresolved items.
pub mod concerns;

/// Orchestrates the per-step pipeline across every component.
pub mod engine;

pub use bitset::Bitset;
pub use engine::{Engine, Metrics, StepOptions};
pub use group::{Group, GroupId};
