//! Lethe - Memory lifecycle engine for agent fleets
//!
//! Scores agent memories for freshness, archives the stale ones, compresses
//! related decaying memories into durable crystals and runs periodic dream
//! analysis that proposes (and sometimes applies) corrective actions.

pub mod config;
pub mod dream;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use engine::{Engine, LifecycleStats};
pub use error::LetheError;
