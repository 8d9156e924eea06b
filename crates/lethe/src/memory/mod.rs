//! Memory records and their freshness
//!
//! Defines the agent memory record, its decay bookkeeping, the decay scorer
//! and the keyword extraction seam shared by the lifecycle and dream engines.

pub mod decay;
pub mod keywords;
pub mod types;

pub use decay::{DecayConfig, age_hours, decay_score, kind_multiplier, round_score};
pub use keywords::{KeywordExtractor, StopwordExtractor};
pub use types::{ANCHOR_SOURCE, ArchiveReason, DecayEntry, Memory, MemoryKind};
