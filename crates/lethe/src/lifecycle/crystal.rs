//! Durable artifacts produced by reforging
//!
//! A [`ReforgedCrystal`] is the immutable record of one compression: which
//! memories went in and what summary came out. The [`Crystal`] is the
//! artifact itself, which later takes part in fusion proposals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::types::MemoryKind;

/// `origin` of crystals created by the reforge compressor
pub const REFORGE_ORIGIN: &str = "reforge";

/// Compression artifact stored in the crystals collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    pub id: Uuid,
    pub name: String,
    /// Category derived from the dominant memory kind of its sources
    pub class: String,
    /// Tier from 1 to 5
    pub star: u8,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Set once the crystal has been fused into another
    #[serde(default)]
    pub fused: bool,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

impl Crystal {
    /// One-star crystal minted from a reforge
    pub fn reforged(
        name: impl Into<String>,
        class: impl Into<String>,
        summary: impl Into<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            class: class.into(),
            star: 1,
            summary: summary.into(),
            keywords,
            fused: false,
            origin: REFORGE_ORIGIN.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Crystal class for the dominant kind of a reforged group
pub fn class_for_kind(kind: &MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Goal => "strategy",
        MemoryKind::Fact => "knowledge",
        MemoryKind::Outcome => "achievement",
        MemoryKind::Observation => "insight",
        MemoryKind::Note => "lore",
        MemoryKind::Error => "lesson",
        MemoryKind::Other(_) => "lore",
    }
}

/// Record of one reforge. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReforgedCrystal {
    pub id: Uuid,
    /// Sources in `created_at` order
    pub source_memory_ids: Vec<Uuid>,
    /// Artifact created alongside, when crystal creation succeeded
    #[serde(default)]
    pub crystal_id: Option<Uuid>,
    /// `1 / source_count`
    pub compression_ratio: f32,
    pub source_count: usize,
    pub legendary_name: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}
