//! Memory types for the Lethe engine
//!
//! Defines the agent memory record consumed by the lifecycle engine and the
//! per-memory decay bookkeeping the engine owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// `source` value marking a memory as permanently pinned.
pub const ANCHOR_SOURCE: &str = "anchor";

/// Default `source` for memories written by agents.
pub const AGENT_SOURCE: &str = "agent";

/// A single unit of agent experience.
///
/// Memories are immutable once written. Their lifecycle ends only through
/// archival of the matching [`DecayEntry`], never by physical deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier for this memory
    pub id: Uuid,
    /// Agent that produced the memory
    pub agent_id: String,
    /// Classification of the memory
    pub kind: MemoryKind,
    /// Free-text content
    pub content: String,
    /// When this memory was created
    pub created_at: DateTime<Utc>,
    /// Origin marker; [`ANCHOR_SOURCE`] pins the memory against decay
    pub source: String,
}

impl Memory {
    /// Create a new agent memory stamped with the current time
    pub fn new(agent_id: impl Into<String>, kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            kind,
            content: content.into(),
            created_at: Utc::now(),
            source: AGENT_SOURCE.to_string(),
        }
    }

    /// Pin this memory as an anchor
    pub fn anchored(mut self) -> Self {
        self.source = ANCHOR_SOURCE.to_string();
        self
    }

    /// Override the creation timestamp
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether this memory is an anchor (floored score, never auto-archived)
    pub fn is_anchored(&self) -> bool {
        self.source == ANCHOR_SOURCE
    }
}

/// Kind of memory, which determines how durable it is under decay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryKind {
    Goal,
    Fact,
    Outcome,
    Observation,
    Note,
    Error,
    /// Any kind this engine does not know about
    Other(String),
}

impl MemoryKind {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryKind::Goal => "goal",
            MemoryKind::Fact => "fact",
            MemoryKind::Outcome => "outcome",
            MemoryKind::Observation => "observation",
            MemoryKind::Note => "note",
            MemoryKind::Error => "error",
            MemoryKind::Other(kind) => kind,
        }
    }
}

impl From<String> for MemoryKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "goal" => MemoryKind::Goal,
            "fact" => MemoryKind::Fact,
            "outcome" => MemoryKind::Outcome,
            "observation" => MemoryKind::Observation,
            "note" => MemoryKind::Note,
            "error" => MemoryKind::Error,
            _ => MemoryKind::Other(value),
        }
    }
}

impl From<&str> for MemoryKind {
    fn from(value: &str) -> Self {
        MemoryKind::from(value.to_string())
    }
}

impl From<MemoryKind> for String {
    fn from(kind: MemoryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decay bookkeeping for one memory, created lazily on first scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayEntry {
    /// The memory this entry tracks (unique)
    pub memory_id: Uuid,
    /// Freshness in [0, 1], stored rounded to 3 decimals
    pub decay_score: f32,
    /// Number of times the memory was read for context
    pub access_count: u32,
    /// Once true, never reset by the engine
    pub is_archived: bool,
    /// Human-readable reason recorded when archived
    #[serde(default)]
    pub archive_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DecayEntry {
    /// State assumed for a memory that has never been scored
    pub fn fresh(memory_id: Uuid) -> Self {
        Self {
            memory_id,
            decay_score: 1.0,
            access_count: 0,
            is_archived: false,
            archive_reason: None,
            updated_at: Utc::now(),
        }
    }
}

/// Why a memory was archived.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveReason {
    /// Score fell below the archive threshold during a decay pass
    Decayed { score: f32 },
    /// Compressed into a reforged artifact
    Reforged { artifact: String },
}

impl fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveReason::Decayed { score } => {
                write!(f, "Decayed below archive threshold (score {score:.3})")
            }
            ArchiveReason::Reforged { artifact } => write!(f, "Reforged into {artifact}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_new_defaults() {
        let memory = Memory::new("agent-7", MemoryKind::Fact, "The cache lives in redis");

        assert_eq!(memory.agent_id, "agent-7");
        assert_eq!(memory.kind, MemoryKind::Fact);
        assert_eq!(memory.source, AGENT_SOURCE);
        assert!(!memory.is_anchored());
    }

    #[test]
    fn test_anchored_memory() {
        let memory = Memory::new("agent-7", MemoryKind::Goal, "Ship v2").anchored();
        assert!(memory.is_anchored());
        assert_eq!(memory.source, "anchor");
    }

    #[test]
    fn test_memory_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MemoryKind::Observation).unwrap();
        assert_eq!(json, "\"observation\"");
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let kind: MemoryKind = serde_json::from_str("\"dream\"").unwrap();
        assert_eq!(kind, MemoryKind::Other("dream".to_string()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"dream\"");
    }

    #[test]
    fn test_memory_serialization() {
        let memory = Memory::new("agent-1", MemoryKind::Error, "Timeout talking to billing");

        let json = serde_json::to_value(&memory).expect("Failed to serialize memory");
        assert_eq!(json["kind"], "error");

        let deserialized: Memory = serde_json::from_value(json).expect("Failed to deserialize");
        assert_eq!(deserialized.id, memory.id);
        assert_eq!(deserialized.kind, memory.kind);
        assert_eq!(deserialized.content, memory.content);
    }

    #[test]
    fn test_fresh_decay_entry() {
        let id = Uuid::new_v4();
        let entry = DecayEntry::fresh(id);
        assert_eq!(entry.memory_id, id);
        assert_eq!(entry.access_count, 0);
        assert!(!entry.is_archived);
        assert!(entry.archive_reason.is_none());
    }

    #[test]
    fn test_archive_reason_display() {
        let decayed = ArchiveReason::Decayed { score: 0.1234 };
        assert_eq!(
            decayed.to_string(),
            "Decayed below archive threshold (score 0.123)"
        );

        let reforged = ArchiveReason::Reforged {
            artifact: "Ancient Deploy Codex".to_string(),
        };
        assert_eq!(reforged.to_string(), "Reforged into Ancient Deploy Codex");
    }
}
