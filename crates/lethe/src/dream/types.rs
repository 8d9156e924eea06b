//! Dream analysis records
//!
//! Manifestations (proposals) and the small state machine that governs them,
//! plus the session, insight, association and usage records the dream
//! cycle reads and writes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LetheError, Result};
use crate::memory::types::Memory;

/// `approved_by` stamped on auto-executed manifestations
pub const AUTO_APPROVER: &str = "system:auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestCategory {
    Fusion,
    Association,
    Pricing,
    Skill,
    Meeting,
    Pattern,
    Correction,
}

impl ManifestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestCategory::Fusion => "fusion",
            ManifestCategory::Association => "association",
            ManifestCategory::Pricing => "pricing",
            ManifestCategory::Skill => "skill",
            ManifestCategory::Meeting => "meeting",
            ManifestCategory::Pattern => "pattern",
            ManifestCategory::Correction => "correction",
        }
    }

    /// Categories whose actions are safe to run without a human
    pub fn is_auto_executable(&self) -> bool {
        matches!(self, ManifestCategory::Association | ManifestCategory::Pattern)
    }
}

impl fmt::Display for ManifestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a manifestation.
///
/// `proposed → approved → executed`, `proposed → rejected`,
/// `proposed → expired` and `proposed → auto_executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Proposed,
    Approved,
    Executed,
    AutoExecuted,
    Rejected,
    Expired,
}

impl ManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestStatus::Proposed => "proposed",
            ManifestStatus::Approved => "approved",
            ManifestStatus::Executed => "executed",
            ManifestStatus::AutoExecuted => "auto_executed",
            ManifestStatus::Rejected => "rejected",
            ManifestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ManifestStatus::Proposed | ManifestStatus::Approved)
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ManifestStatus {
    type Err = LetheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "proposed" => Ok(ManifestStatus::Proposed),
            "approved" => Ok(ManifestStatus::Approved),
            "executed" => Ok(ManifestStatus::Executed),
            "auto_executed" => Ok(ManifestStatus::AutoExecuted),
            "rejected" => Ok(ManifestStatus::Rejected),
            "expired" => Ok(ManifestStatus::Expired),
            other => Err(LetheError::General(format!("Unknown status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPair {
    pub memory_a: Uuid,
    pub memory_b: Uuid,
}

/// Existing association below the healthy strength band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeakLink {
    pub association_id: Uuid,
    pub current_strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Increase,
    Decrease,
}

/// Structured action carried by a manifestation, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposedAction {
    CreateAssociations {
        pairs: Vec<MemoryPair>,
        strength: f32,
    },
    ReinforceAssociations {
        associations: Vec<WeakLink>,
        boost: f32,
    },
    FlagErrorPattern {
        memory_ids: Vec<Uuid>,
        keywords: Vec<String>,
        error_count: usize,
    },
    TriggerMeeting {
        agents: Vec<String>,
        keywords: Vec<String>,
        urgency: Urgency,
    },
    FuseCrystals {
        crystal_ids: Vec<Uuid>,
        cross_class: bool,
    },
    HighlightPattern {
        insight_id: String,
        pattern: String,
    },
    SuggestSkill {
        insight_id: String,
        keywords: Vec<String>,
    },
    ReviewPricing {
        endpoint: String,
        direction: PriceDirection,
        calls: usize,
        avg_revenue: f64,
    },
    ApplyCorrection {
        insight_id: String,
        correction: String,
    },
}

impl ProposedAction {
    /// The `type` discriminator
    pub fn type_name(&self) -> &'static str {
        match self {
            ProposedAction::CreateAssociations { .. } => "create_associations",
            ProposedAction::ReinforceAssociations { .. } => "reinforce_associations",
            ProposedAction::FlagErrorPattern { .. } => "flag_error_pattern",
            ProposedAction::TriggerMeeting { .. } => "trigger_meeting",
            ProposedAction::FuseCrystals { .. } => "fuse_crystals",
            ProposedAction::HighlightPattern { .. } => "highlight_pattern",
            ProposedAction::SuggestSkill { .. } => "suggest_skill",
            ProposedAction::ReviewPricing { .. } => "review_pricing",
            ProposedAction::ApplyCorrection { .. } => "apply_correction",
        }
    }
}

/// A proposed corrective action discovered by dream analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifestation {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ManifestCategory,
    pub confidence: f32,
    pub priority: u8,
    #[serde(default)]
    pub source_memory_ids: Vec<Uuid>,
    #[serde(default)]
    pub source_insight_ids: Vec<String>,
    pub proposed_action: ProposedAction,
    pub status: ManifestStatus,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Manifestation {
    /// New `proposed` manifestation. Confidence is clamped to [0, 1], priority to 1..=5.
    pub fn new(
        category: ManifestCategory,
        title: impl Into<String>,
        description: impl Into<String>,
        confidence: f32,
        priority: u8,
        action: ProposedAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
            priority: priority.clamp(1, 5),
            source_memory_ids: Vec::new(),
            source_insight_ids: Vec::new(),
            proposed_action: action,
            status: ManifestStatus::Proposed,
            session_id: None,
            approved_by: None,
            rejection_reason: None,
            executed_at: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_memories(mut self, ids: Vec<Uuid>) -> Self {
        self.source_memory_ids = ids;
        self
    }

    pub fn with_insights(mut self, ids: Vec<String>) -> Self {
        self.source_insight_ids = ids;
        self
    }

    /// Whether the auto-execution gate lets this through
    pub fn is_auto_executable(&self, min_confidence: f32) -> bool {
        self.status == ManifestStatus::Proposed
            && self.category.is_auto_executable()
            && self.confidence >= min_confidence
    }

    fn transition_error(&self, action: &'static str) -> LetheError {
        LetheError::InvalidTransition {
            id: self.id.to_string(),
            from: self.status.to_string(),
            action,
        }
    }

    /// `proposed → approved`. Leaves the manifestation untouched on failure.
    pub fn approve(&mut self, approver: &str) -> Result<()> {
        if self.status != ManifestStatus::Proposed {
            return Err(self.transition_error("approve"));
        }
        self.status = ManifestStatus::Approved;
        self.approved_by = Some(approver.to_string());
        Ok(())
    }

    /// `approved → executed`
    pub fn mark_executed(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != ManifestStatus::Approved {
            return Err(self.transition_error("execute"));
        }
        self.status = ManifestStatus::Executed;
        self.executed_at = Some(at);
        self.resolved_at = Some(at);
        Ok(())
    }

    /// `proposed → auto_executed`
    pub fn mark_auto_executed(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != ManifestStatus::Proposed {
            return Err(self.transition_error("auto-execute"));
        }
        self.status = ManifestStatus::AutoExecuted;
        self.approved_by = Some(AUTO_APPROVER.to_string());
        self.executed_at = Some(at);
        self.resolved_at = Some(at);
        Ok(())
    }

    /// `proposed → rejected`. Any other status is left alone; returns whether it changed.
    pub fn reject(&mut self, reason: Option<&str>, at: DateTime<Utc>) -> bool {
        if self.status != ManifestStatus::Proposed {
            return false;
        }
        self.status = ManifestStatus::Rejected;
        self.rejection_reason = reason.map(str::to_string);
        self.resolved_at = Some(at);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DreamTrigger {
    Idle,
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Dreaming,
    Completed,
    Interrupted,
}

/// One dream analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub memories_scanned: usize,
    pub clusters_found: usize,
    pub insights_generated: usize,
    pub proposals_created: usize,
    pub auto_executed: usize,
    pub trigger: DreamTrigger,
    #[serde(default)]
    pub fleet_idle_hours: Option<f64>,
    pub status: SessionStatus,
}

impl DreamSession {
    pub fn start(trigger: DreamTrigger, fleet_idle_hours: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            memories_scanned: 0,
            clusters_found: 0,
            insights_generated: 0,
            proposals_created: 0,
            auto_executed: 0,
            trigger,
            fleet_idle_hours,
            status: SessionStatus::Dreaming,
        }
    }
}

/// Externally produced analysis result. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub category: String,
    pub insight: String,
    pub confidence: f32,
    #[serde(default)]
    pub source_memory_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Weighted link between two memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub id: Uuid,
    pub memory_a: Uuid,
    pub memory_b: Uuid,
    /// Order-independent key of the pair; at most one link per key
    pub pair_key: String,
    pub strength: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Association {
    pub fn new(memory_a: Uuid, memory_b: Uuid, strength: f32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            memory_a,
            memory_b,
            pair_key: pair_key(memory_a, memory_b),
            strength: strength.clamp(0.0, 1.0),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Key identifying an unordered memory pair
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    if a <= b { format!("{a}:{b}") } else { format!("{b}:{a}") }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationAction {
    Create,
    Reinforce,
}

/// Audit trail of association strength changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationLogEntry {
    pub id: Uuid,
    pub association_id: Uuid,
    pub action: AssociationAction,
    pub old_strength: Option<f32>,
    pub new_strength: f32,
    #[serde(default)]
    pub manifestation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AssociationLogEntry {
    pub fn new(
        association_id: Uuid,
        action: AssociationAction,
        old_strength: Option<f32>,
        new_strength: f32,
        manifestation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            association_id,
            action,
            old_strength,
            new_strength,
            manifestation_id,
            created_at: Utc::now(),
        }
    }
}

/// Usage analytics row. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub endpoint: String,
    pub revenue: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Memories grouped around one shared keyword for dream analysis
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    pub keyword: String,
    /// Keywords shared by several members, `keyword` first
    pub keywords: Vec<String>,
    pub members: Vec<Memory>,
    /// Distinct agents of the members, in first-seen order
    pub agents: Vec<String>,
}

impl MemoryCluster {
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.id).collect()
    }
}
