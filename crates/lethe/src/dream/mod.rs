//! Dream analysis
//!
//! Periodic offline analysis that clusters live memories, turns patterns
//! into manifestations and auto-executes the low-risk ones.

pub mod cycle;
pub mod executor;
pub mod generator;
pub mod types;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::{LetheError, Result};

pub use cycle::{DreamCycle, DreamReport, build_analysis_clusters};
pub use executor::{AutoExecuteReport, ManifestExecutor};
pub use generator::ProposalGenerator;
pub use types::{
    AUTO_APPROVER, Association, AssociationAction, AssociationLogEntry, DreamSession,
    DreamTrigger, Insight, ManifestCategory, ManifestStatus, Manifestation, MemoryCluster,
    MemoryPair, PriceDirection, ProposedAction, SessionStatus, UsageRow, Urgency, WeakLink,
    pair_key,
};

/// Dream cycle and manifestation parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DreamConfig {
    /// Proposals older than this expire (default: 72)
    #[serde(default = "default_manifest_ttl_hours")]
    pub manifest_ttl_hours: i64,
    /// Confidence needed for auto-execution (default: 0.8)
    #[serde(default = "default_auto_execute_min_confidence")]
    pub auto_execute_min_confidence: f32,
    /// Most recent memories scanned per session (default: 500)
    #[serde(default = "default_memory_scan_limit")]
    pub memory_scan_limit: usize,
    /// Members needed for an analysis cluster (default: 3)
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Insights newer than this are considered (default: 24)
    #[serde(default = "default_insight_lookback_hours")]
    pub insight_lookback_hours: i64,
    /// Cluster members sampled for association analysis (default: 8)
    #[serde(default = "default_association_sample")]
    pub association_sample: usize,
    /// Unfused crystals considered for fusion (default: 50)
    #[serde(default = "default_fusion_scan_limit")]
    pub fusion_scan_limit: usize,
    /// Agent id of fleet-wide memories (default: "shared")
    #[serde(default = "default_shared_agent")]
    pub shared_agent: String,
    /// Agents that never count toward meeting proposals
    #[serde(default = "default_infrastructure_agents")]
    pub infrastructure_agents: Vec<String>,
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            manifest_ttl_hours: default_manifest_ttl_hours(),
            auto_execute_min_confidence: default_auto_execute_min_confidence(),
            memory_scan_limit: default_memory_scan_limit(),
            min_cluster_size: default_min_cluster_size(),
            insight_lookback_hours: default_insight_lookback_hours(),
            association_sample: default_association_sample(),
            fusion_scan_limit: default_fusion_scan_limit(),
            shared_agent: default_shared_agent(),
            infrastructure_agents: default_infrastructure_agents(),
        }
    }
}

/// `now` minus `hours`, or a config error naming `setting` when out of range
pub(crate) fn hours_before(now: DateTime<Utc>, hours: i64, setting: &str) -> Result<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| LetheError::Config(format!("{setting} = {hours} is out of range")))
}

fn default_manifest_ttl_hours() -> i64 {
    72
}

fn default_auto_execute_min_confidence() -> f32 {
    0.8
}

fn default_memory_scan_limit() -> usize {
    500
}

fn default_min_cluster_size() -> usize {
    3
}

fn default_insight_lookback_hours() -> i64 {
    24
}

fn default_association_sample() -> usize {
    8
}

fn default_fusion_scan_limit() -> usize {
    50
}

fn default_shared_agent() -> String {
    "shared".to_string()
}

fn default_infrastructure_agents() -> Vec<String> {
    vec![
        crate::memory::types::ANCHOR_SOURCE.to_string(),
        "scheduler".to_string(),
        "monitor".to_string(),
    ]
}
