//! Memory lifecycle: archival, clustering and reforging
//!
//! The decay pass archives stale memories and surfaces candidates; the
//! cluster builder groups candidates by keyword overlap; the reforger
//! compresses qualifying groups into crystals.

pub mod archival;
pub mod cluster;
pub mod crystal;
pub mod naming;
pub mod reforge;

use serde::Deserialize;

pub use archival::{ArchivalConfig, DecayPass, DecayPassReport, record_access};
pub use cluster::{ClusterBuilder, ReforgeTarget};
pub use crystal::{Crystal, ReforgedCrystal, class_for_kind};
pub use naming::{NameSource, RandomNames, legendary_name};
pub use reforge::{AUTO_REFORGE_ACTOR, AutoReforgeReport, Reforger};

/// Clustering and reforge parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReforgeConfig {
    /// Minimum sources for a reforge and minimum cluster size (default: 5)
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    /// Lowest decay score considered for clustering (default: 0.05)
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: f32,
    /// Decay scores must be below this to cluster (default: 0.4)
    #[serde(default = "default_candidate_ceiling")]
    pub candidate_ceiling: f32,
    /// Lowest-scoring entries loaded per clustering run (default: 200)
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Shared keywords needed to join a seed's group (default: 2)
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,
    /// Unassigned candidates scanned after each seed (default: 8)
    #[serde(default = "default_scan_window")]
    pub scan_window: usize,
    /// Members needed before a group is reforged automatically (default: 8)
    #[serde(default = "default_auto_min_members")]
    pub auto_min_members: usize,
    /// Automatic reforges per invocation (default: 2)
    #[serde(default = "default_auto_max_per_run")]
    pub auto_max_per_run: usize,
    /// Agent id used for fleet-wide memories, left out of agent lists (default: "shared")
    #[serde(default = "default_shared_agent")]
    pub shared_agent: String,
}

impl Default for ReforgeConfig {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            candidate_floor: default_candidate_floor(),
            candidate_ceiling: default_candidate_ceiling(),
            candidate_limit: default_candidate_limit(),
            min_overlap: default_min_overlap(),
            scan_window: default_scan_window(),
            auto_min_members: default_auto_min_members(),
            auto_max_per_run: default_auto_max_per_run(),
            shared_agent: default_shared_agent(),
        }
    }
}

fn default_min_sources() -> usize {
    5
}

fn default_candidate_floor() -> f32 {
    0.05
}

fn default_candidate_ceiling() -> f32 {
    0.4
}

fn default_candidate_limit() -> usize {
    200
}

fn default_min_overlap() -> usize {
    2
}

fn default_scan_window() -> usize {
    8
}

fn default_auto_min_members() -> usize {
    8
}

fn default_auto_max_per_run() -> usize {
    2
}

fn default_shared_agent() -> String {
    "shared".to_string()
}
