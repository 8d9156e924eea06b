//! Engine facade
//!
//! Owns the store and collaborators and hands out the borrowed pass
//! components. Every pass result is folded into a caller-owned
//! [`LifecycleStats`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::dream::{DreamCycle, DreamReport, DreamTrigger, ManifestExecutor, SessionStatus};
use crate::error::{LetheError, Result};
use crate::lifecycle::{
    AutoReforgeReport, ClusterBuilder, DecayPass, DecayPassReport, NameSource, RandomNames,
    Reforger,
};
use crate::memory::{KeywordExtractor, StopwordExtractor};
use crate::storage::{LanceStore, RecordStore};

/// Running totals across passes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleStats {
    pub maintenance_runs: usize,
    pub dream_runs: usize,
    pub interrupted_dreams: usize,
    pub memories_scored: usize,
    pub memories_archived: usize,
    pub failed_writes: usize,
    pub crystals_reforged: usize,
    pub memories_reforged: usize,
    pub reforge_failures: usize,
    pub proposals_created: usize,
    pub proposals_auto_executed: usize,
    pub proposals_expired: usize,
}

impl LifecycleStats {
    pub fn record_decay(&mut self, report: &DecayPassReport) {
        self.memories_scored += report.scored;
        self.memories_archived += report.archived;
        self.failed_writes += report.failed_writes;
    }

    pub fn record_reforge(&mut self, report: &AutoReforgeReport) {
        self.crystals_reforged += report.reforged.len();
        self.memories_reforged += report.reforged.iter().map(|r| r.source_count).sum::<usize>();
        self.reforge_failures += report.failures;
    }

    pub fn record_expiry(&mut self, expired: usize) {
        self.proposals_expired += expired;
    }

    pub fn record_dream(&mut self, report: &DreamReport) {
        self.dream_runs += 1;
        if report.status == SessionStatus::Interrupted {
            self.interrupted_dreams += 1;
        }
        self.proposals_created += report.proposals.len();
        self.proposals_auto_executed += report.auto_executed.len();
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub decay: DecayPassReport,
    /// `None` when auto-reforge is disabled or failed
    pub reforge: Option<AutoReforgeReport>,
    pub expired: usize,
}

pub struct Engine {
    store: Arc<dyn RecordStore>,
    extractor: Box<dyn KeywordExtractor>,
    names: Box<dyn NameSource>,
    config: Config,
}

impl Engine {
    /// Engine with the stopword extractor and random names
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Self {
        Self::with_components(
            store,
            Box::new(StopwordExtractor::default()),
            Box::new(RandomNames),
            config,
        )
    }

    pub fn with_components(
        store: Arc<dyn RecordStore>,
        extractor: Box<dyn KeywordExtractor>,
        names: Box<dyn NameSource>,
        config: Config,
    ) -> Self {
        Self {
            store,
            extractor,
            names,
            config,
        }
    }

    /// Open the LanceDB store under the configured data directory
    pub async fn open(config: Config) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        tracing::info!("Initializing storage at: {}", data_dir.display());
        std::fs::create_dir_all(data_dir).map_err(|e| {
            LetheError::Storage(format!(
                "Failed to create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let store = LanceStore::open(&config.storage.database_path()).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn decay_pass(&self) -> DecayPass<'_> {
        DecayPass::with_config(self.store(), self.config.decay, self.config.archival)
    }

    pub fn cluster_builder(&self) -> ClusterBuilder<'_> {
        ClusterBuilder::with_config(self.store(), self.extractor.as_ref(), self.config.reforge.clone())
    }

    pub fn reforger(&self) -> Reforger<'_> {
        Reforger::with_config(
            self.store(),
            self.extractor.as_ref(),
            self.names.as_ref(),
            self.config.reforge.clone(),
        )
    }

    pub fn executor(&self) -> ManifestExecutor<'_> {
        ManifestExecutor::with_config(self.store(), self.config.dream.clone())
    }

    pub fn dream_cycle(&self) -> DreamCycle<'_> {
        DreamCycle::with_config(self.store(), self.extractor.as_ref(), self.config.dream.clone())
    }

    /// Decay pass, then auto-reforge, then manifestation expiry.
    ///
    /// Each step runs even if an earlier one degraded.
    pub async fn maintenance(&self, now: DateTime<Utc>, stats: &mut LifecycleStats) -> MaintenanceReport {
        let decay = self.decay_pass().run(now).await;
        stats.record_decay(&decay);

        let reforge = if self.config.scheduler.auto_reforge {
            match self.reforger().auto_reforge().await {
                Ok(report) => {
                    stats.record_reforge(&report);
                    Some(report)
                }
                Err(e) => {
                    tracing::warn!(operation = "auto_reforge", error = %e, "Auto-reforge skipped");
                    None
                }
            }
        } else {
            None
        };

        let expired = match self.executor().expire_stale(now).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(operation = "expire_manifestations", error = %e, "Expiry sweep skipped");
                0
            }
        };
        stats.record_expiry(expired);
        stats.maintenance_runs += 1;

        tracing::info!(
            scored = decay.scored,
            archived = decay.archived,
            candidates = decay.candidates.len(),
            reforged = reforge.as_ref().map_or(0, |r| r.reforged.len()),
            expired,
            "Maintenance pass complete"
        );

        MaintenanceReport {
            decay,
            reforge,
            expired,
        }
    }

    /// One dream session
    pub async fn dream(
        &self,
        trigger: DreamTrigger,
        fleet_idle_hours: Option<f64>,
        stats: &mut LifecycleStats,
    ) -> Result<DreamReport> {
        let report = self.dream_cycle().run(trigger, fleet_idle_hours).await?;
        stats.record_dream(&report);
        Ok(report)
    }
}
