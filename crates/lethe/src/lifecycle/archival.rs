//! Decay pass and archival policy
//!
//! Rescores a bounded window of memories, flips the stale ones to archived
//! and reports the low-but-not-dead memories that are worth reforging.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::decay::{DecayConfig, age_hours, round_score};
use crate::memory::types::{ArchiveReason, DecayEntry, Memory};
use crate::storage::record::{
    Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch, to_record,
};

/// Thresholds and limits of the decay pass
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ArchivalConfig {
    /// Scores below this archive the memory (default: 0.15)
    #[serde(default = "default_archive_threshold")]
    pub archive_threshold: f32,
    /// Scores below this (and at or above the archive threshold) are reforge candidates (default: 0.4)
    #[serde(default = "default_candidate_ceiling")]
    pub candidate_ceiling: f32,
    /// Most recent memories scored per pass (default: 2000)
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// Decay entries written per upsert (default: 100)
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            archive_threshold: default_archive_threshold(),
            candidate_ceiling: default_candidate_ceiling(),
            scan_limit: default_scan_limit(),
            write_chunk_size: default_write_chunk_size(),
        }
    }
}

fn default_archive_threshold() -> f32 {
    0.15
}

fn default_candidate_ceiling() -> f32 {
    0.4
}

fn default_scan_limit() -> usize {
    2000
}

fn default_write_chunk_size() -> usize {
    100
}

/// Outcome of one decay pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecayPassReport {
    /// Memories scored
    pub scored: usize,
    /// Memories archived by this pass (previously archived ones excluded)
    pub archived: usize,
    /// Entries whose write failed
    pub failed_writes: usize,
    /// Memories eligible for reforging
    pub candidates: Vec<Uuid>,
}

/// Scores memories and applies the archival policy
pub struct DecayPass<'a> {
    store: &'a dyn RecordStore,
    decay: DecayConfig,
    config: ArchivalConfig,
}

impl<'a> DecayPass<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            decay: DecayConfig::default(),
            config: ArchivalConfig::default(),
        }
    }

    pub fn with_config(store: &'a dyn RecordStore, decay: DecayConfig, config: ArchivalConfig) -> Self {
        Self {
            store,
            decay,
            config,
        }
    }

    pub fn config(&self) -> &ArchivalConfig {
        &self.config
    }

    /// Rescore the most recent memories as of `now`.
    ///
    /// Never fails: store errors are logged and yield a partial or empty report.
    pub async fn run(&self, now: DateTime<Utc>) -> DecayPassReport {
        let memories: Vec<Memory> = match fetch(
            self.store,
            Collection::Memories,
            RecordQuery::new()
                .order_by("created_at", SortOrder::Desc)
                .limit(self.config.scan_limit),
        )
        .await
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(operation = "decay_pass", error = %e, "Failed to load memories, skipping pass");
                return DecayPassReport::default();
            }
        };

        if memories.is_empty() {
            return DecayPassReport::default();
        }

        let existing = match self.load_entries(&memories).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(operation = "decay_pass", error = %e, "Failed to load decay entries, skipping pass");
                return DecayPassReport::default();
            }
        };

        let mut report = DecayPassReport {
            scored: memories.len(),
            ..Default::default()
        };
        let mut updates = Vec::with_capacity(memories.len());

        for memory in &memories {
            let previous = existing
                .get(&memory.id)
                .cloned()
                .unwrap_or_else(|| DecayEntry::fresh(memory.id));
            let anchored = memory.is_anchored();

            let score = self.decay.score(
                age_hours(memory.created_at, now),
                previous.access_count,
                &memory.kind,
                anchored,
            );

            let should_archive =
                score < self.config.archive_threshold && !anchored && !previous.is_archived;

            let archive_reason = if should_archive {
                report.archived += 1;
                Some(ArchiveReason::Decayed { score }.to_string())
            } else {
                previous.archive_reason.clone()
            };

            // Candidates ignore archive status; the cluster builder filters it.
            if !anchored
                && score >= self.config.archive_threshold
                && score < self.config.candidate_ceiling
            {
                report.candidates.push(memory.id);
            }

            updates.push(DecayEntry {
                memory_id: memory.id,
                decay_score: round_score(score),
                access_count: previous.access_count,
                is_archived: previous.is_archived || should_archive,
                archive_reason,
                updated_at: now,
            });
        }

        for chunk in updates.chunks(self.config.write_chunk_size.max(1)) {
            let records = match chunk.iter().map(to_record).collect::<Result<Vec<_>>>() {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(operation = "decay_pass", error = %e, "Failed to encode decay entries");
                    report.failed_writes += chunk.len();
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .upsert(Collection::DecayEntries, records, "memory_id")
                .await
            {
                tracing::warn!(
                    operation = "decay_pass",
                    chunk_size = chunk.len(),
                    error = %e,
                    "Failed to write decay entries"
                );
                report.failed_writes += chunk.len();
            }
        }

        tracing::info!(
            scored = report.scored,
            archived = report.archived,
            candidates = report.candidates.len(),
            failed_writes = report.failed_writes,
            "Decay pass complete"
        );

        report
    }

    async fn load_entries(&self, memories: &[Memory]) -> Result<HashMap<Uuid, DecayEntry>> {
        let ids: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
        let entries: Vec<DecayEntry> = fetch(
            self.store,
            Collection::DecayEntries,
            RecordQuery::new().filter(RecordFilter::new().is_in("memory_id", ids)),
        )
        .await?;

        Ok(entries.into_iter().map(|e| (e.memory_id, e)).collect())
    }
}

/// Count one read of a memory, creating its decay entry when absent.
///
/// Returns the updated entry.
pub async fn record_access(store: &dyn RecordStore, memory_id: Uuid) -> Result<DecayEntry> {
    let existing: Vec<DecayEntry> = fetch(
        store,
        Collection::DecayEntries,
        RecordQuery::new()
            .filter(RecordFilter::new().eq("memory_id", memory_id.to_string()))
            .limit(1),
    )
    .await?;

    let mut entry = existing
        .into_iter()
        .next()
        .unwrap_or_else(|| DecayEntry::fresh(memory_id));
    entry.access_count = entry.access_count.saturating_add(1);
    entry.updated_at = Utc::now();

    store
        .upsert(Collection::DecayEntries, vec![to_record(&entry)?], "memory_id")
        .await?;

    tracing::debug!(memory_id = %memory_id, access_count = entry.access_count, "Recorded memory access");
    Ok(entry)
}
