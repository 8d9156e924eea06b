//! Reforge compressor
//!
//! Compresses a group of related memories into one durable summary, mints a
//! crystal for it and archives the sources. Every step after the source fetch
//! is independent and best-effort except the final reforged-crystal write.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::ReforgeConfig;
use crate::lifecycle::cluster::ClusterBuilder;
use crate::lifecycle::crystal::{Crystal, ReforgedCrystal, class_for_kind};
use crate::lifecycle::naming::{NameSource, legendary_name};
use crate::memory::keywords::KeywordExtractor;
use crate::memory::types::{ArchiveReason, DecayEntry, Memory, MemoryKind};
use crate::storage::record::{
    Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch, to_record,
};

/// `created_by` of reforges started by the maintenance loop
pub const AUTO_REFORGE_ACTOR: &str = "system:auto-reforge";

const MAX_KEYWORDS: usize = 10;
const MAX_SNIPPETS: usize = 5;
const SNIPPET_CHARS: usize = 100;

/// Outcome of one auto-reforge invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoReforgeReport {
    /// Targets returned by the cluster builder
    pub targets_found: usize,
    /// Targets large enough to reforge automatically
    pub eligible: usize,
    pub reforged: Vec<ReforgedCrystal>,
    pub failures: usize,
}

pub struct Reforger<'a> {
    store: &'a dyn RecordStore,
    extractor: &'a dyn KeywordExtractor,
    names: &'a dyn NameSource,
    config: ReforgeConfig,
}

impl<'a> Reforger<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        extractor: &'a dyn KeywordExtractor,
        names: &'a dyn NameSource,
    ) -> Self {
        Self::with_config(store, extractor, names, ReforgeConfig::default())
    }

    pub fn with_config(
        store: &'a dyn RecordStore,
        extractor: &'a dyn KeywordExtractor,
        names: &'a dyn NameSource,
        config: ReforgeConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            names,
            config,
        }
    }

    pub fn config(&self) -> &ReforgeConfig {
        &self.config
    }

    /// Compress `memory_ids` into one reforged crystal.
    ///
    /// Returns `None` (writing nothing) when fewer than the minimum number of
    /// sources resolve.
    pub async fn reforge(&self, memory_ids: &[Uuid], created_by: &str) -> Result<Option<ReforgedCrystal>> {
        if memory_ids.len() < self.config.min_sources {
            tracing::debug!(requested = memory_ids.len(), "Too few memories to reforge");
            return Ok(None);
        }

        let ids: Vec<String> = memory_ids.iter().map(Uuid::to_string).collect();
        let memories: Vec<Memory> = fetch(
            self.store,
            Collection::Memories,
            RecordQuery::new()
                .filter(RecordFilter::new().is_in("id", ids))
                .order_by("created_at", SortOrder::Asc),
        )
        .await?;

        if memories.len() < self.config.min_sources {
            tracing::debug!(
                requested = memory_ids.len(),
                resolved = memories.len(),
                "Too few memories resolved to reforge"
            );
            return Ok(None);
        }

        let keywords = self.aggregate_keywords(&memories);
        let summary = self.compose_summary(&memories, &keywords);
        let name = legendary_name(self.names, keywords.first().map(String::as_str));
        let class = class_for_kind(&dominant_kind(&memories));

        let crystal = Crystal::reforged(&name, class, &summary, keywords.clone());
        let crystal_id = match self.store.insert(Collection::Crystals, to_record(&crystal)?).await {
            Ok(_) => Some(crystal.id),
            Err(e) => {
                tracing::warn!(operation = "reforge", crystal = %name, error = %e, "Failed to create crystal");
                None
            }
        };

        let archived = self.archive_sources(&memories, &name).await;

        let source_memory_ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();
        let reforged = ReforgedCrystal {
            id: Uuid::new_v4(),
            compression_ratio: 1.0 / source_memory_ids.len() as f32,
            source_count: source_memory_ids.len(),
            source_memory_ids,
            crystal_id,
            legendary_name: name,
            summary,
            keywords,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };

        let event = json!({
            "event": "reforge",
            "detail": {
                "reforged_id": reforged.id,
                "crystal_id": reforged.crystal_id,
                "legendary_name": reforged.legendary_name,
                "source_count": reforged.source_count,
                "archived": archived,
                "created_by": created_by,
            },
            "created_at": reforged.created_at,
        });
        if let Err(e) = self.store.insert(Collection::LifecycleEvents, event).await {
            tracing::warn!(operation = "reforge", error = %e, "Failed to record lifecycle event");
        }

        self.store
            .insert(Collection::ReforgedCrystals, to_record(&reforged)?)
            .await?;

        tracing::info!(
            name = %reforged.legendary_name,
            sources = reforged.source_count,
            archived,
            created_by,
            "Reforged memories"
        );

        Ok(Some(reforged))
    }

    /// Reforge the largest targets found by the cluster builder
    pub async fn auto_reforge(&self) -> Result<AutoReforgeReport> {
        let builder = ClusterBuilder::with_config(self.store, self.extractor, self.config.clone());
        let targets = builder.build().await?;

        let mut report = AutoReforgeReport {
            targets_found: targets.len(),
            ..Default::default()
        };

        for target in targets
            .iter()
            .filter(|t| t.member_count >= self.config.auto_min_members)
        {
            if report.reforged.len() >= self.config.auto_max_per_run {
                break;
            }
            report.eligible += 1;

            match self.reforge(&target.memory_ids, AUTO_REFORGE_ACTOR).await {
                Ok(Some(reforged)) => report.reforged.push(reforged),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(operation = "auto_reforge", members = target.member_count, error = %e, "Reforge failed");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Most frequent keywords across the sources, ties broken by first appearance
    fn aggregate_keywords(&self, memories: &[Memory]) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut order = 0;
        for memory in memories {
            for keyword in self.extractor.extract(&memory.content) {
                let slot = counts.entry(keyword).or_insert_with(|| {
                    order += 1;
                    (0, order)
                });
                slot.0 += 1;
            }
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(keyword, (count, first))| (keyword, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(keyword, _, _)| keyword)
            .collect()
    }

    fn compose_summary(&self, memories: &[Memory], keywords: &[String]) -> String {
        let mut lines = Vec::new();

        let (start, end) = match (memories.first(), memories.last()) {
            (Some(first), Some(last)) => (first.created_at, last.created_at),
            _ => return String::new(),
        };
        lines.push(format!(
            "Reforged from {} memories ({} → {})",
            memories.len(),
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        ));

        let kinds = kind_counts(memories)
            .into_iter()
            .map(|(kind, count)| format!("{kind} ×{count}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Kinds: {kinds}"));

        let mut agents: Vec<&str> = Vec::new();
        for memory in memories {
            let agent = memory.agent_id.as_str();
            if agent != self.config.shared_agent && !agents.contains(&agent) {
                agents.push(agent);
            }
        }
        if !agents.is_empty() {
            lines.push(format!("Agents: {}", agents.join(", ")));
        }

        if !keywords.is_empty() {
            lines.push(format!("Keywords: {}", keywords.join(", ")));
        }

        for memory in memories.iter().take(MAX_SNIPPETS) {
            lines.push(format!("- {}", snippet(&memory.content)));
        }
        if memories.len() > MAX_SNIPPETS {
            lines.push(format!("+{} more", memories.len() - MAX_SNIPPETS));
        }

        lines.join("\n")
    }

    /// Archive every source, preserving access counts. Returns how many succeeded.
    async fn archive_sources(&self, memories: &[Memory], artifact: &str) -> usize {
        let reason = ArchiveReason::Reforged {
            artifact: artifact.to_string(),
        }
        .to_string();

        let results = join_all(
            memories
                .iter()
                .map(|memory| self.archive_source(memory.id, reason.clone())),
        )
        .await;

        let mut archived = 0;
        for (memory, result) in memories.iter().zip(results) {
            match result {
                Ok(()) => archived += 1,
                Err(e) => {
                    tracing::warn!(operation = "reforge", memory_id = %memory.id, error = %e, "Failed to archive source");
                }
            }
        }
        archived
    }

    async fn archive_source(&self, memory_id: Uuid, reason: String) -> Result<()> {
        let now = Utc::now();
        let updated = self
            .store
            .update(
                Collection::DecayEntries,
                RecordFilter::new().eq("memory_id", memory_id.to_string()),
                json!({
                    "decay_score": 0.0,
                    "is_archived": true,
                    "archive_reason": reason,
                    "updated_at": now,
                }),
            )
            .await?;

        if updated == 0 {
            let entry = DecayEntry {
                decay_score: 0.0,
                is_archived: true,
                archive_reason: Some(reason),
                updated_at: now,
                ..DecayEntry::fresh(memory_id)
            };
            self.store
                .upsert(Collection::DecayEntries, vec![to_record(&entry)?], "memory_id")
                .await?;
        }

        Ok(())
    }
}

/// Per-kind counts, most common first, ties in kind order
fn kind_counts(memories: &[Memory]) -> Vec<(MemoryKind, usize)> {
    let mut counts: BTreeMap<MemoryKind, usize> = BTreeMap::new();
    for memory in memories {
        *counts.entry(memory.kind.clone()).or_default() += 1;
    }
    let mut counts: Vec<(MemoryKind, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

fn dominant_kind(memories: &[Memory]) -> MemoryKind {
    kind_counts(memories)
        .into_iter()
        .next()
        .map(|(kind, _)| kind)
        .unwrap_or(MemoryKind::Note)
}

fn snippet(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > SNIPPET_CHARS {
        let truncated: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{truncated}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::keywords::StopwordExtractor;
    use crate::storage::InMemoryStore;
    use crate::testing::{FixedNameSource, seed_memory, seed_memory_with_score};
    use chrono::Duration;

    fn error_memories(count: usize) -> Vec<Memory> {
        let base = Utc::now() - Duration::hours(200);
        (0..count)
            .map(|i| {
                Memory::new(
                    if i % 2 == 0 { "agent-a" } else { "shared" },
                    MemoryKind::Error,
                    format!("payment gateway timeout while charging customer {i}"),
                )
                .created_at(base + Duration::minutes(i as i64))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reforge_fewer_than_five_writes_nothing() {
        let store = InMemoryStore::new();
        let memories = error_memories(4);
        for memory in &memories {
            seed_memory(&store, memory).await;
        }
        let ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);

        assert!(reforger.reforge(&ids, "operator").await.unwrap().is_none());
        assert_eq!(store.len(Collection::Crystals), 0);
        assert_eq!(store.len(Collection::ReforgedCrystals), 0);
    }

    #[tokio::test]
    async fn test_reforge_unresolved_ids_writes_nothing() {
        let store = InMemoryStore::new();
        let memories = error_memories(4);
        for memory in &memories {
            seed_memory(&store, memory).await;
        }
        let mut ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();
        ids.push(Uuid::new_v4());

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);

        assert!(reforger.reforge(&ids, "operator").await.unwrap().is_none());
        assert_eq!(store.len(Collection::DecayEntries), 0);
    }

    #[tokio::test]
    async fn test_reforge_exactly_five() {
        let store = InMemoryStore::new();
        let memories = error_memories(5);
        for memory in &memories {
            seed_memory(&store, memory).await;
        }
        let ids: Vec<Uuid> = memories.iter().rev().map(|m| m.id).collect();

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);

        let reforged = reforger.reforge(&ids, "operator").await.unwrap().unwrap();
        assert_eq!(reforged.source_count, 5);
        assert!((reforged.compression_ratio - 0.2).abs() < 1e-6);
        // Sources come back in creation order
        let expected: Vec<Uuid> = memories.iter().map(|m| m.id).collect();
        assert_eq!(reforged.source_memory_ids, expected);
        assert_eq!(reforged.legendary_name, "Ancient Payment Codex");
        assert_eq!(reforged.created_by, "operator");
        assert!(reforged.crystal_id.is_some());

        let crystals: Vec<Crystal> = fetch(&store, Collection::Crystals, RecordQuery::new())
            .await
            .unwrap();
        assert_eq!(crystals.len(), 1);
        assert_eq!(crystals[0].class, "lesson");
        assert_eq!(crystals[0].star, 1);
        assert_eq!(store.len(Collection::LifecycleEvents), 1);
    }

    #[tokio::test]
    async fn test_summary_layout() {
        let store = InMemoryStore::new();
        let memories = error_memories(7);
        for memory in &memories {
            seed_memory(&store, memory).await;
        }
        let ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);
        let reforged = reforger.reforge(&ids, "operator").await.unwrap().unwrap();

        let lines: Vec<&str> = reforged.summary.lines().collect();
        assert!(lines[0].starts_with("Reforged from 7 memories ("));
        assert_eq!(lines[1], "Kinds: error ×7");
        assert_eq!(lines[2], "Agents: agent-a");
        assert!(lines[3].starts_with("Keywords: payment, gateway, timeout"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("- ")).count(), 5);
        assert_eq!(*lines.last().unwrap(), "+2 more");
        assert!(reforged.keywords.len() <= 10);
    }

    #[tokio::test]
    async fn test_sources_archived_with_access_counts_kept() {
        let store = InMemoryStore::new();
        let memories = error_memories(6);
        for memory in &memories {
            seed_memory_with_score(&store, memory.clone(), 0.3).await;
        }
        crate::lifecycle::record_access(&store, memories[0].id).await.unwrap();
        let ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(2);
        let reforger = Reforger::new(&store, &extractor, &names);
        let reforged = reforger.reforge(&ids, "operator").await.unwrap().unwrap();
        assert!((reforged.compression_ratio - 1.0 / 6.0).abs() < 1e-6);

        let entries: Vec<DecayEntry> = fetch(&store, Collection::DecayEntries, RecordQuery::new())
            .await
            .unwrap();
        assert_eq!(entries.len(), 6);
        for entry in &entries {
            assert!(entry.is_archived);
            assert_eq!(entry.decay_score, 0.0);
            assert_eq!(
                entry.archive_reason.as_deref(),
                Some(format!("Reforged into {}", reforged.legendary_name).as_str())
            );
        }
        let touched = entries.iter().find(|e| e.memory_id == memories[0].id).unwrap();
        assert_eq!(touched.access_count, 1);
    }

    #[tokio::test]
    async fn test_auto_reforge_needs_large_groups() {
        let store = InMemoryStore::new();
        for memory in error_memories(6) {
            seed_memory_with_score(&store, memory, 0.2).await;
        }

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);
        let report = reforger.auto_reforge().await.unwrap();

        assert_eq!(report.targets_found, 1);
        assert_eq!(report.eligible, 0);
        assert!(report.reforged.is_empty());
    }

    #[tokio::test]
    async fn test_auto_reforge_reforges_and_archives() {
        let store = InMemoryStore::new();
        for memory in error_memories(9) {
            seed_memory_with_score(&store, memory, 0.2).await;
        }

        let extractor = StopwordExtractor::default();
        let names = FixedNameSource(0);
        let reforger = Reforger::new(&store, &extractor, &names);
        let report = reforger.auto_reforge().await.unwrap();

        assert_eq!(report.reforged.len(), 1);
        assert_eq!(report.reforged[0].created_by, AUTO_REFORGE_ACTOR);
        assert_eq!(report.reforged[0].source_count, 9);

        // Archived sources are no longer candidates
        let again = reforger.auto_reforge().await.unwrap();
        assert_eq!(again.targets_found, 0);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "word ".repeat(40);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
        assert_eq!(snippet("  short\n note "), "short note");
    }
}
