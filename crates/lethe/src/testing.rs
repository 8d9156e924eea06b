//! Test utilities for lethe - fixtures and store doubles
//!
//! Seeding helpers write straight through the [`RecordStore`] contract so
//! they work against any backend. [`FlakyStore`] injects storage failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::dream::types::{
    Insight, ManifestCategory, Manifestation, MemoryCluster, ProposedAction,
};
use crate::error::{LetheError, Result};
use crate::lifecycle::naming::NameSource;
use crate::memory::types::{DecayEntry, Memory, MemoryKind};
use crate::storage::memory_store::InMemoryStore;
use crate::storage::record::{Collection, RecordFilter, RecordQuery, RecordStore, to_record};

/// Name source that always picks the same index
#[derive(Debug, Clone, Copy)]
pub struct FixedNameSource(pub usize);

impl NameSource for FixedNameSource {
    fn pick(&self, _upper: usize) -> usize {
        self.0
    }
}

/// Insert `memory` into the memories collection
pub async fn seed_memory(store: &dyn RecordStore, memory: &Memory) {
    store
        .insert(Collection::Memories, to_record(memory).expect("memory serializes"))
        .await
        .expect("seed memory");
}

/// Insert `memory` with a live decay entry at `score`
pub async fn seed_memory_with_score(store: &dyn RecordStore, memory: Memory, score: f32) {
    seed_memory(store, &memory).await;
    let entry = DecayEntry {
        decay_score: score,
        ..DecayEntry::fresh(memory.id)
    };
    store
        .upsert(
            Collection::DecayEntries,
            vec![to_record(&entry).expect("entry serializes")],
            "memory_id",
        )
        .await
        .expect("seed decay entry");
}

/// Insight record with a fresh id, created now
pub fn insight(category: &str, text: &str, confidence: f32) -> Insight {
    Insight {
        id: Uuid::new_v4().to_string(),
        category: category.to_string(),
        insight: text.to_string(),
        confidence,
        source_memory_ids: Vec::new(),
        created_at: Utc::now(),
    }
}

pub async fn seed_insight(store: &dyn RecordStore, category: &str, text: &str, confidence: f32) -> Insight {
    let insight = insight(category, text, confidence);
    store
        .insert(Collection::Insights, to_record(&insight).expect("insight serializes"))
        .await
        .expect("seed insight");
    insight
}

/// Analysis cluster around `keyword` with one member per `(agent, kind)`
pub fn cluster_of(keyword: &str, members: &[(&str, MemoryKind)]) -> MemoryCluster {
    let members: Vec<Memory> = members
        .iter()
        .enumerate()
        .map(|(i, (agent, kind))| Memory::new(*agent, kind.clone(), format!("{keyword} incident {i}")))
        .collect();
    let mut agents: Vec<String> = Vec::new();
    for memory in &members {
        if !agents.contains(&memory.agent_id) {
            agents.push(memory.agent_id.clone());
        }
    }
    MemoryCluster {
        keyword: keyword.to_string(),
        keywords: vec![keyword.to_string()],
        members,
        agents,
    }
}

/// `pattern` proposal carrying a `highlight_pattern` action
pub fn pattern_proposal(confidence: f32) -> Manifestation {
    Manifestation::new(
        ManifestCategory::Pattern,
        "Pattern: retries spike after deploys",
        "Retries spike in the hour after each deploy.",
        confidence,
        2,
        ProposedAction::HighlightPattern {
            insight_id: Uuid::new_v4().to_string(),
            pattern: "retries spike after deploys".to_string(),
        },
    )
}

/// Persist `manifestation` and hand it back
pub async fn seed_manifestation(store: &dyn RecordStore, manifestation: Manifestation) -> Manifestation {
    store
        .upsert(
            Collection::Manifestations,
            vec![to_record(&manifestation).expect("manifestation serializes")],
            "id",
        )
        .await
        .expect("seed manifestation");
    manifestation
}

/// Store wrapper that fails selected operations
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_queries: bool,
    fail_writes: bool,
    /// Collections whose every operation fails
    broken: HashSet<Collection>,
    /// Fail only the nth (1-based) write to this collection
    nth_write: Option<(Collection, usize)>,
    writes: AtomicUsize,
}

impl FlakyStore {
    /// Every operation fails
    pub fn failing() -> Self {
        Self {
            fail_queries: true,
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Reads fail, writes succeed
    pub fn failing_queries() -> Self {
        Self {
            fail_queries: true,
            ..Default::default()
        }
    }

    /// Writes fail, reads succeed
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Only operations on `collection` fail
    pub fn broken_collection(collection: Collection) -> Self {
        Self {
            broken: HashSet::from([collection]),
            ..Default::default()
        }
    }

    /// Only the `n`th write to `collection` fails; later writes succeed
    pub fn failing_nth_write(collection: Collection, n: usize) -> Self {
        Self {
            nth_write: Some((collection, n)),
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, collection: Collection, write: bool) -> Result<()> {
        let fails = self.broken.contains(&collection)
            || (write && self.fail_writes)
            || (!write && self.fail_queries);
        let nth = match self.nth_write {
            Some((target, n)) if write && target == collection => {
                self.writes.fetch_add(1, Ordering::SeqCst) + 1 == n
            }
            _ => false,
        };
        if fails || nth {
            return Err(LetheError::Storage(format!(
                "injected failure on table '{collection}'"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn query(&self, collection: Collection, query: RecordQuery) -> Result<Vec<Value>> {
        self.check(collection, false)?;
        self.inner.query(collection, query).await
    }

    async fn upsert(&self, collection: Collection, records: Vec<Value>, conflict_key: &str) -> Result<()> {
        self.check(collection, true)?;
        self.inner.upsert(collection, records, conflict_key).await
    }

    async fn insert(&self, collection: Collection, record: Value) -> Result<String> {
        self.check(collection, true)?;
        self.inner.insert(collection, record).await
    }

    async fn update(&self, collection: Collection, filter: RecordFilter, patch: Value) -> Result<usize> {
        self.check(collection, true)?;
        self.inner.update(collection, filter, patch).await
    }
}
