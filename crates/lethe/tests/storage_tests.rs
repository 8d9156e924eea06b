//! Integration tests for the LanceDB record store
//!
//! Exercises the engine against a real database in a temporary directory,
//! including reopening it to check that lifecycle state persists.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::tempdir;
use uuid::Uuid;

use lethe::config::Config;
use lethe::dream::ManifestStatus;
use lethe::engine::Engine;
use lethe::lifecycle::record_access;
use lethe::memory::{DecayEntry, Memory, MemoryKind};
use lethe::storage::{Collection, LanceStore, RecordFilter, RecordQuery, RecordStore, fetch};
use lethe::testing::{pattern_proposal, seed_manifestation, seed_memory};

fn engine_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_path_buf();
    config
}

fn memory(content: &str, age_hours: i64) -> Memory {
    Memory::new("agent-ops", MemoryKind::Observation, content)
        .created_at(Utc::now() - Duration::hours(age_hours))
}

#[tokio::test]
async fn test_decay_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = engine_config(dir.path());

    let fresh = memory("Cache warmed before the traffic spike", 1);
    let stale = memory("Legacy queue drained during migration", 500);
    {
        let engine = Engine::open(config.clone()).await.unwrap();
        seed_memory(engine.store(), &fresh).await;
        seed_memory(engine.store(), &stale).await;

        let report = engine.decay_pass().run(Utc::now()).await;
        assert_eq!(report.scored, 2);
        assert_eq!(report.archived, 1);
        assert_eq!(report.failed_writes, 0);
    }

    let store = LanceStore::open(&config.storage.database_path()).await.unwrap();
    let entries: Vec<DecayEntry> = fetch(&store, Collection::DecayEntries, RecordQuery::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let stale_entry = entries.iter().find(|e| e.memory_id == stale.id).unwrap();
    assert!(stale_entry.is_archived);
    let fresh_entry = entries.iter().find(|e| e.memory_id == fresh.id).unwrap();
    assert!(!fresh_entry.is_archived);
    assert!(fresh_entry.decay_score > 0.9 * 0.9);
}

#[tokio::test]
async fn test_access_count_upserts_single_entry() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(engine_config(dir.path())).await.unwrap();

    let m = memory("Operator pinned the rollback procedure", 3);
    seed_memory(engine.store(), &m).await;

    record_access(engine.store(), m.id).await.unwrap();
    let entry = record_access(engine.store(), m.id).await.unwrap();
    assert_eq!(entry.access_count, 2);

    let entries: Vec<DecayEntry> = fetch(
        engine.store(),
        Collection::DecayEntries,
        RecordQuery::new().filter(RecordFilter::new().eq("memory_id", m.id.to_string())),
    )
    .await
    .unwrap();
    assert_eq!(entries.len(), 1);

    engine.decay_pass().run(Utc::now()).await;
    let entries: Vec<DecayEntry> = fetch(engine.store(), Collection::DecayEntries, RecordQuery::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].access_count, 2);
}

#[tokio::test]
async fn test_manifest_lifecycle_on_disk() {
    let dir = tempdir().unwrap();
    let config = engine_config(dir.path());
    let engine = Engine::open(config.clone()).await.unwrap();

    let proposal = seed_manifestation(engine.store(), pattern_proposal(0.6)).await;
    let approved = engine
        .executor()
        .approve(proposal.id, "operator")
        .await
        .unwrap();
    assert_eq!(approved.status, ManifestStatus::Executed);
    drop(engine);

    let store: Arc<dyn RecordStore> =
        Arc::new(LanceStore::open(&config.storage.database_path()).await.unwrap());
    let engine = Engine::new(store, config);
    let stored = engine.executor().get(proposal.id).await.unwrap();
    assert_eq!(stored.status, ManifestStatus::Executed);
    assert_eq!(stored.approved_by.as_deref(), Some("operator"));
    assert!(stored.executed_at.is_some());

    assert!(engine.executor().get(Uuid::new_v4()).await.is_err());
}
