//! In-memory record store
//!
//! Ephemeral [`RecordStore`] backed by a `HashMap<Collection, Vec<record>>`.
//! Records keep insertion order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{LetheError, Result};
use crate::storage::record::{
    Collection, RecordFilter, RecordQuery, RecordStore, ensure_id, key_of, merge_patch,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Collection, Vec<Value>>>> {
        self.collections
            .lock()
            .map_err(|_| LetheError::Storage("In-memory store lock poisoned".to_string()))
    }

    /// Number of records currently held in `collection`
    pub fn len(&self, collection: Collection) -> usize {
        self.lock()
            .map(|c| c.get(&collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn query(&self, collection: Collection, query: RecordQuery) -> Result<Vec<Value>> {
        let collections = self.lock()?;
        let records = collections.get(&collection).cloned().unwrap_or_default();
        Ok(query.apply(records))
    }

    async fn upsert(&self, collection: Collection, records: Vec<Value>, conflict_key: &str) -> Result<()> {
        let mut collections = self.lock()?;
        let rows = collections.entry(collection).or_default();

        for record in records {
            let key = key_of(&record, conflict_key).ok_or_else(|| {
                LetheError::Storage(format!(
                    "Record for {collection} is missing conflict key '{conflict_key}'"
                ))
            })?;

            match rows
                .iter_mut()
                .find(|row| key_of(row, conflict_key).as_deref() == Some(key.as_str()))
            {
                Some(existing) => *existing = record,
                None => rows.push(record),
            }
        }

        Ok(())
    }

    async fn insert(&self, collection: Collection, mut record: Value) -> Result<String> {
        let id = ensure_id(&mut record)?;
        let mut collections = self.lock()?;
        collections.entry(collection).or_default().push(record);
        Ok(id)
    }

    async fn update(&self, collection: Collection, filter: RecordFilter, patch: Value) -> Result<usize> {
        let patch = patch
            .as_object()
            .ok_or_else(|| LetheError::Storage("Update patch must be a JSON object".to_string()))?;

        let mut collections = self.lock()?;
        let Some(rows) = collections.get_mut(&collection) else {
            return Ok(0);
        };

        let mut updated = 0;
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            merge_patch(row, patch);
            updated += 1;
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::SortOrder;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store = InMemoryStore::new();
        let id = store
            .insert(Collection::LifecycleEvents, json!({"event": "reforge"}))
            .await
            .unwrap();

        let rows = store
            .query(Collection::LifecycleEvents, RecordQuery::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(id));
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_conflict_key() {
        let store = InMemoryStore::new();
        store
            .upsert(
                Collection::DecayEntries,
                vec![
                    json!({"memory_id": "m1", "decay_score": 0.9}),
                    json!({"memory_id": "m2", "decay_score": 0.8}),
                ],
                "memory_id",
            )
            .await
            .unwrap();
        store
            .upsert(
                Collection::DecayEntries,
                vec![json!({"memory_id": "m1", "decay_score": 0.1})],
                "memory_id",
            )
            .await
            .unwrap();

        assert_eq!(store.len(Collection::DecayEntries), 2);
        let rows = store
            .query(
                Collection::DecayEntries,
                RecordQuery::new().filter(RecordFilter::new().eq("memory_id", "m1")),
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["decay_score"], json!(0.1));
    }

    #[tokio::test]
    async fn test_upsert_requires_conflict_key() {
        let store = InMemoryStore::new();
        let result = store
            .upsert(Collection::Crystals, vec![json!({"name": "x"})], "id")
            .await;
        assert!(matches!(result, Err(LetheError::Storage(_))));
    }

    #[tokio::test]
    async fn test_update_merges_matching_rows() {
        let store = InMemoryStore::new();
        for (id, status) in [("a", "proposed"), ("b", "approved"), ("c", "proposed")] {
            store
                .insert(Collection::Manifestations, json!({"id": id, "status": status, "title": id}))
                .await
                .unwrap();
        }

        let updated = store
            .update(
                Collection::Manifestations,
                RecordFilter::new().eq("status", "proposed"),
                json!({"status": "expired"}),
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let rows = store
            .query(
                Collection::Manifestations,
                RecordQuery::new().order_by("id", SortOrder::Asc),
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "expired");
        assert_eq!(rows[0]["title"], "a");
        assert_eq!(rows[1]["status"], "approved");
        assert_eq!(rows[2]["status"], "expired");
    }

    #[tokio::test]
    async fn test_update_on_empty_collection() {
        let store = InMemoryStore::new();
        let updated = store
            .update(Collection::Associations, RecordFilter::new(), json!({"strength": 1.0}))
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn test_update_rejects_non_object_patch() {
        let store = InMemoryStore::new();
        let result = store
            .update(Collection::Associations, RecordFilter::new(), json!(1))
            .await;
        assert!(result.is_err());
    }
}
