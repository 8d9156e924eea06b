use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde_json::Value;

use crate::error::{LetheError, Result};
use crate::storage::record::{
    Collection, Condition, RecordFilter, RecordQuery, RecordStore, ensure_id, key_of, merge_patch,
};

/// Durable [`RecordStore`] on LanceDB.
///
/// Each collection is its own table of `{id, body, updated_at}` rows where
/// `id` is the collection's key field and `body` the JSON document.
pub struct LanceStore {
    connection: Connection,
    tables: HashMap<Collection, Table>,
}

impl LanceStore {
    pub async fn connect(path: &Path) -> Result<Self> {
        let uri = path
            .to_str()
            .ok_or_else(|| LetheError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            tables: HashMap::new(),
        })
    }

    /// Connect and make every collection table available
    pub async fn open(path: &Path) -> Result<Self> {
        let mut store = Self::connect(path).await?;
        store.init_tables().await?;
        Ok(store)
    }

    /// Open existing collection tables, creating the missing ones
    pub async fn init_tables(&mut self) -> Result<()> {
        for collection in Collection::ALL {
            if self.table_exists(collection.name()).await? {
                tracing::debug!("Opening existing {} table", collection);
                self.open_table(collection).await?;
            } else {
                tracing::info!("Creating {} table", collection);
                self.create_table(collection).await?;
            }
        }
        Ok(())
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("body", DataType::Utf8, false),
            Field::new(
                "updated_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    /// Build a batch from `(row id, JSON body)` pairs
    fn rows_to_batch(rows: &[(String, String)], schema: Arc<Schema>) -> Result<RecordBatch> {
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        let bodies: Vec<&str> = rows.iter().map(|(_, body)| body.as_str()).collect();
        let now = Utc::now().timestamp_micros();
        let updated_at: Vec<i64> = vec![now; rows.len()];

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(bodies)),
                Arc::new(TimestampMicrosecondArray::from(updated_at).with_timezone("UTC")),
            ],
        )
        .map_err(|e| LetheError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    /// Read `(row id, parsed body)` pairs out of a batch
    fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<(String, Value)>> {
        let id_array = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| LetheError::Storage("Failed to get id column".to_string()))?;

        let body_array = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| LetheError::Storage("Failed to get body column".to_string()))?;

        (0..batch.num_rows())
            .map(|row| {
                let body: Value = serde_json::from_str(body_array.value(row)).map_err(|e| {
                    LetheError::Storage(format!(
                        "Corrupt body for row {}: {e}",
                        id_array.value(row)
                    ))
                })?;
                Ok((id_array.value(row).to_string(), body))
            })
            .collect()
    }

    pub async fn create_table(&mut self, collection: Collection) -> Result<()> {
        let schema = Self::schema();
        let batch = Self::rows_to_batch(&[], schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self
            .connection
            .create_table(collection.name(), Box::new(batches))
            .execute()
            .await
            .map_err(|e| {
                LetheError::Storage(format!("Failed to create {collection} table: {e}"))
            })?;

        self.tables.insert(collection, table);
        Ok(())
    }

    pub async fn open_table(&mut self, collection: Collection) -> Result<()> {
        let table = self
            .connection
            .open_table(collection.name())
            .execute()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to open {collection} table: {e}")))?;

        self.tables.insert(collection, table);
        Ok(())
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to list tables: {e}")))?;

        Ok(names.contains(&name.to_string()))
    }

    fn table(&self, collection: Collection) -> Result<&Table> {
        self.tables
            .get(&collection)
            .ok_or_else(|| LetheError::Storage(format!("{collection} table not initialized")))
    }

    /// Row count of a collection table
    pub async fn count(&self, collection: Collection) -> Result<usize> {
        self.table(collection)?
            .count_rows(None)
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to count {collection} rows: {e}")))
    }

    async fn load(&self, collection: Collection, predicate: Option<String>) -> Result<Vec<(String, Value)>> {
        let table = self.table(collection)?;

        let query = table.query();
        let query = match predicate {
            Some(sql) => query.only_if(sql),
            None => query,
        };

        let stream = query
            .execute()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to query {collection}: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to collect query results: {e}")))?;

        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(Self::batch_to_rows(batch)?);
        }
        Ok(rows)
    }
}

/// Row-level writes that whole-record replacements are built from
#[async_trait]
trait RowWriter: Send + Sync {
    async fn add_rows(&self, collection: Collection, rows: &[(String, String)]) -> Result<()>;

    async fn delete_rows(&self, collection: Collection, ids: &[String]) -> Result<()>;
}

#[async_trait]
impl RowWriter for LanceStore {
    async fn add_rows(&self, collection: Collection, rows: &[(String, String)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let schema = Self::schema();
        let batch = Self::rows_to_batch(rows, schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table(collection)?
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to write {collection}: {e}")))?;

        Ok(())
    }

    async fn delete_rows(&self, collection: Collection, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.table(collection)?
            .delete(&id_in_clause(ids))
            .await
            .map_err(|e| LetheError::Storage(format!("Failed to delete from {collection}: {e}")))?;

        Ok(())
    }
}

/// Swap `replaced` rows for `rows`.
///
/// LanceDB has no multi-statement transaction, so this is delete then add.
/// When the add fails the deleted rows are written back before the error is
/// returned.
async fn replace_rows(
    writer: &dyn RowWriter,
    collection: Collection,
    replaced: &[(String, String)],
    rows: &[(String, String)],
) -> Result<()> {
    let ids: Vec<String> = replaced.iter().map(|(id, _)| id.clone()).collect();
    writer.delete_rows(collection, &ids).await?;

    if let Err(e) = writer.add_rows(collection, rows).await {
        match writer.add_rows(collection, replaced).await {
            Ok(()) => {
                tracing::warn!(collection = %collection, rows = ids.len(), error = %e, "Write failed, previous rows restored");
            }
            Err(restore) => {
                tracing::error!(
                    collection = %collection,
                    row_ids = ?ids,
                    error = %e,
                    restore_error = %restore,
                    "Write failed and previous rows could not be restored"
                );
            }
        }
        return Err(e);
    }
    Ok(())
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn id_in_clause(ids: &[String]) -> String {
    if ids.len() == 1 {
        format!("id = {}", quote(&ids[0]))
    } else {
        let list = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
        format!("id IN ({list})")
    }
}

/// SQL predicate on the row id column derived from a key-field condition.
///
/// The full filter is still evaluated on the decoded bodies; this only
/// narrows the scan.
fn key_predicate(filter: &RecordFilter, key_field: &str) -> Option<String> {
    filter.conditions().iter().find_map(|condition| match condition {
        Condition::Eq(field, Value::String(id)) if field == key_field => {
            Some(id_in_clause(std::slice::from_ref(id)))
        }
        Condition::In(field, values) if field == key_field => {
            let ids: Option<Vec<String>> = values
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            match ids {
                Some(ids) if !ids.is_empty() => Some(id_in_clause(&ids)),
                _ => None,
            }
        }
        _ => None,
    })
}

#[async_trait]
impl RecordStore for LanceStore {
    async fn query(&self, collection: Collection, query: RecordQuery) -> Result<Vec<Value>> {
        let predicate = key_predicate(&query.filter, collection.key_field());
        let rows = self.load(collection, predicate).await?;
        Ok(query.apply(rows.into_iter().map(|(_, body)| body)))
    }

    async fn upsert(&self, collection: Collection, records: Vec<Value>, conflict_key: &str) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // Later records in the same batch win over earlier ones.
        let mut pending: Vec<(String, Value)> = Vec::with_capacity(records.len());
        for mut record in records {
            let key = key_of(&record, conflict_key).ok_or_else(|| {
                LetheError::Storage(format!(
                    "Record for {collection} is missing conflict key '{conflict_key}'"
                ))
            })?;
            if collection.key_field() == "id" && record.get("id").is_none() {
                ensure_id(&mut record)?;
            }
            match pending.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = record,
                None => pending.push((key, record)),
            }
        }

        let predicate = if conflict_key == collection.key_field() {
            let keys: Vec<String> = pending.iter().map(|(key, _)| key.clone()).collect();
            Some(id_in_clause(&keys))
        } else {
            None
        };
        let mut replaced = Vec::new();
        for (row_id, body) in self.load(collection, predicate).await? {
            if key_of(&body, conflict_key).is_some_and(|k| pending.iter().any(|(p, _)| *p == k)) {
                replaced.push((row_id, serde_json::to_string(&body)?));
            }
        }

        let mut rows = Vec::with_capacity(pending.len());
        for (key, record) in &pending {
            let row_id = key_of(record, collection.key_field()).unwrap_or_else(|| key.clone());
            rows.push((row_id, serde_json::to_string(record)?));
        }

        replace_rows(self, collection, &replaced, &rows).await
    }

    async fn insert(&self, collection: Collection, mut record: Value) -> Result<String> {
        let id = ensure_id(&mut record)?;
        let row_id = key_of(&record, collection.key_field()).unwrap_or_else(|| id.clone());
        let body = serde_json::to_string(&record)?;
        self.add_rows(collection, &[(row_id, body)]).await?;
        Ok(id)
    }

    async fn update(&self, collection: Collection, filter: RecordFilter, patch: Value) -> Result<usize> {
        let patch = patch
            .as_object()
            .ok_or_else(|| LetheError::Storage("Update patch must be a JSON object".to_string()))?;

        let predicate = key_predicate(&filter, collection.key_field());
        let mut matched: Vec<(String, Value)> = self
            .load(collection, predicate)
            .await?
            .into_iter()
            .filter(|(_, body)| filter.matches(body))
            .collect();

        if matched.is_empty() {
            return Ok(0);
        }

        let mut originals = Vec::with_capacity(matched.len());
        let mut rows = Vec::with_capacity(matched.len());
        for (row_id, body) in &mut matched {
            originals.push((row_id.clone(), serde_json::to_string(body)?));
            merge_patch(body, patch);
            rows.push((row_id.clone(), serde_json::to_string(body)?));
        }

        replace_rows(self, collection, &originals, &rows).await?;

        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::SortOrder;
    use serde_json::json;

    async fn open_store(dir: &Path) -> LanceStore {
        LanceStore::open(dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_every_table() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        for collection in Collection::ALL {
            assert!(store.table_exists(collection.name()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_reopen_existing_tables() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let store = open_store(temp_dir.path()).await;
            store
                .insert(Collection::Crystals, json!({"id": "c1", "name": "Ancient Cache Codex"}))
                .await
                .unwrap();
        }

        let store = open_store(temp_dir.path()).await;
        let rows = store
            .query(Collection::Crystals, RecordQuery::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Ancient Cache Codex");
    }

    #[test]
    fn test_schema_fields() {
        let schema = LanceStore::schema();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(1).name(), "body");
        assert_eq!(schema.field(2).name(), "updated_at");
    }

    #[test]
    fn test_key_predicate() {
        let filter = RecordFilter::new().eq("status", "proposed").eq("id", "abc");
        assert_eq!(key_predicate(&filter, "id"), Some("id = 'abc'".to_string()));

        let filter = RecordFilter::new().is_in("memory_id", ["a", "b"]);
        assert_eq!(
            key_predicate(&filter, "memory_id"),
            Some("id IN ('a', 'b')".to_string())
        );

        let filter = RecordFilter::new().eq("status", "proposed");
        assert_eq!(key_predicate(&filter, "id"), None);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("o'brien"), "'o''brien'");
    }

    mod records {
        use super::*;

        #[tokio::test]
        async fn test_insert_and_query() {
            let temp_dir = tempfile::tempdir().unwrap();
            let store = open_store(temp_dir.path()).await;

            let id = store
                .insert(Collection::LifecycleEvents, json!({"event": "reforge"}))
                .await
                .unwrap();

            let rows = store
                .query(
                    Collection::LifecycleEvents,
                    RecordQuery::new().filter(RecordFilter::new().eq("id", id.as_str())),
                )
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["event"], "reforge");
        }

        #[tokio::test]
        async fn test_upsert_replaces_by_key() {
            let temp_dir = tempfile::tempdir().unwrap();
            let store = open_store(temp_dir.path()).await;

            store
                .upsert(
                    Collection::DecayEntries,
                    vec![
                        json!({"memory_id": "m1", "decay_score": 0.9, "access_count": 0}),
                        json!({"memory_id": "m2", "decay_score": 0.5, "access_count": 1}),
                    ],
                    "memory_id",
                )
                .await
                .unwrap();
            store
                .upsert(
                    Collection::DecayEntries,
                    vec![json!({"memory_id": "m1", "decay_score": 0.2, "access_count": 4})],
                    "memory_id",
                )
                .await
                .unwrap();

            assert_eq!(store.count(Collection::DecayEntries).await.unwrap(), 2);

            let rows = store
                .query(
                    Collection::DecayEntries,
                    RecordQuery::new().order_by("decay_score", SortOrder::Asc),
                )
                .await
                .unwrap();
            assert_eq!(rows[0]["memory_id"], "m1");
            assert_eq!(rows[0]["access_count"], 4);
        }

        #[tokio::test]
        async fn test_upsert_on_non_key_field() {
            let temp_dir = tempfile::tempdir().unwrap();
            let store = open_store(temp_dir.path()).await;

            store
                .upsert(
                    Collection::Associations,
                    vec![json!({"id": "a1", "pair": "x|y", "strength": 0.5})],
                    "pair",
                )
                .await
                .unwrap();
            store
                .upsert(
                    Collection::Associations,
                    vec![json!({"id": "a2", "pair": "x|y", "strength": 0.7})],
                    "pair",
                )
                .await
                .unwrap();

            let rows = store
                .query(Collection::Associations, RecordQuery::new())
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["id"], "a2");
        }

        #[tokio::test]
        async fn test_update_with_status_guard() {
            let temp_dir = tempfile::tempdir().unwrap();
            let store = open_store(temp_dir.path()).await;

            for (id, status) in [("p1", "proposed"), ("p2", "rejected")] {
                store
                    .insert(Collection::Manifestations, json!({"id": id, "status": status}))
                    .await
                    .unwrap();
            }

            let updated = store
                .update(
                    Collection::Manifestations,
                    RecordFilter::new().is_in("id", ["p1", "p2"]).eq("status", "proposed"),
                    json!({"status": "auto_executed", "approved_by": "system:auto"}),
                )
                .await
                .unwrap();
            assert_eq!(updated, 1);

            let rows = store
                .query(
                    Collection::Manifestations,
                    RecordQuery::new().order_by("id", SortOrder::Asc),
                )
                .await
                .unwrap();
            assert_eq!(rows[0]["status"], "auto_executed");
            assert_eq!(rows[0]["approved_by"], "system:auto");
            assert_eq!(rows[1]["status"], "rejected");
            assert_eq!(store.count(Collection::Manifestations).await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_filters_on_timestamps() {
            let temp_dir = tempfile::tempdir().unwrap();
            let store = open_store(temp_dir.path()).await;

            let now = Utc::now();
            for hours in [1, 30, 80] {
                let created_at = now - chrono::Duration::hours(hours);
                store
                    .insert(
                        Collection::Insights,
                        json!({"hours": hours, "created_at": created_at}),
                    )
                    .await
                    .unwrap();
            }

            let cutoff = now - chrono::Duration::hours(24);
            let rows = store
                .query(
                    Collection::Insights,
                    RecordQuery::new().filter(RecordFilter::new().gte("created_at", cutoff.to_rfc3339())),
                )
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["hours"], 1);
        }
    }

    mod replacement {
        use super::*;
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Rows kept in memory; the next `fail_adds` adds fail
        #[derive(Default)]
        struct ScriptedWriter {
            rows: Mutex<Vec<(String, String)>>,
            fail_adds: AtomicUsize,
        }

        impl ScriptedWriter {
            fn with_rows(rows: &[(String, String)], fail_adds: usize) -> Self {
                Self {
                    rows: Mutex::new(rows.to_vec()),
                    fail_adds: AtomicUsize::new(fail_adds),
                }
            }

            fn rows(&self) -> Vec<(String, String)> {
                self.rows.lock().unwrap().clone()
            }
        }

        #[async_trait]
        impl RowWriter for ScriptedWriter {
            async fn add_rows(&self, _collection: Collection, rows: &[(String, String)]) -> Result<()> {
                let remaining = self.fail_adds.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.fail_adds.store(remaining - 1, Ordering::SeqCst);
                    return Err(LetheError::Storage("disk full".to_string()));
                }
                self.rows.lock().unwrap().extend(rows.iter().cloned());
                Ok(())
            }

            async fn delete_rows(&self, _collection: Collection, ids: &[String]) -> Result<()> {
                self.rows.lock().unwrap().retain(|(id, _)| !ids.contains(id));
                Ok(())
            }
        }

        fn row(id: &str, body: &str) -> (String, String) {
            (id.to_string(), body.to_string())
        }

        #[tokio::test]
        async fn test_replace_swaps_rows() {
            let old = vec![row("m1", r#"{"access_count":3}"#)];
            let new = vec![row("m1", r#"{"access_count":4}"#)];
            let writer = ScriptedWriter::with_rows(&old, 0);

            replace_rows(&writer, Collection::DecayEntries, &old, &new)
                .await
                .unwrap();
            assert_eq!(writer.rows(), new);
        }

        #[tokio::test]
        async fn test_failed_add_restores_previous_rows() {
            let old = vec![
                row("m1", r#"{"is_archived":true}"#),
                row("m2", r#"{"access_count":7}"#),
            ];
            let new = vec![row("m1", r#"{"is_archived":true,"x":1}"#), row("m2", "{}")];
            let writer = ScriptedWriter::with_rows(&old, 1);

            let result = replace_rows(&writer, Collection::DecayEntries, &old, &new).await;
            assert!(result.is_err());
            assert_eq!(writer.rows(), old);
        }

        #[tokio::test]
        async fn test_failed_restore_still_reports_write_error() {
            let old = vec![row("m1", r#"{"is_archived":true}"#)];
            let writer = ScriptedWriter::with_rows(&old, 2);

            let err = replace_rows(&writer, Collection::DecayEntries, &old, &old)
                .await
                .unwrap_err();
            assert!(matches!(err, LetheError::Storage(_)));
            assert!(writer.rows().is_empty());
        }
    }
}
