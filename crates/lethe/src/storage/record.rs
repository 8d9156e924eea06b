//! Record store abstraction
//!
//! The lifecycle engine persists everything as JSON documents grouped into
//! named collections. Backends implement [`RecordStore`]; filtering, ordering
//! and limiting semantics live here so every backend agrees on them.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{LetheError, Result};

/// Named document collections used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Memories,
    DecayEntries,
    ReforgedCrystals,
    Crystals,
    Manifestations,
    DreamSessions,
    Associations,
    AssociationLog,
    Insights,
    UsageAnalytics,
    LifecycleEvents,
}

impl Collection {
    pub const ALL: [Collection; 11] = [
        Collection::Memories,
        Collection::DecayEntries,
        Collection::ReforgedCrystals,
        Collection::Crystals,
        Collection::Manifestations,
        Collection::DreamSessions,
        Collection::Associations,
        Collection::AssociationLog,
        Collection::Insights,
        Collection::UsageAnalytics,
        Collection::LifecycleEvents,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Memories => "memories",
            Collection::DecayEntries => "decay_entries",
            Collection::ReforgedCrystals => "reforged_crystals",
            Collection::Crystals => "crystals",
            Collection::Manifestations => "manifestations",
            Collection::DreamSessions => "dream_sessions",
            Collection::Associations => "associations",
            Collection::AssociationLog => "association_log",
            Collection::Insights => "insights",
            Collection::UsageAnalytics => "usage_analytics",
            Collection::LifecycleEvents => "lifecycle_events",
        }
    }

    /// Field that uniquely identifies a record in this collection
    pub fn key_field(&self) -> &'static str {
        match self {
            Collection::DecayEntries => "memory_id",
            _ => "id",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single comparison against a top-level record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
}

impl Condition {
    /// Whether `record` satisfies this condition.
    ///
    /// A missing field only matches `Eq(field, null)`.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Condition::Eq(field, expected) => match record.get(field) {
                Some(actual) => values_equal(actual, expected),
                None => expected.is_null(),
            },
            Condition::In(field, options) => record
                .get(field)
                .is_some_and(|actual| options.iter().any(|option| values_equal(actual, option))),
            Condition::Lt(field, bound) => {
                compare_field(record, field, bound).is_some_and(|o| o == Ordering::Less)
            }
            Condition::Lte(field, bound) => {
                compare_field(record, field, bound).is_some_and(|o| o != Ordering::Greater)
            }
            Condition::Gt(field, bound) => {
                compare_field(record, field, bound).is_some_and(|o| o == Ordering::Greater)
            }
            Condition::Gte(field, bound) => {
                compare_field(record, field, bound).is_some_and(|o| o != Ordering::Less)
            }
        }
    }
}

fn compare_field(record: &Value, field: &str, bound: &Value) -> Option<Ordering> {
    record.get(field).and_then(|actual| compare_values(actual, bound))
}

/// Order two JSON values: numerically, as RFC 3339 timestamps, or as strings.
///
/// Values of unrelated types are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Conjunction of conditions. An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    conditions: Vec<Condition>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Lt(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Lte(field.to_string(), value.into()));
        self
    }

    pub fn gt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Gt(field.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Gte(field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Sort direction for [`OrderBy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Filter, optional ordering and optional limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub filter: RecordFilter,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order = Some(OrderBy {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply filter, ordering and limit to a set of records.
    ///
    /// Sorting is stable; records missing the sort field go last.
    pub fn apply(&self, records: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = records
            .into_iter()
            .filter(|record| self.filter.matches(record))
            .collect();

        if let Some(order) = &self.order {
            matched.sort_by(|a, b| {
                match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => {
                        let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
                        match order.order {
                            SortOrder::Asc => ordering,
                            SortOrder::Desc => ordering.reverse(),
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }

        matched
    }
}

/// Document persistence used by every engine component.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records of `collection` matching the query
    async fn query(&self, collection: Collection, query: RecordQuery) -> Result<Vec<Value>>;

    /// Insert or replace records, matching existing ones on `conflict_key`
    async fn upsert(&self, collection: Collection, records: Vec<Value>, conflict_key: &str) -> Result<()>;

    /// Insert one record, assigning a UUID `id` when absent. Returns the id.
    async fn insert(&self, collection: Collection, record: Value) -> Result<String>;

    /// Shallow-merge `patch` into every matching record. Returns the number updated.
    async fn update(&self, collection: Collection, filter: RecordFilter, patch: Value) -> Result<usize>;
}

/// Serialize a domain value into a JSON object record
pub fn to_record<T: Serialize>(value: &T) -> Result<Value> {
    let record = serde_json::to_value(value)?;
    if !record.is_object() {
        return Err(LetheError::Serialization(
            "Records must serialize to JSON objects".to_string(),
        ));
    }
    Ok(record)
}

/// Decode records into domain values, skipping (and logging) malformed ones
pub fn decode_records<T: DeserializeOwned>(collection: Collection, records: Vec<Value>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<T>(record) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect()
}

/// Query a collection and decode the results
pub async fn fetch<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: Collection,
    query: RecordQuery,
) -> Result<Vec<T>> {
    let records = store.query(collection, query).await?;
    Ok(decode_records(collection, records))
}

/// Ensure a record has an `id`, assigning a fresh UUID when it does not
pub fn ensure_id(record: &mut Value) -> Result<String> {
    let object = record
        .as_object_mut()
        .ok_or_else(|| LetheError::Storage("Record must be a JSON object".to_string()))?;

    match object.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            object.insert("id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// String form of a record's key field, if present
pub fn key_of(record: &Value, key_field: &str) -> Option<String> {
    match record.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Shallow-merge the top-level fields of `patch` into `record`
pub fn merge_patch(record: &mut Value, patch: &Map<String, Value>) {
    if let Some(object) = record.as_object_mut() {
        for (field, value) in patch {
            object.insert(field.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod conditions {
        use super::*;

        #[test]
        fn test_eq_matches_strings_and_numbers() {
            let record = json!({"status": "proposed", "priority": 3});
            assert!(Condition::Eq("status".into(), json!("proposed")).matches(&record));
            assert!(Condition::Eq("priority".into(), json!(3.0)).matches(&record));
            assert!(!Condition::Eq("status".into(), json!("expired")).matches(&record));
        }

        #[test]
        fn test_eq_null_matches_missing_field() {
            let record = json!({"status": "proposed"});
            assert!(Condition::Eq("executed_at".into(), Value::Null).matches(&record));
            assert!(!Condition::Eq("executed_at".into(), json!("x")).matches(&record));
        }

        #[test]
        fn test_in() {
            let record = json!({"category": "pattern"});
            let cond = Condition::In("category".into(), vec![json!("association"), json!("pattern")]);
            assert!(cond.matches(&record));
            let cond = Condition::In("category".into(), vec![json!("fusion")]);
            assert!(!cond.matches(&record));
        }

        #[test]
        fn test_numeric_bounds() {
            let record = json!({"decay_score": 0.15});
            assert!(Condition::Gte("decay_score".into(), json!(0.15)).matches(&record));
            assert!(!Condition::Gt("decay_score".into(), json!(0.15)).matches(&record));
            assert!(Condition::Lt("decay_score".into(), json!(0.4)).matches(&record));
            assert!(Condition::Lte("decay_score".into(), json!(0.15)).matches(&record));
        }

        #[test]
        fn test_timestamps_compare_chronologically() {
            // Different offsets; string order would disagree with time order.
            let record = json!({"created_at": "2026-01-01T10:00:00+02:00"});
            assert!(
                Condition::Lt("created_at".into(), json!("2026-01-01T09:30:00Z")).matches(&record)
            );
        }

        #[test]
        fn test_missing_field_never_satisfies_bounds() {
            let record = json!({});
            assert!(!Condition::Lt("score".into(), json!(1)).matches(&record));
            assert!(!Condition::Gte("score".into(), json!(0)).matches(&record));
        }

        #[test]
        fn test_mismatched_types_are_incomparable() {
            let record = json!({"score": "high"});
            assert!(!Condition::Gt("score".into(), json!(0.5)).matches(&record));
        }
    }

    mod queries {
        use super::*;

        fn records() -> Vec<Value> {
            vec![
                json!({"id": "a", "score": 0.3, "agent": "x"}),
                json!({"id": "b", "score": 0.1, "agent": "y"}),
                json!({"id": "c", "agent": "x"}),
                json!({"id": "d", "score": 0.2, "agent": "x"}),
            ]
        }

        #[test]
        fn test_empty_query_returns_everything() {
            assert_eq!(RecordQuery::new().apply(records()).len(), 4);
        }

        #[test]
        fn test_filter_conjunction() {
            let query = RecordQuery::new()
                .filter(RecordFilter::new().eq("agent", "x").lt("score", 0.25));
            let result = query.apply(records());
            assert_eq!(result.len(), 1);
            assert_eq!(result[0]["id"], "d");
        }

        #[test]
        fn test_order_and_limit() {
            let query = RecordQuery::new().order_by("score", SortOrder::Asc).limit(2);
            let ids: Vec<_> = query.apply(records()).iter().map(|r| r["id"].clone()).collect();
            assert_eq!(ids, vec![json!("b"), json!("d")]);
        }

        #[test]
        fn test_missing_sort_field_goes_last() {
            let query = RecordQuery::new().order_by("score", SortOrder::Desc);
            let result = query.apply(records());
            assert_eq!(result[0]["id"], "a");
            assert_eq!(result[3]["id"], "c");
        }
    }

    mod helpers {
        use super::*;

        #[test]
        fn test_ensure_id_assigns_uuid() {
            let mut record = json!({"name": "x"});
            let id = ensure_id(&mut record).unwrap();
            assert!(uuid::Uuid::parse_str(&id).is_ok());
            assert_eq!(record["id"], json!(id));
        }

        #[test]
        fn test_ensure_id_keeps_existing() {
            let mut record = json!({"id": "keep-me"});
            assert_eq!(ensure_id(&mut record).unwrap(), "keep-me");
        }

        #[test]
        fn test_ensure_id_rejects_non_objects() {
            let mut record = json!([1, 2]);
            assert!(ensure_id(&mut record).is_err());
        }

        #[test]
        fn test_merge_patch_is_shallow() {
            let mut record = json!({"status": "proposed", "meta": {"a": 1, "b": 2}});
            let patch = json!({"status": "expired", "meta": {"a": 9}});
            merge_patch(&mut record, patch.as_object().unwrap());
            assert_eq!(record, json!({"status": "expired", "meta": {"a": 9}}));
        }

        #[test]
        fn test_decode_records_skips_malformed() {
            #[derive(serde::Deserialize)]
            struct Row {
                #[allow(dead_code)]
                id: String,
            }
            let rows: Vec<Row> = decode_records(
                Collection::Insights,
                vec![json!({"id": "ok"}), json!({"nope": true})],
            );
            assert_eq!(rows.len(), 1);
        }

        #[test]
        fn test_key_fields() {
            assert_eq!(Collection::DecayEntries.key_field(), "memory_id");
            assert_eq!(Collection::Manifestations.key_field(), "id");
            assert_eq!(Collection::ALL.len(), 11);
        }
    }
}
