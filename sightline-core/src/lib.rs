//! Sightline Core - shared data types for the view refresh engine
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! documents and filters, date ranges, partitions, write operations, and
//! the [`ViewComputation`] capability that view plug-ins implement. It
//! contains no I/O; storage backends and the refresh orchestrator build
//! on these types from their own crates.

pub mod computation;
pub mod error;
pub mod filter;
pub mod partition;
pub mod range;
pub mod view;
pub mod write;

pub use computation::{RefreshPlan, ViewComputation};
pub use error::{
    ConfigError, QueryError, RefreshError, SightlineError, SightlineResult, StoreError,
};
pub use filter::{Clause, Comparator, Condition, Filter};
pub use partition::{Partition, PartitionExtraction, PartitionKey};
pub use range::DateRange;
pub use view::{ViewConfig, LAST_UPDATED_FIELD, RANGE_END_FIELD, RANGE_START_FIELD};
pub use write::{BulkWriteReport, DeleteReport, WriteOp};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

// ============================================================================
// Identity & Time
// ============================================================================

/// Stable identifier for entities tracked by views (UUID v7, time-ordered).
pub type EntityId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = DateTime<Utc>;

/// A schemaless record as stored and returned by document stores.
pub type Document = serde_json::Map<String, Value>;

/// Generate a new time-ordered entity id.
pub fn new_entity_id() -> EntityId {
    uuid::Uuid::now_v7()
}

/// Encode a timestamp as a JSON value in the canonical wire format
/// (RFC 3339, millisecond precision, `Z` suffix).
///
/// Every timestamp written into a document must go through this helper so
/// that string comparison of encoded values agrees with chronological
/// order.
pub fn timestamp_value(ts: Timestamp) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Decode a timestamp from a JSON value, accepting any RFC 3339 offset.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Document field paths
// ============================================================================

/// Resolve a dotted field path against a document.
///
/// `"metrics.views"` descends through nested objects; any non-object
/// intermediate resolves to `None`.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dotted field path, creating intermediate objects.
///
/// A non-object intermediate is replaced by an object so the write always
/// lands.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !slot.is_object() {
                *slot = Value::Object(Document::new());
            }
            if let Value::Object(inner) = slot {
                set_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entity_ids_are_time_ordered() {
        let a = new_entity_id();
        let b = new_entity_id();
        assert!(a <= b);
    }

    #[test]
    fn timestamp_round_trips_through_json() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let encoded = timestamp_value(ts);
        assert_eq!(parse_timestamp(&encoded), Some(ts));
    }

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let a = timestamp_value(early);
        let b = timestamp_value(late);
        assert!(a.as_str().unwrap() < b.as_str().unwrap());
    }

    #[test]
    fn parse_rejects_non_timestamp_values() {
        assert_eq!(parse_timestamp(&Value::from(42)), None);
        assert_eq!(parse_timestamp(&Value::from("not a date")), None);
        assert_eq!(parse_timestamp(&Value::Null), None);
    }

    #[test]
    fn lookup_path_handles_flat_and_nested_fields() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "page_id": "p1",
            "metrics": { "views": 3 }
        }))
        .unwrap();
        assert_eq!(lookup_path(&doc, "page_id"), Some(&Value::from("p1")));
        assert_eq!(lookup_path(&doc, "metrics.views"), Some(&Value::from(3)));
        assert_eq!(lookup_path(&doc, "metrics.comments"), None);
        assert_eq!(lookup_path(&doc, "page_id.oops"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut doc = Document::new();
        set_path(&mut doc, "metrics.views", Value::from(9));
        set_path(&mut doc, "page_id", Value::from("p1"));
        assert_eq!(lookup_path(&doc, "metrics.views"), Some(&Value::from(9)));
        assert_eq!(lookup_path(&doc, "page_id"), Some(&Value::from("p1")));

        // Overwriting a scalar intermediate replaces it with an object.
        set_path(&mut doc, "page_id.nested", Value::from(true));
        assert_eq!(lookup_path(&doc, "page_id.nested"), Some(&Value::from(true)));
    }
}
