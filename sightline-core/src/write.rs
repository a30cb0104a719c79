//! Sightline Core - Write operations
//!
//! Refresh passes describe their output as idempotent upserts: a natural
//! key filter plus fields to set. Replaying the same [`WriteOp`] leaves
//! storage unchanged, which lets a refresh race a concurrent pass in
//! another process without corrupting the view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Document, Filter};

/// An idempotent upsert against a view collection.
///
/// `set` keys are dotted field paths written on every application;
/// `set_on_insert` paths are written only when the operation inserts a
/// new document. On insert the document is seeded from the filter's
/// equality conditions, so the natural key is always present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteOp {
    pub filter: Filter,
    pub set: Document,
    pub set_on_insert: Document,
}

impl WriteOp {
    /// Start an upsert keyed by the given filter.
    pub fn upsert(filter: Filter) -> Self {
        WriteOp {
            filter,
            set: Document::new(),
            set_on_insert: Document::new(),
        }
    }

    pub fn with_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(path.into(), value.into());
        self
    }

    pub fn with_set_on_insert(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_on_insert.insert(path.into(), value.into());
        self
    }
}

/// Outcome of a bulk upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkWriteReport {
    /// Operations whose filter matched an existing document.
    pub matched: u64,
    /// Documents updated in place.
    pub modified: u64,
    /// Documents inserted because nothing matched.
    pub upserted: u64,
}

impl BulkWriteReport {
    pub fn absorb(&mut self, other: BulkWriteReport) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
    }

    /// Total operations the report accounts for.
    pub fn ops(&self) -> u64 {
        self.matched + self.upserted
    }
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: u64,
}
