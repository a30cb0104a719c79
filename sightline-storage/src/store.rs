//! Sightline Storage - The `DocumentStore` trait
//!
//! Object safe so engines can hold `Arc<dyn DocumentStore>` and swap
//! backends without regenerating code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sightline_core::{BulkWriteReport, DeleteReport, Document, Filter, SightlineResult, WriteOp};

use crate::pipeline::AggregatePipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Single-field sort, by dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        SortSpec {
            field: field.into(),
            order,
        }
    }
}

/// Read options for [`DocumentStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        FindOptions::default()
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec::new(field, order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Async document store.
///
/// Implementations apply each [`WriteOp`] atomically; a bulk call may
/// partially apply if the backend fails mid-batch, but never leaves a
/// single operation half-written.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents matching `filter`, honoring sort and limit.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> SightlineResult<Vec<Document>>;

    /// First document matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> SightlineResult<Option<Document>> {
        let mut docs = self
            .find(collection, filter, FindOptions::new().with_limit(1))
            .await?;
        Ok(docs.pop())
    }

    /// Run an aggregation pipeline over a collection.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &AggregatePipeline,
    ) -> SightlineResult<Vec<Document>>;

    /// Apply upserts in order, returning the combined report.
    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> SightlineResult<BulkWriteReport>;

    /// Delete every document matching `filter`.
    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> SightlineResult<DeleteReport>;
}
