//! Sightline Storage - In-memory backend
//!
//! Collections are plain vectors of documents behind one `RwLock`.
//! Writes take the lock exclusively, so every [`WriteOp`] applies
//! atomically and a bulk call is totally ordered against concurrent
//! readers. Suitable for embedded deployments and tests; not durable.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use sightline_core::{
    set_path, BulkWriteReport, DeleteReport, Document, Filter, SightlineResult, StoreError,
    WriteOp,
};

use crate::pipeline::{self, AggregatePipeline};
use crate::store::{DocumentStore, FindOptions};

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Append a document directly, bypassing upsert matching. Intended
    /// for seeding source collections.
    pub fn insert(&self, collection: &str, doc: Document) -> SightlineResult<()> {
        let mut collections = self.write()?;
        collections.entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    pub fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Document>,
    ) -> SightlineResult<()> {
        let mut collections = self.write()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(())
    }

    /// Number of documents in a collection. Missing collections count
    /// as empty.
    pub fn count(&self, collection: &str) -> SightlineResult<usize> {
        let collections = self.read()?;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }

    /// Snapshot of a collection, in insertion order.
    pub fn dump(&self, collection: &str) -> SightlineResult<Vec<Document>> {
        let collections = self.read()?;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    /// Drop every collection.
    pub fn clear(&self) -> SightlineResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Document>>>, StoreError> {
        self.collections.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Document>>>, StoreError> {
        self.collections.write().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Apply one upsert against a collection, in place.
fn apply_op(docs: &mut Vec<Document>, op: &WriteOp, report: &mut BulkWriteReport) {
    if let Some(existing) = docs.iter_mut().find(|d| op.filter.matches(d)) {
        report.matched += 1;
        let mut updated = existing.clone();
        for (path, value) in &op.set {
            set_path(&mut updated, path, value.clone());
        }
        if updated != *existing {
            *existing = updated;
            report.modified += 1;
        }
        return;
    }

    // Insert: seed the natural key from the filter's equality
    // conditions, then set_on_insert, then set (set wins on overlap).
    let mut doc = Document::new();
    for cond in op.filter.conditions() {
        if cond.op == sightline_core::Comparator::Eq {
            set_path(&mut doc, &cond.field, cond.value.clone());
        }
    }
    for (path, value) in &op.set_on_insert {
        set_path(&mut doc, path, value.clone());
    }
    for (path, value) in &op.set {
        set_path(&mut doc, path, value.clone());
    }
    docs.push(doc);
    report.upserted += 1;
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> SightlineResult<Vec<Document>> {
        let collections = self.read()?;
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        drop(collections);

        if let Some(spec) = &options.sort {
            pipeline::sort_documents(&mut docs, spec);
        }
        if let Some(limit) = options.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline_spec: &AggregatePipeline,
    ) -> SightlineResult<Vec<Document>> {
        let snapshot = self.dump(collection)?;
        Ok(pipeline::execute(snapshot, pipeline_spec))
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> SightlineResult<BulkWriteReport> {
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        let mut report = BulkWriteReport::default();
        for op in ops {
            apply_op(docs, op, &mut report);
        }
        Ok(report)
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> SightlineResult<DeleteReport> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(DeleteReport::default());
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok(DeleteReport {
            deleted: (before - docs.len()) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SortOrder;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let store = MemoryStore::new();
        let op = WriteOp::upsert(Filter::eq("page_id", "p1"))
            .with_set("views", 5)
            .with_set_on_insert("first_seen", "2026-01-01T00:00:00.000Z");

        let report = store.bulk_upsert("pages", &[op.clone()]).await.unwrap();
        assert_eq!(report.upserted, 1);
        assert_eq!(report.matched, 0);

        let inserted = store
            .find_one("pages", &Filter::eq("page_id", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inserted["page_id"], json!("p1"));
        assert_eq!(inserted["views"], json!(5));
        assert_eq!(inserted["first_seen"], json!("2026-01-01T00:00:00.000Z"));

        let update = WriteOp::upsert(Filter::eq("page_id", "p1"))
            .with_set("views", 9)
            .with_set_on_insert("first_seen", "2026-02-01T00:00:00.000Z");
        let report = store.bulk_upsert("pages", &[update]).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.modified, 1);
        assert_eq!(report.upserted, 0);

        let updated = store
            .find_one("pages", &Filter::eq("page_id", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["views"], json!(9));
        // set_on_insert never touches an existing document.
        assert_eq!(updated["first_seen"], json!("2026-01-01T00:00:00.000Z"));
        assert_eq!(store.count("pages").unwrap(), 1);
    }

    #[tokio::test]
    async fn replaying_an_op_changes_nothing() {
        let store = MemoryStore::new();
        let op = WriteOp::upsert(Filter::eq("page_id", "p1")).with_set("views", 5);

        store.bulk_upsert("pages", &[op.clone()]).await.unwrap();
        let second = store.bulk_upsert("pages", &[op]).await.unwrap();
        assert_eq!(second.matched, 1);
        assert_eq!(second.modified, 0);
        assert_eq!(second.upserted, 0);
        assert_eq!(store.count("pages").unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_with_dotted_paths_builds_nested_objects() {
        let store = MemoryStore::new();
        let op = WriteOp::upsert(Filter::eq("page_id", "p1"))
            .with_set("metrics.views", 3)
            .with_set("metrics.comments", 1);
        store.bulk_upsert("pages", &[op]).await.unwrap();

        let doc = store
            .find_one("pages", &Filter::eq("metrics.views", 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["metrics"]["comments"], json!(1));
    }

    #[tokio::test]
    async fn find_applies_sort_and_limit() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "pages",
                vec![
                    doc(json!({"page_id": "a", "views": 2})),
                    doc(json!({"page_id": "b", "views": 9})),
                    doc(json!({"page_id": "c", "views": 5})),
                ],
            )
            .unwrap();

        let top = store
            .find(
                "pages",
                &Filter::empty(),
                FindOptions::new().with_sort("views", SortOrder::Desc).with_limit(2),
            )
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["page_id"], json!("b"));
        assert_eq!(top[1]["page_id"], json!("c"));
    }

    #[tokio::test]
    async fn missing_collection_reads_as_empty() {
        let store = MemoryStore::new();
        let docs = store
            .find("nope", &Filter::empty(), FindOptions::new())
            .await
            .unwrap();
        assert!(docs.is_empty());
        assert!(store.find_one("nope", &Filter::empty()).await.unwrap().is_none());
        assert_eq!(store.delete_many("nope", &Filter::empty()).await.unwrap().deleted, 0);
        assert_eq!(store.count("nope").unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_many_removes_only_matches() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "pages",
                vec![
                    doc(json!({"page_id": "a", "stale": true})),
                    doc(json!({"page_id": "b", "stale": false})),
                    doc(json!({"page_id": "c", "stale": true})),
                ],
            )
            .unwrap();

        let report = store
            .delete_many("pages", &Filter::eq("stale", true))
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(store.count("pages").unwrap(), 1);
    }

    #[tokio::test]
    async fn ops_in_one_batch_apply_in_order() {
        let store = MemoryStore::new();
        let ops = vec![
            WriteOp::upsert(Filter::eq("page_id", "p1")).with_set("views", 1),
            WriteOp::upsert(Filter::eq("page_id", "p1")).with_set("views", 2),
        ];
        let report = store.bulk_upsert("pages", &ops).await.unwrap();
        assert_eq!(report.upserted, 1);
        assert_eq!(report.matched, 1);

        let doc = store
            .find_one("pages", &Filter::eq("page_id", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["views"], json!(2));
    }

    #[tokio::test]
    async fn aggregate_runs_over_a_snapshot() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "events",
                vec![
                    doc(json!({"page_id": "p1", "views": 4})),
                    doc(json!({"page_id": "p1", "views": 6})),
                ],
            )
            .unwrap();

        let pipeline = AggregatePipeline::new().group(
            "page_id",
            vec![crate::pipeline::Accumulator::sum("views", "views")],
        );
        let out = store.aggregate("events", &pipeline).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["views"].as_f64(), Some(10.0));
    }
}
