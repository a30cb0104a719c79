//! Sightline Test Utils - shared fixtures for engine and storage tests
//!
//! [`ScriptedComputation`] is a controllable `ViewComputation` over a
//! page-engagement domain: tests script which pages exist, what their
//! metrics are, and which calls fail, then assert on call counters and
//! stored documents. [`RecordingStore`] wraps `MemoryStore` with
//! per-method counters and failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use sightline_core::{
    timestamp_value, BulkWriteReport, Comparator, DateRange, DeleteReport, Document, Filter,
    Partition, RefreshPlan, SightlineResult, StoreError, ViewComputation, WriteOp,
};
use sightline_storage::{AggregatePipeline, DocumentStore, FindOptions, MemoryStore};

// ============================================================================
// Document fixtures
// ============================================================================

/// A per-page per-day view document, as the engagement view stores them.
pub fn page_day_doc(page: &str, day: NaiveDate, views: i64, comments: i64) -> Document {
    let window = DateRange::for_day(day);
    let mut doc = Document::new();
    doc.insert("page_id".into(), page.into());
    doc.insert("day".into(), timestamp_value(window.start()));
    doc.insert("views".into(), views.into());
    doc.insert("comments".into(), comments.into());
    doc
}

// ============================================================================
// Scripted computation
// ============================================================================

/// One unit of scripted work: a page to recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUnit {
    pub page_id: String,
}

/// Context shared by every unit of one pass.
pub struct PassContext {
    /// The partition the pass covers; its filter seeds every write's
    /// natural key.
    pub partition: Partition,
    /// Metric snapshot taken at prepare time.
    pub views: HashMap<String, i64>,
}

/// A `ViewComputation` whose behavior tests script up front.
///
/// The live page set drives both unit enumeration and garbage
/// collection: `clear_non_existing` deletes view documents for pages no
/// longer in the set, exactly as a real computation would drop rows for
/// deleted source entities.
pub struct ScriptedComputation {
    store: Arc<MemoryStore>,
    view_collection: String,
    pages: Mutex<Vec<String>>,
    views: Mutex<HashMap<String, i64>>,
    fail_pages: Mutex<HashSet<String>>,
    fail_prepare: AtomicBool,
    fail_gc: AtomicBool,
    ops_per_unit: AtomicUsize,
    refresh_delay: Mutex<Option<Duration>>,
    prepare_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    gc_calls: AtomicUsize,
}

impl ScriptedComputation {
    pub fn new(store: Arc<MemoryStore>, view_collection: impl Into<String>) -> Self {
        ScriptedComputation {
            store,
            view_collection: view_collection.into(),
            pages: Mutex::new(Vec::new()),
            views: Mutex::new(HashMap::new()),
            fail_pages: Mutex::new(HashSet::new()),
            fail_prepare: AtomicBool::new(false),
            fail_gc: AtomicBool::new(false),
            ops_per_unit: AtomicUsize::new(1),
            refresh_delay: Mutex::new(None),
            prepare_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            gc_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_pages(self, pages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut live = self.pages.lock().unwrap();
            *live = pages.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn with_ops_per_unit(self, n: usize) -> Self {
        self.ops_per_unit.store(n.max(1), Ordering::SeqCst);
        self
    }

    /// Delay inside every unit refresh, to widen overlap windows in
    /// concurrency tests.
    pub fn with_refresh_delay(self, delay: Duration) -> Self {
        self.set_refresh_delay(Some(delay));
        self
    }

    /// Change the per-unit delay mid-test. Units already sleeping keep
    /// the delay they read.
    pub fn set_refresh_delay(&self, delay: Option<Duration>) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    /// Set the metric the next pass records for a page.
    pub fn set_views(&self, page: &str, views: i64) {
        self.views.lock().unwrap().insert(page.to_string(), views);
    }

    /// Remove a page from the live set; the next garbage collection
    /// deletes its view documents.
    pub fn remove_page(&self, page: &str) {
        self.pages.lock().unwrap().retain(|p| p != page);
    }

    pub fn add_page(&self, page: &str) {
        let mut pages = self.pages.lock().unwrap();
        if !pages.iter().any(|p| p == page) {
            pages.push(page.to_string());
        }
    }

    /// Make a page's unit refresh fail until cleared.
    pub fn fail_page(&self, page: &str) {
        self.fail_pages.lock().unwrap().insert(page.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_pages.lock().unwrap().clear();
        self.fail_prepare.store(false, Ordering::SeqCst);
        self.fail_gc.store(false, Ordering::SeqCst);
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gc(&self, fail: bool) {
        self.fail_gc.store(fail, Ordering::SeqCst);
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn gc_calls(&self) -> usize {
        self.gc_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewComputation for ScriptedComputation {
    type BaseDoc = PageUnit;
    type Context = PassContext;

    async fn prepare_refresh_context(
        &self,
        partition: &Partition,
    ) -> SightlineResult<RefreshPlan<Self>> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(StoreError::backend("scripted prepare failure").into());
        }
        let mut pages = self.pages.lock().unwrap().clone();
        pages.sort();
        let base_docs = pages
            .into_iter()
            .map(|page_id| PageUnit { page_id })
            .collect();
        Ok(RefreshPlan {
            base_docs,
            context: PassContext {
                partition: partition.clone(),
                views: self.views.lock().unwrap().clone(),
            },
        })
    }

    async fn refresh(
        &self,
        base_doc: &PageUnit,
        context: &PassContext,
    ) -> SightlineResult<Vec<WriteOp>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_pages.lock().unwrap().contains(&base_doc.page_id) {
            return Err(StoreError::backend(format!(
                "scripted failure for {}",
                base_doc.page_id
            ))
            .into());
        }

        let views = context
            .views
            .get(&base_doc.page_id)
            .copied()
            .unwrap_or_default();
        let ops_per_unit = self.ops_per_unit.load(Ordering::SeqCst);
        let mut ops = Vec::with_capacity(ops_per_unit);
        for row in 0..ops_per_unit {
            let mut filter = context
                .partition
                .filter()
                .clone()
                .and_eq("page_id", base_doc.page_id.as_str());
            if ops_per_unit > 1 {
                filter = filter.and_eq("row", row as i64);
            }
            ops.push(
                WriteOp::upsert(filter)
                    .with_set("views", views)
                    .with_set_on_insert("origin", "initial"),
            );
        }
        Ok(ops)
    }

    async fn clear_non_existing(&self) -> SightlineResult<DeleteReport> {
        self.gc_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gc.load(Ordering::SeqCst) {
            return Err(StoreError::backend("scripted gc failure").into());
        }
        let live: Vec<serde_json::Value> = self
            .pages
            .lock()
            .unwrap()
            .iter()
            .map(|p| serde_json::Value::from(p.as_str()))
            .collect();
        let orphaned = Filter::none_of(vec![Filter::cmp(
            "page_id",
            Comparator::In,
            serde_json::Value::Array(live),
        )]);
        self.store.delete_many(&self.view_collection, &orphaned).await
    }
}

// ============================================================================
// Recording store
// ============================================================================

/// `MemoryStore` wrapper with per-method call counters and failure
/// switches.
///
/// Build it over a shared store with [`RecordingStore::over`] when a
/// test also hands the same `MemoryStore` to a computation.
#[derive(Default)]
pub struct RecordingStore {
    inner: Arc<MemoryStore>,
    find_calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    bulk_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_find: AtomicBool,
    fail_bulk: AtomicBool,
    fail_delete: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        RecordingStore::default()
    }

    pub fn over(inner: Arc<MemoryStore>) -> Self {
        RecordingStore {
            inner,
            ..RecordingStore::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_find(&self, fail: bool) {
        self.fail_find.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> SightlineResult<Vec<Document>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected find failure").into());
        }
        self.inner.find(collection, filter, options).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &AggregatePipeline,
    ) -> SightlineResult<Vec<Document>> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(collection, pipeline).await
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> SightlineResult<BulkWriteReport> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected bulk failure").into());
        }
        self.inner.bulk_upsert(collection, ops).await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> SightlineResult<DeleteReport> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected delete failure").into());
        }
        self.inner.delete_many(collection, filter).await
    }
}
