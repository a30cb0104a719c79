//! Sightline Views - Refresh engine
//!
//! [`View`] ties the pieces together: staleness policy, partition
//! registry, write batching, and a domain [`ViewComputation`]. Reads go
//! through the facade methods ([`View::find`], [`View::find_one`],
//! [`View::aggregate`]), which guarantee the partition a query addresses
//! is fresh before touching storage.
//!
//! Freshness is checked in two steps. A per-partition in-memory instant
//! answers most checks without I/O; when it says stale (or knows
//! nothing) the engine reads the authoritative maximum of the
//! `last_updated` field from storage. The whole decision, and any
//! refresh it triggers, happens while holding the partition's async
//! mutex, so concurrent readers of a stale partition produce exactly one
//! refresh pass and the rest take the fast path once the lock frees up.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use sightline_core::{
    new_entity_id, parse_timestamp, timestamp_value, DateRange, DeleteReport, Document, EntityId,
    Filter, Partition, RefreshError, RefreshPlan, SightlineResult, Timestamp, ViewComputation,
    ViewConfig, LAST_UPDATED_FIELD,
};
use sightline_storage::{AggregatePipeline, DocumentStore, FindOptions, SortOrder};

use crate::batcher::{FlushReport, WriteBatcher};
use crate::query::AggregateQuery;
use crate::registry::PartitionRegistry;
use crate::staleness::StalenessPolicy;
use crate::stats::{ViewStats, ViewStatsSnapshot};

/// Summary of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    /// Correlation id for the pass, carried by its log records.
    pub pass_id: EntityId,
    /// Instant stamped into every document the pass wrote.
    pub refreshed_at: Timestamp,
    /// Units the plan enumerated.
    pub units_total: usize,
    /// Units that failed and were skipped.
    pub units_failed: usize,
    /// Operations handed to the batcher by successful units.
    pub ops_enqueued: usize,
    pub flush: FlushReport,
}

/// A materialized view refreshed on demand.
pub struct View<C: ViewComputation> {
    config: ViewConfig,
    staleness: StalenessPolicy,
    store: Arc<dyn DocumentStore>,
    computation: C,
    registry: PartitionRegistry,
    stats: ViewStats,
}

impl<C: ViewComputation> View<C> {
    pub fn new(
        config: ViewConfig,
        store: Arc<dyn DocumentStore>,
        computation: C,
    ) -> SightlineResult<Self> {
        config.validate()?;
        Ok(View {
            staleness: StalenessPolicy::from_config(&config),
            config,
            store,
            computation,
            registry: PartitionRegistry::new(),
            stats: ViewStats::default(),
        })
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn computation(&self) -> &C {
        &self.computation
    }

    pub fn stats(&self) -> ViewStatsSnapshot {
        self.stats.snapshot()
    }

    /// The partition governing an explicit time window.
    pub fn partition_for_range(&self, range: &DateRange) -> Partition {
        Partition::from_range(range, &self.config.range_fields.0, &self.config.range_fields.1)
    }

    /// Documents matching `filter`, refreshed first if the partition the
    /// filter addresses is stale.
    pub async fn find(&self, filter: &Filter, options: FindOptions) -> SightlineResult<Vec<Document>> {
        let partition = self.partition_for(filter);
        self.ensure_fresh(&partition).await?;
        self.store.find(&self.config.name, filter, options).await
    }

    /// Single-document variant of [`View::find`].
    pub async fn find_one(&self, filter: &Filter) -> SightlineResult<Option<Document>> {
        let partition = self.partition_for(filter);
        self.ensure_fresh(&partition).await?;
        self.store.find_one(&self.config.name, filter).await
    }

    /// Build an aggregation over the view. Nothing runs until
    /// [`AggregateQuery::execute`]; the freshness check happens there,
    /// keyed off the pipeline's leading match stage.
    pub fn aggregate(&self, pipeline: AggregatePipeline) -> AggregateQuery<'_, C> {
        AggregateQuery::new(self, pipeline)
    }

    /// Make sure a partition is fresh, refreshing it if needed.
    ///
    /// Holds the partition's mutex for the whole decision. Callers
    /// queued behind an in-flight refresh re-check once they acquire the
    /// lock and return on the fast path.
    pub async fn ensure_fresh(&self, partition: &Partition) -> SightlineResult<()> {
        let slot = self.registry.slot(partition.key())?;
        let mut state = slot.lock().await;

        let now = Utc::now();
        if !self.staleness.is_past_expiry(state.last_known_refresh, now) {
            self.stats.record_fast_path_hit();
            return Ok(());
        }

        self.stats.record_authoritative_check();
        let stored = self.last_updated(partition).await?;
        if self.staleness.is_past_expiry(stored, now) {
            // Data looks expired: clear dangling documents first so the
            // refresh does not resurrect entries for deleted sources.
            let report = self
                .computation
                .clear_non_existing()
                .await
                .map_err(|error| RefreshError::garbage_collection(&self.config.name, error))?;
            self.stats.record_gc_pass();
            debug!(
                view = %self.config.name,
                partition = %partition.key(),
                deleted = report.deleted,
                "cleared view documents without live sources"
            );
        } else {
            // Storage is fresh; only this process's memory was cold.
            state.last_known_refresh = stored;
            return Ok(());
        }

        // Re-read after garbage collection. A concurrent pass in another
        // process may have refreshed the partition in the meantime, in
        // which case caching its instant is enough.
        let stored = self.last_updated(partition).await?;
        state.last_known_refresh = stored;
        if self.staleness.is_past_expiry(stored, now) {
            let refreshed_at = Utc::now();
            let outcome = self.perform_refresh(partition, refreshed_at).await?;
            state.last_known_refresh = Some(refreshed_at);
            self.stats.record_refresh_pass();
            info!(
                view = %self.config.name,
                partition = %partition.key(),
                pass_id = %outcome.pass_id,
                units_total = outcome.units_total,
                units_failed = outcome.units_failed,
                ops_enqueued = outcome.ops_enqueued,
                batches_written = outcome.flush.batches_written,
                batches_failed = outcome.flush.batches_failed,
                "refreshed view partition"
            );
        }
        Ok(())
    }

    /// Refresh a partition unconditionally, regardless of staleness.
    /// This is how zero-TTL views pick up new data after their first
    /// pass, and the hook for operational tooling; it serializes with
    /// on-demand refreshes through the same partition mutex.
    pub async fn refresh_now(&self, partition: &Partition) -> SightlineResult<RefreshOutcome> {
        let slot = self.registry.slot(partition.key())?;
        let mut state = slot.lock().await;

        let refreshed_at = Utc::now();
        let outcome = self.perform_refresh(partition, refreshed_at).await?;
        state.last_known_refresh = Some(refreshed_at);
        self.stats.record_refresh_pass();
        info!(
            view = %self.config.name,
            partition = %partition.key(),
            pass_id = %outcome.pass_id,
            units_total = outcome.units_total,
            units_failed = outcome.units_failed,
            "refreshed view partition on request"
        );
        Ok(outcome)
    }

    /// Authoritative refresh instant for a partition: the maximum
    /// `last_updated` among its documents. `None` means never refreshed
    /// (or the field is missing from every document, which counts as
    /// the same thing).
    pub async fn last_updated(&self, partition: &Partition) -> SightlineResult<Option<Timestamp>> {
        let docs = self
            .store
            .find(
                &self.config.name,
                partition.filter(),
                FindOptions::new()
                    .with_sort(LAST_UPDATED_FIELD, SortOrder::Desc)
                    .with_limit(1),
            )
            .await?;
        Ok(docs
            .first()
            .and_then(|doc| doc.get(LAST_UPDATED_FIELD))
            .and_then(parse_timestamp))
    }

    /// Delete every document of the view and forget all cached
    /// staleness state. Waits for in-flight refreshes to finish.
    pub async fn clear_all(&self) -> SightlineResult<DeleteReport> {
        let report = self
            .store
            .delete_many(&self.config.name, &Filter::empty())
            .await?;
        self.registry.invalidate_all().await?;
        info!(view = %self.config.name, deleted = report.deleted, "cleared view");
        Ok(report)
    }

    /// Retention pruning: delete documents whose time window is not in
    /// the keep list. An empty keep list deletes everything. Cached
    /// staleness state is dropped so pruned partitions re-verify on
    /// their next read.
    pub async fn clear_unused_ranges(&self, keep: &[DateRange]) -> SightlineResult<DeleteReport> {
        let (start_field, end_field) = (&self.config.range_fields.0, &self.config.range_fields.1);
        let branches: Vec<Filter> = keep
            .iter()
            .map(|range| range.to_partition_filter(start_field, end_field))
            .collect();
        let report = self
            .store
            .delete_many(&self.config.name, &Filter::none_of(branches))
            .await?;
        self.registry.invalidate_all().await?;
        info!(
            view = %self.config.name,
            kept_ranges = keep.len(),
            deleted = report.deleted,
            "pruned view ranges"
        );
        Ok(report)
    }

    /// Extract the partition a query filter addresses, logging anything
    /// the extraction had to skip.
    pub(crate) fn partition_for(&self, filter: &Filter) -> Partition {
        let extraction = Partition::from_query_filter(filter, &self.config.partition_key_fields);
        if extraction.skipped_combinators {
            warn!(
                view = %self.config.name,
                "query filter has top-level combinators; they do not narrow the refresh partition"
            );
        }
        if !extraction.missing_fields.is_empty() {
            warn!(
                view = %self.config.name,
                missing = ?extraction.missing_fields,
                "query filter does not pin all partition fields; staleness is checked against the wider partition"
            );
        }
        extraction.partition
    }

    pub(crate) async fn run_pipeline(
        &self,
        pipeline: &AggregatePipeline,
    ) -> SightlineResult<Vec<Document>> {
        self.store.aggregate(&self.config.name, pipeline).await
    }

    /// One refresh pass: plan, recompute with bounded concurrency,
    /// flush.
    ///
    /// Unit failures are logged and skipped; their documents keep their
    /// previous contents and age out on a later pass. The final flush
    /// runs whether or not the pass succeeded, so operations enqueued
    /// before a failure are never stranded in the buffer.
    async fn perform_refresh(
        &self,
        partition: &Partition,
        refreshed_at: Timestamp,
    ) -> SightlineResult<RefreshOutcome> {
        let pass_id = new_entity_id();
        let batcher = WriteBatcher::new(
            Arc::clone(&self.store),
            self.config.name.clone(),
            self.config.batch_size,
        );

        let plan = match self.computation.prepare_refresh_context(partition).await {
            Ok(plan) => Ok(plan),
            Err(error) => {
                error!(
                    view = %self.config.name,
                    partition = %partition.key(),
                    pass_id = %pass_id,
                    %error,
                    "refresh context preparation failed; aborting pass"
                );
                Err(RefreshError::context_preparation(&self.config.name, error))
            }
        };

        let (units_total, units_failed, ops_enqueued) = match &plan {
            Ok(plan) => self.run_units(plan, &batcher, refreshed_at).await,
            Err(_) => (0, 0, 0),
        };

        batcher.flush().await;
        let flush = batcher.report().await;
        plan?;

        Ok(RefreshOutcome {
            pass_id,
            refreshed_at,
            units_total,
            units_failed,
            ops_enqueued,
            flush,
        })
    }

    /// Recompute every unit of a plan, at most `batch_size` in flight.
    async fn run_units(
        &self,
        plan: &RefreshPlan<C>,
        batcher: &WriteBatcher,
        refreshed_at: Timestamp,
    ) -> (usize, usize, usize) {
        let context = &plan.context;
        let (failed, enqueued) = stream::iter(plan.base_docs.iter())
            .map(|base_doc| async move {
                match self.computation.refresh(base_doc, context).await {
                    Ok(ops) => {
                        let mut enqueued = 0usize;
                        for mut op in ops {
                            op.set.insert(
                                LAST_UPDATED_FIELD.to_string(),
                                timestamp_value(refreshed_at),
                            );
                            batcher.add(op).await;
                            enqueued += 1;
                        }
                        (0usize, enqueued)
                    }
                    Err(error) => {
                        warn!(
                            view = %self.config.name,
                            base_doc = ?base_doc,
                            %error,
                            "unit refresh failed; skipping"
                        );
                        (1usize, 0usize)
                    }
                }
            })
            // Boxing pins the borrow lifetimes here, keeping the whole
            // refresh future spawnable.
            .boxed()
            .buffer_unordered(self.config.batch_size)
            .fold((0usize, 0usize), |(failed, enqueued), (f, e)| async move {
                (failed + f, enqueued + e)
            })
            .await;
        (plan.base_docs.len(), failed, enqueued)
    }
}
