//! Sightline Views - Write batching
//!
//! Refresh passes enqueue [`WriteOp`]s one unit at a time; the batcher
//! groups them into bulk upserts so a pass touching thousands of units
//! issues a bounded number of storage calls. A batch write that fails is
//! logged and dropped. Refresh output is reproducible, so the loss heals
//! on the next pass; propagating the failure would instead abort the
//! pass and lose the batches that did land.

use std::mem;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use sightline_core::{BulkWriteReport, WriteOp};
use sightline_storage::DocumentStore;

/// Totals for one batcher's lifetime, across automatic and explicit
/// flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub batches_written: u64,
    pub batches_failed: u64,
    /// Operations handed to storage in successful batches.
    pub ops_flushed: u64,
    /// Operations lost in failed batches.
    pub ops_dropped: u64,
    /// Combined storage report from successful batches.
    pub write: BulkWriteReport,
}

#[derive(Debug, Default)]
struct BatchState {
    pending: Vec<WriteOp>,
    report: FlushReport,
}

/// Buffers write operations and flushes them in batches.
pub struct WriteBatcher {
    store: Arc<dyn DocumentStore>,
    collection: String,
    batch_size: usize,
    state: Mutex<BatchState>,
}

impl WriteBatcher {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, batch_size: usize) -> Self {
        WriteBatcher {
            store,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Enqueue one operation. When the buffer reaches the batch size the
    /// calling task writes it out; the buffer lock is not held across
    /// the storage call, so concurrent producers keep enqueuing.
    pub async fn add(&self, op: WriteOp) {
        let full = {
            let mut state = self.state.lock().await;
            state.pending.push(op);
            if state.pending.len() >= self.batch_size {
                Some(mem::take(&mut state.pending))
            } else {
                None
            }
        };
        if let Some(batch) = full {
            self.write_batch(batch).await;
        }
    }

    /// Write out whatever is buffered. A no-op on an empty buffer; no
    /// storage call is made.
    pub async fn flush(&self) {
        let remainder = {
            let mut state = self.state.lock().await;
            mem::take(&mut state.pending)
        };
        if !remainder.is_empty() {
            self.write_batch(remainder).await;
        }
    }

    /// Operations currently buffered.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn report(&self) -> FlushReport {
        self.state.lock().await.report
    }

    async fn write_batch(&self, batch: Vec<WriteOp>) {
        let ops = batch.len() as u64;
        match self.store.bulk_upsert(&self.collection, &batch).await {
            Ok(outcome) => {
                debug!(
                    collection = %self.collection,
                    ops,
                    upserted = outcome.upserted,
                    modified = outcome.modified,
                    "flushed write batch"
                );
                let mut state = self.state.lock().await;
                state.report.batches_written += 1;
                state.report.ops_flushed += ops;
                state.report.write.absorb(outcome);
            }
            Err(error) => {
                warn!(
                    collection = %self.collection,
                    ops,
                    %error,
                    "write batch failed; dropping batch"
                );
                let mut state = self.state.lock().await;
                state.report.batches_failed += 1;
                state.report.ops_dropped += ops;
            }
        }
    }
}
