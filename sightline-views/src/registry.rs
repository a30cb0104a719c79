//! Sightline Views - Partition registry
//!
//! One slot per partition key, created on first touch and kept for the
//! life of the process. Each slot carries the partition's in-memory
//! staleness state behind an async mutex; the engine holds that mutex
//! across a whole refresh pass, which is what collapses a stampede of
//! concurrent readers into a single refresh.
//!
//! Two locks, two jobs: the registry's own `std::sync::Mutex` only
//! guards slot creation and is never held across `.await`; the per-slot
//! `tokio::sync::Mutex` is exactly the one held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sightline_core::{PartitionKey, SightlineResult, StoreError, Timestamp};

/// Per-partition staleness state, guarded by the slot's mutex.
#[derive(Debug, Default)]
pub struct PartitionState {
    /// Most recent refresh instant this process knows about, from its
    /// own passes or from authoritative reads. `None` until the first
    /// storage check.
    pub last_known_refresh: Option<Timestamp>,
}

/// One partition's slot: the async mutex the engine holds across a
/// refresh pass, plus the state it protects.
#[derive(Debug, Default)]
pub struct PartitionSlot {
    state: tokio::sync::Mutex<PartitionState>,
}

impl PartitionSlot {
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, PartitionState> {
        self.state.lock().await
    }
}

/// Registry of partition slots for one view.
///
/// Slots are never evicted; the map grows with the number of distinct
/// partitions touched, which for time-windowed views is small and
/// bounded by query patterns.
#[derive(Debug, Default)]
pub struct PartitionRegistry {
    slots: Mutex<HashMap<PartitionKey, Arc<PartitionSlot>>>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        PartitionRegistry::default()
    }

    /// The slot for a key, created on first use. Callers clone the
    /// `Arc` out so the registry lock is released before any await.
    pub fn slot(&self, key: &PartitionKey) -> SightlineResult<Arc<PartitionSlot>> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Arc::clone(slots.entry(key.clone()).or_default()))
    }

    /// Number of partitions touched so far.
    pub fn len(&self) -> SightlineResult<usize> {
        let slots = self.slots.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(slots.len())
    }

    pub fn is_empty(&self) -> SightlineResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every slot's cached refresh instant, forcing the next read
    /// of each partition back through the authoritative check.
    ///
    /// Locks each slot in turn, so this waits for in-flight refreshes
    /// rather than yanking state out from under them. The registry
    /// mutex is released before the first await.
    pub async fn invalidate_all(&self) -> SightlineResult<()> {
        let slots: Vec<Arc<PartitionSlot>> = {
            let slots = self.slots.lock().map_err(|_| StoreError::LockPoisoned)?;
            slots.values().cloned().collect()
        };
        for slot in slots {
            slot.lock().await.last_known_refresh = None;
        }
        Ok(())
    }
}
