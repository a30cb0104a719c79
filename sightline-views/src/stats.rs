//! Sightline Views - Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters recorded by a view engine. Cheap to bump from concurrent
/// readers; relaxed ordering is enough for monitoring data.
#[derive(Debug, Default)]
pub struct ViewStats {
    fast_path_hits: AtomicU64,
    authoritative_checks: AtomicU64,
    refresh_passes: AtomicU64,
    gc_passes: AtomicU64,
}

impl ViewStats {
    pub fn record_fast_path_hit(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authoritative_check(&self) {
        self.authoritative_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_pass(&self) {
        self.refresh_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gc_pass(&self) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ViewStatsSnapshot {
        ViewStatsSnapshot {
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            authoritative_checks: self.authoritative_checks.load(Ordering::Relaxed),
            refresh_passes: self.refresh_passes.load(Ordering::Relaxed),
            gc_passes: self.gc_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a view's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewStatsSnapshot {
    /// Staleness checks answered from memory without touching storage.
    pub fast_path_hits: u64,
    /// Staleness checks that read the authoritative timestamp.
    pub authoritative_checks: u64,
    /// Refresh passes actually run.
    pub refresh_passes: u64,
    /// Opportunistic garbage collections run.
    pub gc_passes: u64,
}

impl ViewStatsSnapshot {
    /// Share of staleness checks served from memory.
    pub fn fast_path_rate(&self) -> f64 {
        let total = self.fast_path_hits + self.authoritative_checks;
        if total == 0 {
            return 0.0;
        }
        self.fast_path_hits as f64 / total as f64
    }
}
