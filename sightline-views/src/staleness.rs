//! Sightline Views - Staleness policy
//!
//! Pure expiry arithmetic, separated from the engine so it can be tested
//! without clocks or storage. The caller supplies `now`; the policy never
//! reads the system time.

use std::time::Duration;

use sightline_core::{Timestamp, ViewConfig};

/// Decides whether a partition's data is past its freshness budget.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    time_to_live: Duration,
}

impl StalenessPolicy {
    pub fn new(time_to_live: Duration) -> Self {
        StalenessPolicy { time_to_live }
    }

    pub fn from_config(config: &ViewConfig) -> Self {
        StalenessPolicy::new(config.time_to_live)
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Whether data last refreshed at `last_updated` has outlived its
    /// budget at `now`.
    ///
    /// Never-refreshed data (`None`) is always past expiry, whatever
    /// the TTL. Data aged exactly the TTL is still fresh; expiry
    /// requires strictly exceeding the budget. A `last_updated` in the
    /// future reads as fresh rather than wrapping. A zero TTL disables
    /// time-based expiry for data that exists, so after the first pass
    /// only an explicit refresh rewrites such a view.
    pub fn is_past_expiry(&self, last_updated: Option<Timestamp>, now: Timestamp) -> bool {
        let Some(last) = last_updated else {
            return true;
        };
        if self.time_to_live.is_zero() {
            return false;
        }
        match now.signed_duration_since(last).to_std() {
            Ok(age) => age > self.time_to_live,
            Err(_) => false,
        }
    }
}
