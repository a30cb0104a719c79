//! Sightline Core - View configuration
//!
//! A view is a derived collection refreshed on demand. [`ViewConfig`]
//! carries the knobs the refresh engine reads: the collection name, the
//! staleness budget, the batch width, and which document fields identify
//! a partition.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Field stamped on every view document with the instant of the refresh
/// pass that wrote it. Staleness checks read the maximum of this field
/// per partition.
pub const LAST_UPDATED_FIELD: &str = "last_updated";

/// Default field holding a view document's window start.
pub const RANGE_START_FIELD: &str = "range_start";

/// Default field holding a view document's window end.
pub const RANGE_END_FIELD: &str = "range_end";

/// Configuration for one materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Collection the view's documents live in.
    pub name: String,
    /// How long a partition stays fresh after a refresh pass. Zero
    /// disables expiry by age: once a partition has data, only explicit
    /// refreshes rewrite it. A never-refreshed partition is stale
    /// regardless.
    pub time_to_live: Duration,
    /// Write batch size. Also used as the recompute concurrency width,
    /// so one batch's worth of units is in flight at a time.
    pub batch_size: usize,
    /// Document fields whose pinned values identify a partition.
    pub partition_key_fields: BTreeSet<String>,
    /// The fields holding a document's time window bounds. Always
    /// members of `partition_key_fields`.
    pub range_fields: (String, String),
}

impl ViewConfig {
    /// A config with the conventional range fields, a one hour TTL, and
    /// batches of 100.
    pub fn new(name: impl Into<String>) -> Self {
        ViewConfig {
            name: name.into(),
            time_to_live: Duration::from_secs(3600),
            batch_size: 100,
            partition_key_fields: [RANGE_START_FIELD, RANGE_END_FIELD]
                .into_iter()
                .map(String::from)
                .collect(),
            range_fields: (RANGE_START_FIELD.to_string(), RANGE_END_FIELD.to_string()),
        }
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Rename the window bound fields, keeping the partition key set in
    /// step.
    pub fn with_range_fields(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.partition_key_fields.remove(&self.range_fields.0);
        self.partition_key_fields.remove(&self.range_fields.1);
        let start = start.into();
        let end = end.into();
        self.partition_key_fields.insert(start.clone());
        self.partition_key_fields.insert(end.clone());
        self.range_fields = (start, end);
        self
    }

    /// Add a partition key field beyond the window bounds, for views
    /// partitioned by more than time.
    pub fn with_partition_field(mut self, field: impl Into<String>) -> Self {
        self.partition_key_fields.insert(field.into());
        self
    }

    /// A zero TTL means computed data never ages out; after the first
    /// pass only explicit refreshes rewrite the view.
    pub fn manual_refresh_only(&self) -> bool {
        self.time_to_live.is_zero()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "name",
                &self.name,
                "must not be empty",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "batch_size",
                self.batch_size,
                "must be at least 1",
            ));
        }
        if self.range_fields.0 == self.range_fields.1 {
            return Err(ConfigError::invalid_value(
                "range_fields",
                &self.range_fields.0,
                "start and end fields must differ",
            ));
        }
        if !self.partition_key_fields.contains(&self.range_fields.0)
            || !self.partition_key_fields.contains(&self.range_fields.1)
        {
            return Err(ConfigError::invalid_value(
                "partition_key_fields",
                format!("{:?}", self.partition_key_fields),
                "must contain both range fields",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ViewConfig::new("page_engagement");
        assert!(config.validate().is_ok());
        assert!(!config.manual_refresh_only());
        assert!(config.partition_key_fields.contains(RANGE_START_FIELD));
        assert!(config.partition_key_fields.contains(RANGE_END_FIELD));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = ViewConfig::new("page_engagement").with_batch_size(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(ViewConfig::new("  ").validate().is_err());
    }

    #[test]
    fn renaming_range_fields_updates_the_partition_set() {
        let config = ViewConfig::new("v").with_range_fields("window_from", "window_to");
        assert!(config.validate().is_ok());
        assert!(config.partition_key_fields.contains("window_from"));
        assert!(config.partition_key_fields.contains("window_to"));
        assert!(!config.partition_key_fields.contains(RANGE_START_FIELD));
        assert_eq!(config.partition_key_fields.len(), 2);
    }

    #[test]
    fn identical_range_fields_are_rejected() {
        let config = ViewConfig::new("v").with_range_fields("window", "window");
        assert!(config.validate().is_err());
    }

    #[test]
    fn extra_partition_fields_are_kept() {
        let config = ViewConfig::new("v").with_partition_field("site_id");
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_key_fields.len(), 3);
    }

    #[test]
    fn zero_ttl_marks_manual_refresh() {
        let config = ViewConfig::new("v").with_time_to_live(Duration::ZERO);
        assert!(config.validate().is_ok());
        assert!(config.manual_refresh_only());
    }
}
