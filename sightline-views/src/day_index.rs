//! Sightline Views - Day metrics index
//!
//! Dashboards ask the same shape of question over and over: "this
//! entity's daily numbers for this comparison range". The index answers
//! those from memory. [`DailyMetricsIndex::load`] aggregates the backing
//! collection one day at a time, builds a per-entity daily series, and
//! pre-slices each series by the configured comparison ranges; lookups
//! after that are lock-and-clone cheap.
//!
//! The index is a read-side cache over already-fresh view documents.
//! Refreshing the view and reloading the index are the caller's two
//! steps; the index itself never triggers a refresh.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use sightline_core::{ConfigError, DateRange, SightlineResult, StoreError};
use sightline_storage::{Accumulator, AggregatePipeline, DocumentStore, GROUP_KEY};

/// Configuration for a day metrics index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayIndexConfig {
    /// Collection holding the daily documents, usually a view.
    pub collection: String,
    /// Field identifying the entity a document belongs to.
    pub entity_field: String,
    /// Field holding the document's day, in the canonical timestamp
    /// encoding.
    pub date_field: String,
    /// Metric fields summed per entity per day.
    pub metrics: Vec<String>,
    /// Full window the index covers.
    pub span: DateRange,
    /// Comparison ranges pre-sliced at load time. Lookups only work for
    /// these exact ranges.
    pub slices: Vec<DateRange>,
}

impl DayIndexConfig {
    pub fn new(
        collection: impl Into<String>,
        entity_field: impl Into<String>,
        date_field: impl Into<String>,
        span: DateRange,
    ) -> Self {
        DayIndexConfig {
            collection: collection.into(),
            entity_field: entity_field.into(),
            date_field: date_field.into(),
            metrics: Vec::new(),
            span,
            slices: Vec::new(),
        }
    }

    pub fn with_metric(mut self, field: impl Into<String>) -> Self {
        self.metrics.push(field.into());
        self
    }

    pub fn with_slice(mut self, range: DateRange) -> Self {
        self.slices.push(range);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::invalid_value(
                "metrics",
                "[]",
                "at least one metric field is required",
            ));
        }
        if self.slices.is_empty() {
            return Err(ConfigError::invalid_value(
                "slices",
                "[]",
                "at least one comparison range is required",
            ));
        }
        if self.entity_field == self.date_field {
            return Err(ConfigError::invalid_value(
                "date_field",
                &self.date_field,
                "must differ from entity_field",
            ));
        }
        Ok(())
    }
}

/// One entity's metrics for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMetrics {
    pub day: NaiveDate,
    pub metrics: BTreeMap<String, f64>,
}

impl DayMetrics {
    /// A metric's value, zero when absent.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

/// What a [`DailyMetricsIndex::load`] pass saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayIndexLoadReport {
    pub days_scanned: usize,
    pub entities: usize,
    pub slices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SliceKey {
    entity: String,
    range: DateRange,
}

/// In-memory per-entity daily metric series, pre-sliced by comparison
/// range.
pub struct DailyMetricsIndex {
    config: DayIndexConfig,
    store: Arc<dyn DocumentStore>,
    slices: RwLock<HashMap<SliceKey, Arc<Vec<DayMetrics>>>>,
}

impl DailyMetricsIndex {
    pub fn new(config: DayIndexConfig, store: Arc<dyn DocumentStore>) -> SightlineResult<Self> {
        config.validate()?;
        Ok(DailyMetricsIndex {
            config,
            store,
            slices: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DayIndexConfig {
        &self.config
    }

    /// Rebuild the index from storage, replacing previous contents in
    /// one swap. Readers see either the old or the new index, never a
    /// mix.
    pub async fn load(&self) -> SightlineResult<DayIndexLoadReport> {
        let days = self.config.span.days();
        let mut per_entity: HashMap<String, Vec<DayMetrics>> = HashMap::new();

        for day in &days {
            let accumulators: Vec<Accumulator> = self
                .config
                .metrics
                .iter()
                .map(|m| Accumulator::sum(m.clone(), m.clone()))
                .collect();
            let pipeline = AggregatePipeline::new()
                .matching(DateRange::for_day(*day).to_bounds_filter(&self.config.date_field))
                .group(self.config.entity_field.clone(), accumulators);
            let rows = self.store.aggregate(&self.config.collection, &pipeline).await?;

            for row in rows {
                let Some(entity) = entity_key(row.get(GROUP_KEY)) else {
                    warn!(
                        collection = %self.config.collection,
                        day = %day,
                        "dropping aggregation row without an entity key"
                    );
                    continue;
                };
                let mut metrics = BTreeMap::new();
                for name in &self.config.metrics {
                    let value = row.get(name).and_then(Value::as_f64).unwrap_or(0.0);
                    metrics.insert(name.clone(), value);
                }
                per_entity
                    .entry(entity)
                    .or_default()
                    .push(DayMetrics { day: *day, metrics });
            }
        }

        // Days were scanned in order, so each series is already sorted;
        // keep the invariant explicit anyway.
        for series in per_entity.values_mut() {
            series.sort_by_key(|m| m.day);
        }

        let mut slices: HashMap<SliceKey, Arc<Vec<DayMetrics>>> = HashMap::new();
        for (entity, series) in &per_entity {
            for range in &self.config.slices {
                let slice: Vec<DayMetrics> = series
                    .iter()
                    .filter(|m| range.contains_day(m.day))
                    .cloned()
                    .collect();
                slices.insert(
                    SliceKey {
                        entity: entity.clone(),
                        range: *range,
                    },
                    Arc::new(slice),
                );
            }
        }

        let report = DayIndexLoadReport {
            days_scanned: days.len(),
            entities: per_entity.len(),
            slices: slices.len(),
        };
        *self.slices.write().map_err(|_| StoreError::LockPoisoned)? = slices;
        info!(
            collection = %self.config.collection,
            days_scanned = report.days_scanned,
            entities = report.entities,
            slices = report.slices,
            "loaded day metrics index"
        );
        Ok(report)
    }

    /// Whether the index has a slice for this entity and range. An
    /// entity with no activity in the range still answers `true` (with
    /// an empty series) as long as it appeared anywhere in the span;
    /// `false` means the entity is unknown or the range was never
    /// configured.
    pub fn contains(&self, entity: &str, range: &DateRange) -> SightlineResult<bool> {
        let slices = self.slices.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(slices.contains_key(&SliceKey {
            entity: entity.to_string(),
            range: *range,
        }))
    }

    /// The entity's daily series for a configured comparison range,
    /// sorted by day.
    pub fn metrics_by_day(
        &self,
        entity: &str,
        range: &DateRange,
    ) -> SightlineResult<Option<Arc<Vec<DayMetrics>>>> {
        let slices = self.slices.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(slices
            .get(&SliceKey {
                entity: entity.to_string(),
                range: *range,
            })
            .cloned())
    }

    /// Per-metric totals over a slice. Zero-filled for an entity with
    /// no activity in the range, `None` for an unknown entity or range.
    pub fn totals(
        &self,
        entity: &str,
        range: &DateRange,
    ) -> SightlineResult<Option<BTreeMap<String, f64>>> {
        let Some(series) = self.metrics_by_day(entity, range)? else {
            return Ok(None);
        };
        let mut totals = BTreeMap::new();
        for name in &self.config.metrics {
            let sum: f64 = series.iter().map(|m| m.metric(name)).sum();
            totals.insert(name.clone(), sum);
        }
        Ok(Some(totals))
    }

    /// Number of (entity, range) slices currently held.
    pub fn slice_count(&self) -> SightlineResult<usize> {
        let slices = self.slices.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(slices.len())
    }

    /// Drop everything; the index answers nothing until the next load.
    pub fn clear(&self) -> SightlineResult<()> {
        self.slices
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

/// Group keys become entity ids by stringifying: strings as-is, numbers
/// via their decimal form. Null (documents missing the entity field)
/// yields no key.
fn entity_key(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
