//! Sightline Views - on-demand materialized view refresh
//!
//! Analytics queries are too slow to run against raw event data on every
//! request, and too volatile to precompute on a schedule. This crate
//! takes the middle road: views materialize into ordinary document
//! collections and refresh lazily, at read time, only for the slice of
//! data a query actually touches.
//!
//! The moving parts:
//!
//! - [`engine::View`] is the orchestrator. Its facade methods check
//!   staleness for the partition a query addresses, run a refresh pass
//!   when needed, then serve the query from storage.
//! - [`staleness::StalenessPolicy`] is the pure expiry arithmetic; the
//!   authoritative input is the maximum `last_updated` stamp among a
//!   partition's documents.
//! - [`registry::PartitionRegistry`] serializes refreshes per partition.
//!   A stampede of readers on a stale partition produces one refresh.
//! - [`batcher::WriteBatcher`] groups refresh output into bulk upserts.
//! - [`day_index::DailyMetricsIndex`] is a read-side cache of per-entity
//!   daily metric series for dashboard comparison ranges.
//!
//! Domain logic plugs in through `sightline_core::ViewComputation`;
//! storage plugs in through `sightline_storage::DocumentStore`.

pub mod batcher;
pub mod day_index;
pub mod engine;
pub mod query;
pub mod registry;
pub mod staleness;
pub mod stats;

pub use batcher::{FlushReport, WriteBatcher};
pub use day_index::{DailyMetricsIndex, DayIndexConfig, DayIndexLoadReport, DayMetrics};
pub use engine::{RefreshOutcome, View};
pub use query::AggregateQuery;
pub use staleness::StalenessPolicy;
pub use stats::{ViewStats, ViewStatsSnapshot};
