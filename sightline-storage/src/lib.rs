//! Sightline Storage - document store abstraction
//!
//! The refresh engine talks to storage through [`DocumentStore`], an
//! async trait covering the five operations views need: filtered reads,
//! single-document reads, aggregation, idempotent bulk upserts, and bulk
//! deletes. [`MemoryStore`] is the embedded backend used in production
//! for small deployments and everywhere in tests; remote backends
//! implement the same trait by translating filters and pipelines to
//! their native query language.

pub mod memory;
pub mod pipeline;
pub mod store;

pub use memory::MemoryStore;
pub use pipeline::{AccumulateOp, Accumulator, AggregatePipeline, Stage, GROUP_KEY};
pub use store::{DocumentStore, FindOptions, SortOrder, SortSpec};
