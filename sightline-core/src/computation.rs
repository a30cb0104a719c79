//! Sightline Core - View computation capability
//!
//! Each view supplies the domain logic for rebuilding its documents by
//! implementing [`ViewComputation`]. The refresh engine owns scheduling,
//! batching, and staleness; implementations only answer three questions:
//! what needs recomputing, how one unit recomputes, and which documents
//! no longer correspond to live source data.

use std::fmt;

use async_trait::async_trait;

use crate::{DeleteReport, Partition, SightlineResult, WriteOp};

/// Everything a refresh pass needs before recomputing: the units of work
/// and the shared context they read.
///
/// The context is computed once per pass and borrowed by every unit, so
/// per-pass lookups (dimension tables, configuration snapshots) are not
/// repeated per unit.
pub struct RefreshPlan<C: ViewComputation + ?Sized> {
    pub base_docs: Vec<C::BaseDoc>,
    pub context: C::Context,
}

/// Domain logic for one materialized view.
///
/// Implementations must produce idempotent [`WriteOp`]s: replaying a
/// unit's output, in any interleaving with a concurrent pass in another
/// process, must converge to the same stored state. The engine treats a
/// unit failure as data to log and skip, never as a reason to abort the
/// pass, so a unit must not leave partial state behind on error.
#[async_trait]
pub trait ViewComputation: Send + Sync {
    /// One unit of recomputation, typically a source entity within the
    /// partition. `Debug` output identifies the unit in skip logs.
    type BaseDoc: fmt::Debug + Send + Sync;

    /// Shared per-pass context.
    type Context: Send + Sync;

    /// Enumerate the units covering `partition` and build the shared
    /// context. Failure here aborts the pass before any recompute runs.
    async fn prepare_refresh_context(
        &self,
        partition: &Partition,
    ) -> SightlineResult<RefreshPlan<Self>>;

    /// Recompute one unit, returning the upserts that bring its view
    /// documents up to date. One unit may produce any number of
    /// operations, including none.
    async fn refresh(
        &self,
        base_doc: &Self::BaseDoc,
        context: &Self::Context,
    ) -> SightlineResult<Vec<WriteOp>>;

    /// Delete view documents whose source entities no longer exist.
    /// Runs opportunistically when a staleness check sees a partition
    /// past its budget.
    async fn clear_non_existing(&self) -> SightlineResult<DeleteReport>;
}
