//! Sightline Views - Aggregation queries
//!
//! Building an aggregation and running it are separate steps so callers
//! can construct pipelines, hand them around, and inspect them before
//! anything touches storage.

use tracing::warn;

use sightline_core::{Document, Filter, SightlineResult, ViewComputation};
use sightline_storage::AggregatePipeline;

use crate::engine::View;

/// A pipeline bound to a view, not yet executed.
pub struct AggregateQuery<'a, C: ViewComputation> {
    view: &'a View<C>,
    pipeline: AggregatePipeline,
}

impl<'a, C: ViewComputation> AggregateQuery<'a, C> {
    pub(crate) fn new(view: &'a View<C>, pipeline: AggregatePipeline) -> Self {
        AggregateQuery { view, pipeline }
    }

    pub fn pipeline(&self) -> &AggregatePipeline {
        &self.pipeline
    }

    /// Refresh the partition the pipeline's leading match stage
    /// addresses, then run the pipeline.
    ///
    /// Without a leading match the engine cannot tell which slice the
    /// aggregation reads, so staleness is checked against the whole
    /// view, which refreshes the unpartitioned slice only. Starting the
    /// pipeline with a match over the partition fields keeps freshness
    /// exact.
    pub async fn execute(self) -> SightlineResult<Vec<Document>> {
        let filter = match self.pipeline.leading_match() {
            Some(filter) => filter.clone(),
            None => {
                warn!(
                    view = %self.view.config().name,
                    "aggregation has no leading match stage; staleness checked view-wide"
                );
                Filter::empty()
            }
        };
        let partition = self.view.partition_for(&filter);
        self.view.ensure_fresh(&partition).await?;
        self.view.run_pipeline(&self.pipeline).await
    }
}
