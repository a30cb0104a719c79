//! Facade behavior: queries that refresh what they touch, the deferred
//! aggregation path, retention maintenance, and a daily index loaded
//! from a view collection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;

use sightline_core::{
    timestamp_value, DateRange, Filter, Partition, SightlineError, ViewConfig,
};
use sightline_storage::{
    Accumulator, AggregatePipeline, FindOptions, MemoryStore, SortOrder, GROUP_KEY,
};
use sightline_test_utils::{RecordingStore, ScriptedComputation};
use sightline_views::{DailyMetricsIndex, DayIndexConfig, View};

const VIEW: &str = "page_engagement";

fn jan(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
}

fn window(d: u32) -> DateRange {
    DateRange::for_day(jan(d))
}

struct Rig {
    memory: Arc<MemoryStore>,
    recording: Arc<RecordingStore>,
    view: View<ScriptedComputation>,
}

fn rig(pages: &[&str]) -> Rig {
    let memory = Arc::new(MemoryStore::new());
    let recording = Arc::new(RecordingStore::over(memory.clone()));
    let comp = ScriptedComputation::new(memory.clone(), VIEW).with_pages(pages.iter().copied());
    let config = ViewConfig::new(VIEW)
        .with_time_to_live(Duration::from_secs(3600))
        .with_batch_size(2);
    let view = View::new(config, recording.clone(), comp).unwrap();
    Rig {
        memory,
        recording,
        view,
    }
}

#[tokio::test]
async fn find_refreshes_the_partition_then_applies_the_filter() {
    let rig = rig(&["p1", "p2"]);
    rig.view.computation().set_views("p1", 3);
    rig.view.computation().set_views("p2", 8);

    let partition = rig.view.partition_for_range(&window(5));
    let filter = partition.filter().clone().and_eq("page_id", "p2");
    let docs = rig.view.find(&filter, FindOptions::new()).await.unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["views"], json!(8));
    // The filter narrowed the result, not the refresh: both pages of
    // the partition were recomputed.
    assert_eq!(rig.view.computation().prepare_calls(), 1);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 2);
}

#[tokio::test]
async fn find_passes_sort_and_limit_through_to_storage() {
    let rig = rig(&["p1", "p2", "p3"]);
    rig.view.computation().set_views("p1", 3);
    rig.view.computation().set_views("p2", 8);
    rig.view.computation().set_views("p3", 5);

    let partition = rig.view.partition_for_range(&window(5));
    let docs = rig
        .view
        .find(
            partition.filter(),
            FindOptions::new()
                .with_sort("views", SortOrder::Desc)
                .with_limit(2),
        )
        .await
        .unwrap();

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["page_id"], json!("p2"));
    assert_eq!(docs[1]["page_id"], json!("p3"));
}

#[tokio::test]
async fn find_one_returns_a_single_fresh_document() {
    let rig = rig(&["p1", "p2"]);
    rig.view.computation().set_views("p1", 3);

    let partition = rig.view.partition_for_range(&window(5));
    let filter = partition.filter().clone().and_eq("page_id", "p1");
    let doc = rig.view.find_one(&filter).await.unwrap().unwrap();
    assert_eq!(doc["views"], json!(3));

    let absent = rig
        .view
        .find_one(&partition.filter().clone().and_eq("page_id", "p9"))
        .await
        .unwrap();
    assert!(absent.is_none());
}

#[tokio::test]
async fn aggregation_runs_nothing_until_execute() {
    let rig = rig(&["p1", "p2"]);
    rig.view.computation().set_views("p1", 3);
    rig.view.computation().set_views("p2", 8);

    let partition = rig.view.partition_for_range(&window(5));
    let pipeline = AggregatePipeline::new()
        .matching(partition.filter().clone())
        .group("page_id", vec![Accumulator::sum("total_views", "views")])
        .sort(GROUP_KEY, SortOrder::Asc);

    let query = rig.view.aggregate(pipeline);
    assert_eq!(rig.view.computation().prepare_calls(), 0);

    let rows = query.execute().await.unwrap();
    assert_eq!(rig.view.computation().prepare_calls(), 1);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][GROUP_KEY], json!("p1"));
    assert_eq!(rows[0]["total_views"], json!(3.0));
    assert_eq!(rows[1][GROUP_KEY], json!("p2"));
    assert_eq!(rows[1]["total_views"], json!(8.0));
}

#[tokio::test]
async fn aggregation_without_a_leading_match_checks_the_whole_view() {
    let rig = rig(&["p1", "p2"]);
    rig.view.computation().set_views("p1", 3);
    rig.view.computation().set_views("p2", 8);

    let pipeline = AggregatePipeline::new().group(
        "page_id",
        vec![Accumulator::sum("total_views", "views")],
    );
    let rows = rig.view.aggregate(pipeline).execute().await.unwrap();

    // The unpartitioned slice was refreshed on the way in.
    assert_eq!(rig.view.computation().prepare_calls(), 1);
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn partially_pinned_filters_fall_back_to_a_wider_partition() {
    let rig = rig(&["p1", "p2"]);
    let start = timestamp_value(window(5).start());
    let filter = Filter::eq("range_start", start);

    let docs = rig.view.find(&filter, FindOptions::new()).await.unwrap();
    assert_eq!(rig.view.computation().prepare_calls(), 1);
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn clear_all_empties_the_view_and_forces_a_rebuild() {
    let rig = rig(&["p1", "p2"]);
    let partition = rig.view.partition_for_range(&window(5));
    rig.view.ensure_fresh(&partition).await.unwrap();
    assert_eq!(rig.memory.count(VIEW).unwrap(), 2);

    let report = rig.view.clear_all().await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 0);

    // Cached staleness state went with the documents; the next read
    // rebuilds rather than trusting its memory.
    rig.view.ensure_fresh(&partition).await.unwrap();
    assert_eq!(rig.view.computation().prepare_calls(), 2);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 2);
}

#[tokio::test]
async fn retention_keeps_named_ranges_and_reverifies_the_rest() {
    let rig = rig(&["p1", "p2"]);
    let day5 = rig.view.partition_for_range(&window(5));
    let day6 = rig.view.partition_for_range(&window(6));
    rig.view.ensure_fresh(&day5).await.unwrap();
    rig.view.ensure_fresh(&day6).await.unwrap();
    assert_eq!(rig.memory.count(VIEW).unwrap(), 4);

    let report = rig.view.clear_unused_ranges(&[window(5)]).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 2);

    // The kept range re-verifies against storage and stays as it is.
    rig.view.ensure_fresh(&day5).await.unwrap();
    assert_eq!(rig.view.computation().prepare_calls(), 2);

    // The pruned range is rebuilt on its next read.
    rig.view.ensure_fresh(&day6).await.unwrap();
    assert_eq!(rig.view.computation().prepare_calls(), 3);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 4);
}

#[tokio::test]
async fn an_empty_keep_list_prunes_everything() {
    let rig = rig(&["p1"]);
    let partition = rig.view.partition_for_range(&window(5));
    rig.view.ensure_fresh(&partition).await.unwrap();

    let report = rig.view.clear_unused_ranges(&[]).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(rig.memory.count(VIEW).unwrap(), 0);
}

#[tokio::test]
async fn storage_failures_surface_to_the_caller() {
    let rig = rig(&["p1"]);
    rig.recording.set_fail_find(true);

    let partition = rig.view.partition_for_range(&window(5));
    let err = rig
        .view
        .find(partition.filter(), FindOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::Store(_)));
}

#[tokio::test]
async fn last_updated_is_the_maximum_over_the_partition() {
    let rig = rig(&["p1", "p2"]);
    let day5 = rig.view.partition_for_range(&window(5));
    let day6 = rig.view.partition_for_range(&window(6));

    rig.view.ensure_fresh(&day5).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    rig.view.ensure_fresh(&day6).await.unwrap();

    let t5 = rig.view.last_updated(&day5).await.unwrap().unwrap();
    let t6 = rig.view.last_updated(&day6).await.unwrap().unwrap();
    assert!(t6 > t5);

    // The unpartitioned slice spans every document, so its instant is
    // the view-wide maximum.
    let wide = Partition::from_query_filter(&Filter::empty(), &BTreeSet::new()).partition;
    assert_eq!(rig.view.last_updated(&wide).await.unwrap(), Some(t6));
}

#[tokio::test]
async fn stats_reflect_the_traffic_mix() {
    let rig = rig(&["p1"]);
    let partition = rig.view.partition_for_range(&window(5));

    rig.view.ensure_fresh(&partition).await.unwrap();
    rig.view.ensure_fresh(&partition).await.unwrap();

    let stats = rig.view.stats();
    assert_eq!(stats.authoritative_checks, 1);
    assert_eq!(stats.refresh_passes, 1);
    assert_eq!(stats.gc_passes, 1);
    assert_eq!(stats.fast_path_hits, 1);
    assert!((stats.fast_path_rate() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn daily_index_loads_from_a_refreshed_view_collection() {
    let rig = rig(&["p1", "p2"]);

    rig.view.computation().set_views("p1", 3);
    rig.view.computation().set_views("p2", 8);
    let day5 = rig.view.partition_for_range(&window(5));
    rig.view.ensure_fresh(&day5).await.unwrap();

    rig.view.computation().set_views("p1", 4);
    rig.view.computation().set_views("p2", 9);
    let day6 = rig.view.partition_for_range(&window(6));
    rig.view.ensure_fresh(&day6).await.unwrap();

    let span = DateRange::new(window(5).start(), window(7).start()).unwrap();
    let config = DayIndexConfig::new(VIEW, "page_id", "range_start", span)
        .with_metric("views")
        .with_slice(span);
    let index = DailyMetricsIndex::new(config, rig.memory.clone()).unwrap();

    let report = index.load().await.unwrap();
    assert_eq!(report.days_scanned, 2);
    assert_eq!(report.entities, 2);
    assert_eq!(report.slices, 2);

    let totals = index.totals("p1", &span).unwrap().unwrap();
    assert_eq!(totals["views"], 7.0);
    let series = index.metrics_by_day("p2", &span).unwrap().unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].day, jan(5));
    assert_eq!(series[0].metric("views"), 8.0);
    assert_eq!(series[1].metric("views"), 9.0);
}
