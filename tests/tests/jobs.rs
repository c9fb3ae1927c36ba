//! Incremental job, backfill, and quality monitor over an in-memory warehouse.

use chrono::Duration;
use engine_core::FeatureRow;
use integration_tests::fixtures::{self, at, date};
use integration_tests::mocks::InMemoryWarehouse;
use integration_tests::setup::TestContext;
use std::sync::Arc;
use worker::{FeatureBatch, FeaturePipeline, NotificationWorker, QualityMonitor};

/// Full recompute of everything in the warehouse up to `end`, for comparison.
async fn recompute(warehouse: &InMemoryWarehouse, entity_id: &str, as_of: chrono::DateTime<chrono::Utc>) -> Vec<FeatureRow> {
    use clickhouse_client::{DateRange, EventStore};
    let end = as_of.date_naive() - Duration::days(1);
    let events = warehouse.fetch_events(DateRange::until(end), None).await.unwrap();
    let users = warehouse.fetch_users(&[entity_id.to_string()]).await.unwrap();
    let output = FeaturePipeline::new().run(FeatureBatch::new(events, users, as_of));
    output.rows().filter(|r| r.entity_id == entity_id).cloned().collect()
}

#[tokio::test]
async fn test_first_run_processes_new_entities() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 2));
    ctx.warehouse.insert_users([fixtures::user("U1", date(2024, 3, 1))]);

    let summary = ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await.unwrap();

    assert_eq!(summary.window_start, Some(date(2024, 3, 7)));
    assert_eq!(summary.window_end, date(2024, 3, 9));
    assert_eq!(summary.entities_processed, 1);
    assert_eq!(summary.full_recomputes, 0);
    assert_eq!(summary.rows_upserted, 3);
    assert_eq!(summary.aggregates_upserted, 3);
    assert_eq!(summary.checkpoints_written, 1);
    assert!(summary.failures.is_empty());

    let checkpoint = ctx.warehouse.checkpoint("U1").unwrap();
    assert_eq!(checkpoint.last_date_processed, date(2024, 3, 9));
    assert_eq!(checkpoint.lifetime.active_days, 3);
}

#[tokio::test]
async fn test_today_is_not_processed() {
    let ctx = TestContext::new();
    let today = date(2024, 3, 10);
    ctx.warehouse.insert_events(fixtures::page_views("U1", today, 3));

    let summary = ctx.state.job.run_incremental(at(today, 12)).await.unwrap();
    assert_eq!(summary.events_read, 0);
    assert_eq!(ctx.warehouse.feature_count(), 0);
}

#[tokio::test]
async fn test_second_run_resumes_from_checkpoint() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 2));
    ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await.unwrap();

    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 10), 1, 5));
    let as_of = at(date(2024, 3, 11), 6);
    let summary = ctx.state.job.run_incremental(as_of).await.unwrap();

    // 03-08 and 03-09 are re-read but already covered.
    assert_eq!(summary.stale_events_skipped, 6);
    assert_eq!(summary.rows_upserted, 1);
    assert_eq!(summary.full_recomputes, 0);

    let stored = ctx.warehouse.features_for("U1");
    assert_eq!(stored.len(), 4);
    let expected = recompute(&ctx.warehouse, "U1", as_of).await;
    assert_eq!(stored.last(), expected.last());
    assert_eq!(stored.last().unwrap().lifetime_events, 3 * 3 + 6);
}

#[tokio::test]
async fn test_missing_checkpoint_falls_back_to_full_history() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 1), 9, 1));
    let as_of = at(date(2024, 3, 10), 6);

    let summary = ctx.state.job.run_incremental(as_of).await.unwrap();

    assert_eq!(summary.full_recomputes, 1);
    assert_eq!(summary.rows_upserted, 9);
    assert!(summary.failures.is_empty());
    assert_eq!(ctx.warehouse.features_for("U1"), recompute(&ctx.warehouse, "U1", as_of).await);
    assert_eq!(ctx.warehouse.checkpoint("U1").unwrap().last_date_processed, date(2024, 3, 9));
}

#[tokio::test]
async fn test_corrupt_checkpoint_is_rebuilt() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 5), 5, 1));
    ctx.warehouse.put_checkpoint_json("U1", "{not json");

    let summary = ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await.unwrap();

    assert_eq!(summary.full_recomputes, 1);
    assert_eq!(summary.rows_upserted, 5);
    let checkpoint = ctx.warehouse.checkpoint("U1").unwrap();
    assert_eq!(checkpoint.last_date_processed, date(2024, 3, 9));
    assert_eq!(checkpoint.lifetime.active_days, 5);
}

#[tokio::test]
async fn test_lagging_checkpoint_catches_up() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 1), 9, 2));

    let backfill = ctx
        .state
        .backfill
        .run(date(2024, 3, 3), date(2024, 3, 5), at(date(2024, 3, 10), 0))
        .await
        .unwrap();
    assert_eq!(backfill.rows_upserted, 3);
    assert_eq!(ctx.warehouse.checkpoint("U1").unwrap().last_date_processed, date(2024, 3, 5));

    let as_of = at(date(2024, 3, 10), 6);
    let summary = ctx.state.job.run_incremental(as_of).await.unwrap();

    // 03-06 sits before the look-back window but after the checkpoint.
    assert_eq!(summary.rows_upserted, 4);
    assert_eq!(summary.full_recomputes, 0);
    assert_eq!(ctx.warehouse.feature_count(), 7);
    let expected = recompute(&ctx.warehouse, "U1", as_of).await;
    assert_eq!(ctx.warehouse.features_for("U1").last(), expected.last());
}

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    ctx.warehouse.fail_next_writes(2);

    let summary = ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await.unwrap();

    assert_eq!(summary.rows_upserted, 3);
    assert!(ctx.warehouse.checkpoint("U1").is_some());
}

#[tokio::test]
async fn test_failed_row_writes_leave_checkpoint_unchanged() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    ctx.warehouse.fail_next_writes(100);

    let result = ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await;
    assert!(result.is_err());
    assert!(ctx.warehouse.checkpoint("U1").is_none());
    assert_eq!(ctx.warehouse.feature_count(), 0);

    ctx.warehouse.fail_next_writes(0);
    let summary = ctx.state.job.run_incremental(at(date(2024, 3, 10), 6)).await.unwrap();
    assert_eq!(summary.rows_upserted, 3);
    assert!(ctx.warehouse.checkpoint("U1").is_some());
}

#[tokio::test]
async fn test_rerun_after_checkpoint_failure_is_idempotent() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    let as_of = at(date(2024, 3, 10), 6);

    ctx.warehouse.set_fail_checkpoint_writes(true);
    assert!(ctx.state.job.run_incremental(as_of).await.is_err());
    let first = ctx.warehouse.features_for("U1");
    assert_eq!(first.len(), 3);

    ctx.warehouse.set_fail_checkpoint_writes(false);
    ctx.state.job.run_incremental(as_of).await.unwrap();
    assert_eq!(ctx.warehouse.features_for("U1"), first);
    assert_eq!(ctx.warehouse.aggregate_count(), 3);
}

#[tokio::test]
async fn test_leased_entities_are_skipped() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    ctx.warehouse.insert_events(fixtures::history("U2", date(2024, 3, 7), 3, 1));
    let as_of = at(date(2024, 3, 10), 6);

    let guard = ctx.state.job.leases().claim(vec!["U1".to_string()]);
    let summary = ctx.state.job.run_incremental(as_of).await.unwrap();
    assert_eq!(summary.entities_leased_elsewhere, 1);
    assert_eq!(summary.entities_processed, 1);
    assert!(ctx.warehouse.features_for("U1").is_empty());
    assert_eq!(ctx.warehouse.features_for("U2").len(), 3);

    drop(guard);
    let summary = ctx.state.job.run_incremental(as_of).await.unwrap();
    assert_eq!(summary.entities_leased_elsewhere, 0);
    assert_eq!(ctx.warehouse.features_for("U1").len(), 3);
}

#[tokio::test]
async fn test_backfill_keeps_newer_checkpoint() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 1), 9, 1));
    let as_of = at(date(2024, 3, 10), 0);

    let full = ctx.state.backfill.run(date(2024, 3, 1), date(2024, 3, 9), as_of).await.unwrap();
    assert_eq!(full.rows_upserted, 9);
    assert_eq!(full.checkpoints_written, 1);

    let partial = ctx.state.backfill.run(date(2024, 3, 3), date(2024, 3, 5), as_of).await.unwrap();
    assert_eq!(partial.rows_upserted, 3);
    assert_eq!(partial.checkpoints_written, 0);
    assert_eq!(ctx.warehouse.checkpoint("U1").unwrap().last_date_processed, date(2024, 3, 9));

    // Rows inside the range still see the full history before it.
    let rows = ctx.warehouse.features_for("U1");
    let mar5 = rows.iter().find(|r| r.feature_date == date(2024, 3, 5)).unwrap();
    assert_eq!(mar5.lifetime_active_days, 5);
}

#[tokio::test]
async fn test_backfill_rejects_inverted_range() {
    let ctx = TestContext::new();
    let err = ctx
        .state
        .backfill
        .run(date(2024, 3, 5), date(2024, 3, 1), at(date(2024, 3, 10), 0))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[tokio::test]
async fn test_quality_monitor_stores_report() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let today = date(2024, 3, 10);
    warehouse.insert_events(fixtures::page_views("U1", today - Duration::days(1), 3));
    warehouse.insert_events(fixtures::page_views("U1", today, 1));
    warehouse.insert_events([fixtures::invalid_event(at(today, 1))]);
    warehouse.insert_events(fixtures::page_views("U2", today - Duration::days(5), 2));
    warehouse.insert_users([fixtures::user("U1", date(2024, 1, 1))]);

    let monitor = QualityMonitor::new(warehouse.clone(), Arc::new(NotificationWorker::new()));
    let report = monitor.run(at(today, 2)).await.unwrap();

    assert_eq!(report.events.total_rows, 5);
    assert_eq!(report.events.invalid_rows, 1);
    assert_eq!(report.users.total_rows, 1);
    assert_eq!(warehouse.quality_reports().len(), 1);
}

#[tokio::test]
async fn test_quality_monitor_counts_events_without_timestamp() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let today = date(2024, 3, 10);
    let mut undated = fixtures::event("U1", "click", at(today, 1));
    undated.timestamp = None;
    warehouse.insert_events_ingested_on(today, fixtures::page_views("U1", today, 2));
    warehouse.insert_events_ingested_on(today, [undated]);

    let monitor = QualityMonitor::new(warehouse.clone(), Arc::new(NotificationWorker::new()));
    let report = monitor.run(at(today, 2)).await.unwrap();

    assert_eq!(report.events.total_rows, 3);
    assert_eq!(report.events.invalid_rows, 1);
    assert_eq!(report.events.violations_by_rule["missing_timestamp"], 1);
}

#[tokio::test]
async fn test_validation_alert_follows_latest_report() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let notifier = Arc::new(NotificationWorker::new());
    let monitor = QualityMonitor::new(warehouse.clone(), notifier.clone());

    let noisy_day = date(2024, 3, 10);
    warehouse.insert_events(fixtures::page_views("U1", noisy_day, 3));
    warehouse.insert_events([fixtures::invalid_event(at(noisy_day, 1))]);
    let report = monitor.run(at(noisy_day, 2)).await.unwrap();
    assert!(notifier.check_and_alert(&report).await.unwrap().is_some());

    // A clean window no longer alerts, whatever came before.
    let clean_day = date(2024, 3, 20);
    warehouse.insert_events(fixtures::page_views("U1", clean_day, 3));
    let report = monitor.run(at(clean_day, 2)).await.unwrap();
    assert_eq!(report.events.invalid_rows, 0);
    assert!(notifier.check_and_alert(&report).await.unwrap().is_none());
}
