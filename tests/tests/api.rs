//! HTTP surface tests over the real router and an in-memory warehouse.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::fixtures::{self, at, date};
use integration_tests::setup::TestContext;
use serde_json::json;

fn server(ctx: &TestContext) -> TestServer {
    TestServer::new(ctx.router.clone()).expect("Failed to create test server")
}

#[tokio::test]
async fn test_compute_two_day_example() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/features/compute")
        .json(&json!({
            "events": fixtures::two_day_example(),
            "as_of": at(date(2024, 3, 3), 0),
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["feature_date"], "2024-03-02");
    assert_eq!(rows[1]["events_last_7_days"], 8);
    assert_eq!(rows[1]["engagement_score_7d"], 32);
    assert_eq!(rows[1]["churn_risk_status"], "active");
    assert_eq!(body["daily_aggregates"].as_array().unwrap().len(), 2);
    assert_eq!(body["checkpoints"][0]["last_date_processed"], "2024-03-02");
    assert_eq!(body["quality"]["events"]["total_rows"], 8);

    // Stateless: nothing reaches the warehouse.
    assert_eq!(ctx.warehouse.feature_count(), 0);
}

#[tokio::test]
async fn test_compute_resumes_from_returned_checkpoint() {
    let ctx = TestContext::new();
    let server = server(&ctx);
    let as_of = at(date(2024, 3, 20), 0);

    let first: serde_json::Value = server
        .post("/features/compute")
        .json(&json!({
            "events": fixtures::history("U1", date(2024, 3, 1), 10, 2),
            "as_of": as_of,
        }))
        .await
        .json();

    let second: serde_json::Value = server
        .post("/features/compute")
        .json(&json!({
            "events": fixtures::history("U1", date(2024, 3, 11), 2, 2),
            "checkpoints": first["checkpoints"],
            "history_expected": ["U1"],
            "as_of": as_of,
        }))
        .await
        .json();

    assert_eq!(second["failures"].as_array().unwrap().len(), 0);
    let rows = second["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["lifetime_events"], 36);
    assert_eq!(rows[1]["lifetime_active_days"], 12);
    assert_eq!(rows[1]["active_days_last_7"], 7);
}

#[tokio::test]
async fn test_compute_reports_missing_checkpoint() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let body: serde_json::Value = server
        .post("/features/compute")
        .json(&json!({
            "events": fixtures::page_views("U1", date(2024, 3, 5), 2),
            "history_expected": ["U1"],
        }))
        .await
        .json();

    assert_eq!(body["rows"].as_array().unwrap().len(), 0);
    let failure = &body["failures"][0];
    assert_eq!(failure["entity_id"], "U1");
    assert_eq!(failure["code"], "CKPT_001");
    assert_eq!(failure["requires_full_recompute"], true);
}

#[tokio::test]
async fn test_compute_rejects_malformed_json() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/features/compute")
        .content_type("application/json")
        .bytes("{\"events\": [".into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

#[tokio::test]
async fn test_compute_rejects_too_many_events() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let events: Vec<serde_json::Value> = (0..10_001).map(|_| json!({})).collect();
    let response = server.post("/features/compute").json(&json!({ "events": events })).await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_002");
}

#[tokio::test]
async fn test_compute_rejects_oversized_body() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let mut event = serde_json::to_value(fixtures::event("U1", "page_view", at(date(2024, 3, 1), 9))).unwrap();
    event["metadata"] = json!({ "blob": "x".repeat(1_100_000) });
    let response = server.post("/features/compute").json(&json!({ "events": [event] })).await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_002");
}

#[tokio::test]
async fn test_incremental_job_then_lookup() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    let server = server(&ctx);

    let response = server
        .post("/jobs/incremental")
        .json(&json!({ "as_of": at(date(2024, 3, 10), 6) }))
        .await;
    response.assert_status_ok();
    let summary: serde_json::Value = response.json();
    assert_eq!(summary["mode"], "incremental");
    assert_eq!(summary["rows_upserted"], 3);

    let response = server.get("/entities/U1/features").add_query_param("limit", 2).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["feature_date"], "2024-03-09");
    assert_eq!(rows[1]["feature_date"], "2024-03-08");
}

#[tokio::test]
async fn test_backfill_endpoint() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 1), 5, 1));
    let server = server(&ctx);

    let response = server
        .post("/jobs/backfill")
        .json(&json!({ "start": "2024-03-02", "end": "2024-03-04", "as_of": at(date(2024, 3, 6), 0) }))
        .await;
    response.assert_status_ok();
    let summary: serde_json::Value = response.json();
    assert_eq!(summary["mode"], "backfill");
    assert_eq!(summary["rows_upserted"], 3);

    let response = server
        .post("/jobs/backfill")
        .json(&json!({ "start": "2024-03-04", "end": "2024-03-02" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

#[tokio::test]
async fn test_job_write_failure_maps_to_db_error() {
    let ctx = TestContext::new();
    ctx.warehouse.insert_events(fixtures::history("U1", date(2024, 3, 7), 3, 1));
    ctx.warehouse.fail_next_writes(100);
    let server = server(&ctx);

    let response = server
        .post("/jobs/incremental")
        .json(&json!({ "as_of": at(date(2024, 3, 10), 6) }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "DB_001");
}

#[tokio::test]
async fn test_compute_survives_extreme_values() {
    let ctx = TestContext::new();
    let server = server(&ctx);
    let day = date(2024, 3, 5);
    let huge = |hour| fixtures::purchase("U1", at(day, hour), 1e17);
    let day_values = |date: &str| {
        json!({
            "date": date, "events": u64::MAX, "purchases": 0, "revenue_cents": 0,
            "sessions": 0, "page_views": 0, "web_events": 0, "mobile_events": 0
        })
    };

    let response = server
        .post("/features/compute")
        .json(&json!({
            "events": [huge(9), huge(10), fixtures::page_views("U2", day, 1)[0].clone()],
            "checkpoints": [{
                "entity_id": "U2",
                "last_date_processed": "2024-03-04",
                "trailing_daily_values": [day_values("2024-03-03"), day_values("2024-03-04")],
                "lifetime": {
                    "events": u64::MAX, "purchases": 0, "revenue_cents": 0, "sessions": 0,
                    "active_days": 2, "first_active_date": "2024-03-03"
                },
                "version": 1
            }],
            "as_of": at(date(2024, 3, 6), 0),
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["entity_id"], "U1");
    assert_eq!(rows[0]["revenue_today"], 0.0);
    assert_eq!(body["quality"]["purchases_without_amount"], 2);

    let failure = &body["failures"][0];
    assert_eq!(failure["entity_id"], "U2");
    assert_eq!(failure["code"], "CKPT_002");
    assert_eq!(failure["requires_full_recompute"], true);
}
