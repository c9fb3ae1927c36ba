//! Tests for health check endpoints.
//!
//! These tests verify the health endpoints return correct status and structure.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::setup::TestContext;
use telemetry::health;

/// Test /health endpoint returns proper structure
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();

    for field in ["status", "clickhouse_connected", "feature_job_healthy", "last_job_rows"] {
        assert!(body.get(field).is_some(), "Response should have '{}' field", field);
    }
    assert!(body["last_job_rows"].as_u64().is_some());
}

/// Test /health endpoint reports valid status
#[tokio::test]
async fn test_health_endpoint_status_value() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let body: serde_json::Value = server.get("/health").await.json();

    // Components may not have reported yet in a test process
    let status = body["status"].as_str().unwrap_or("");
    assert!(
        status == "healthy" || status == "degraded" || status == "unhealthy",
        "Status should be 'healthy', 'degraded', or 'unhealthy', got '{}'",
        status
    );
}

/// Test /health/ready follows the ClickHouse component
#[tokio::test]
async fn test_ready_endpoint() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    health().clickhouse.set_healthy();
    server.get("/health/ready").await.assert_status(StatusCode::OK);

    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["clickhouse_connected"], true);
}

/// Test /health/live endpoint
#[tokio::test]
async fn test_live_endpoint() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let status = server.get("/health/live").await.status_code();
    assert!(
        status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE,
        "Live endpoint should return 200 or 503, got {}",
        status
    );
}
