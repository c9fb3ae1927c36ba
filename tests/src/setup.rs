//! Common test setup functions.

use api::{router, state::AppState};
use axum::Router;
use clickhouse_client::{init_schema, ClickHouseClient, ClickHouseConfig, Warehouse};
use std::sync::Arc;
use std::time::Duration;
use worker::{FeaturePipeline, JobConfig, RetryPolicy};

use crate::containers::TestContainers;
use crate::mocks::InMemoryWarehouse;

/// Job config with fast retries.
pub fn test_job_config() -> JobConfig {
    JobConfig {
        lookback_days: 3,
        retry: RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        },
    }
}

/// Test context over an in-memory warehouse.
///
/// Uses the real Axum router, pipeline, and jobs; only storage is mocked.
pub struct TestContext {
    pub warehouse: Arc<InMemoryWarehouse>,
    pub state: AppState,
    pub router: Router,
}

impl TestContext {
    pub fn new() -> Self {
        let warehouse = Arc::new(InMemoryWarehouse::new());
        let state = AppState::with_warehouse(
            warehouse.clone() as Arc<dyn Warehouse>,
            FeaturePipeline::new(),
            test_job_config(),
        );
        let router = router(state.clone());

        Self {
            warehouse,
            state,
            router,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Test context backed by a ClickHouse testcontainer.
pub struct ClickHouseContext {
    pub containers: TestContainers,
    pub clickhouse: Arc<ClickHouseClient>,
}

impl ClickHouseContext {
    /// Starts (or connects to) ClickHouse and creates the schema.
    pub async fn new() -> Self {
        let containers = TestContainers::start().await;

        let ch_config = ClickHouseConfig {
            url: containers.clickhouse_url.clone(),
            database: containers.clickhouse_database.clone(),
            username: containers.clickhouse_username.clone(),
            password: containers.clickhouse_password.clone(),
            timeout_secs: 30,
        };
        let clickhouse = Arc::new(ClickHouseClient::new(ch_config));

        init_schema(&clickhouse)
            .await
            .expect("Failed to initialize schema");

        Self {
            containers,
            clickhouse,
        }
    }

    pub fn warehouse(&self) -> Arc<dyn Warehouse> {
        self.clickhouse.clone()
    }
}
