//! Common test setup functions.

use std::sync::Arc;

use clickhouse_client::health::init_schema;
use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseStore};
use pirsch_core::Store;
use tracker::{Tracker, TrackerConfig, TrackerSettings};

use crate::containers::TestContainers;
use crate::fixtures;
use crate::mocks::MockStore;

/// Tracker over an in-memory store.
pub struct MockContext {
    pub store: MockStore,
    pub tracker: Tracker,
}

impl MockContext {
    pub fn new() -> Self {
        Self::with_settings(fixtures::test_settings())
    }

    /// Must be called inside a tokio runtime.
    pub fn with_settings(settings: TrackerSettings) -> Self {
        let store = MockStore::new();
        let tracker = Tracker::new(
            Arc::new(store.clone()) as Arc<dyn Store>,
            TrackerConfig::from(settings),
        )
        .expect("Failed to create tracker");
        Self { store, tracker }
    }
}

/// Test context with a real ClickHouse.
pub struct ClickHouseContext {
    pub containers: TestContainers,
    pub client: ClickHouseClient,
    pub store: Arc<ClickHouseStore>,
}

impl ClickHouseContext {
    /// Starts ClickHouse and creates the schema. Tests share the database
    /// when `PIRSCH_TEST_CLICKHOUSE_URL` is set, so each one tracks under
    /// its own client id.
    pub async fn new() -> Self {
        let containers = TestContainers::start().await;

        let config = ClickHouseConfig {
            url: containers.clickhouse_url.clone(),
            database: containers.clickhouse_database.clone(),
            username: containers.clickhouse_username.clone(),
            password: containers.clickhouse_password.clone(),
            timeout_secs: 30,
        };
        let client = ClickHouseClient::new(config);

        init_schema(&client)
            .await
            .expect("Failed to initialize schema");

        let store = Arc::new(ClickHouseStore::new(client.clone()));
        Self {
            containers,
            client,
            store,
        }
    }

    /// Tracker writing to this ClickHouse.
    pub fn tracker(&self, settings: TrackerSettings) -> Tracker {
        Tracker::new(
            self.store.clone() as Arc<dyn Store>,
            TrackerConfig::from(settings),
        )
        .expect("Failed to create tracker")
    }
}
