//! ClickHouse health checks and schema migration.

use crate::client::ClickHouseClient;
use crate::error::classify;
use crate::schema::{all_tables, create_database};
use pirsch_core::Result;
use tracing::{debug, error, info};

/// Check ClickHouse connection health.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.inner().query("SELECT 1").fetch_one::<u8>().await {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Err(e) => {
            error!("ClickHouse health check failed: {}", e);
            false
        }
    }
}

/// Creates the database and all tables if they do not exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let database = &client.config().database;
    client
        .server()
        .query(&create_database(database))
        .execute()
        .await
        .map_err(|e| classify("create database", e))?;

    for ddl in all_tables() {
        client
            .inner()
            .query(ddl)
            .execute()
            .await
            .map_err(|e| classify("create table", e))?;
    }

    info!(database = %database, "ClickHouse schema initialized");
    Ok(())
}
