//! Raw row reads, used by the end-to-end tests and for inspection.

use crate::client::ClickHouseClient;
use crate::error::classify;
use crate::insert::{PageViewRow, SessionRow};
use crate::schema::TABLES;
use pirsch_core::{Error, Result};

/// Count rows of a table for a client.
pub async fn count_rows(client: &ClickHouseClient, table: &str, client_id: u64) -> Result<u64> {
    if !TABLES.contains(&table) || table == "user_agent" {
        return Err(Error::config(format!("cannot count rows of {:?}", table)));
    }
    client
        .inner()
        .query(&format!("SELECT count() FROM {} WHERE client_id = ?", table))
        .bind(client_id)
        .fetch_one::<u64>()
        .await
        .map_err(|e| classify("count rows", e))
}

/// Count sampled user agents.
pub async fn count_user_agents(client: &ClickHouseClient) -> Result<u64> {
    client
        .inner()
        .query("SELECT count() FROM user_agent")
        .fetch_one::<u64>()
        .await
        .map_err(|e| classify("count user agents", e))
}

/// Fetch all session rows of a client in insertion-independent order.
pub async fn query_session_rows(client: &ClickHouseClient, client_id: u64) -> Result<Vec<SessionRow>> {
    client
        .inner()
        .query("SELECT ?fields FROM session WHERE client_id = ? ORDER BY session_id, time, sign")
        .bind(client_id)
        .fetch_all::<SessionRow>()
        .await
        .map_err(|e| classify("query session rows", e))
}

/// Fetch all page views of a client ordered by time.
pub async fn query_page_views(client: &ClickHouseClient, client_id: u64) -> Result<Vec<PageViewRow>> {
    client
        .inner()
        .query("SELECT ?fields FROM page_view WHERE client_id = ? ORDER BY time")
        .bind(client_id)
        .fetch_all::<PageViewRow>()
        .await
        .map_err(|e| classify("query page views", e))
}
