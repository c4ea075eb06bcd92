//! ClickHouse implementation of the pirsch `Store`.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use pirsch_core::stats::*;
use pirsch_core::{Event, PageView, Query, Result, Session, Store, UserAgent};
use serde::Deserialize;
use telemetry::metrics;
use tracing::debug;

use crate::client::ClickHouseClient;
use crate::error::{classify, timed_out};
use crate::insert::{insert_batch, EventRow, PageViewRow, SessionRow, UserAgentRow};

/// Store backed by ClickHouse.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: ClickHouseClient,
}

impl ClickHouseStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    fn prepare(&self, query: &Query) -> clickhouse::query::Query {
        let mut q = self.client.inner().query(&query.sql);
        for arg in &query.args {
            q = q.bind(arg);
        }
        q
    }

    async fn fetch_all<T>(&self, context: &str, query: &Query) -> Result<Vec<T>>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        let start = Instant::now();
        let timeout = self.client.config().timeout();
        let result = match tokio::time::timeout(timeout, self.prepare(query).fetch_all::<T>()).await {
            Ok(rows) => rows.map_err(|e| classify(context, e)),
            Err(_) => Err(timed_out(context, timeout)),
        };
        self.observe(context, start, result.is_ok());
        result
    }

    /// First row, or `None` for an empty result.
    async fn fetch_first<T>(&self, context: &str, query: &Query) -> Result<Option<T>>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        let start = Instant::now();
        let timeout = self.client.config().timeout();
        let result = match tokio::time::timeout(timeout, self.prepare(query).fetch_one::<T>()).await {
            Ok(Ok(row)) => Ok(Some(row)),
            Ok(Err(clickhouse::error::Error::RowNotFound)) => Ok(None),
            Ok(Err(e)) => Err(classify(context, e)),
            Err(_) => Err(timed_out(context, timeout)),
        };
        self.observe(context, start, result.is_ok());
        result
    }

    fn observe(&self, context: &str, start: Instant, ok: bool) {
        let elapsed = start.elapsed();
        metrics().queries.inc();
        metrics().query_latency_ms.observe(elapsed.as_millis() as u64);
        if !ok {
            metrics().store_errors.inc();
        }
        debug!(query = context, ok = ok, latency_ms = %elapsed.as_millis(), "ClickHouse query");
    }
}

#[derive(Row, Deserialize)]
struct PageStatsRow {
    path: String,
    visitors: u64,
    sessions: u64,
    relative_visitors: f64,
    views: u64,
    relative_views: f64,
    bounces: u64,
    bounce_rate: f64,
}

#[derive(Row, Deserialize)]
struct PageStatsTitleRow {
    path: String,
    title: String,
    visitors: u64,
    sessions: u64,
    relative_visitors: f64,
    views: u64,
    relative_views: f64,
    bounces: u64,
    bounce_rate: f64,
}

#[derive(Row, Deserialize)]
struct PageStatsTimeRow {
    path: String,
    visitors: u64,
    sessions: u64,
    relative_visitors: f64,
    views: u64,
    relative_views: f64,
    bounces: u64,
    bounce_rate: f64,
    average_time_spent_seconds: u64,
}

#[derive(Row, Deserialize)]
struct PageStatsTitleTimeRow {
    path: String,
    title: String,
    visitors: u64,
    sessions: u64,
    relative_visitors: f64,
    views: u64,
    relative_views: f64,
    bounces: u64,
    bounce_rate: f64,
    average_time_spent_seconds: u64,
}

#[derive(Row, Deserialize)]
struct PathCountRow {
    path: String,
    count: u64,
}

#[derive(Row, Deserialize)]
struct PathTitleCountRow {
    path: String,
    title: String,
    count: u64,
}

#[derive(Row, Deserialize)]
struct TotalVisitorSessionRow {
    path: String,
    visitors: u64,
    sessions: u64,
    views: u64,
}

#[derive(Row, Deserialize)]
struct AvgTimeSpentRow {
    path: String,
    average_time_spent_seconds: u64,
}

#[derive(Row, Deserialize)]
struct ConversionRow {
    visitors: u64,
    views: u64,
    cr: f64,
}

#[derive(Row, Deserialize)]
struct DimensionRow {
    value: String,
    visitors: u64,
    relative_visitors: f64,
}

#[derive(Row, Deserialize)]
struct ScreenSizeRow {
    screen_width: u16,
    screen_height: u16,
    visitors: u64,
    relative_visitors: f64,
}

#[derive(Row, Deserialize)]
struct ActiveVisitorRow {
    path: String,
    visitors: u64,
}

#[derive(Row, Deserialize)]
struct ActiveVisitorTitleRow {
    path: String,
    title: String,
    visitors: u64,
}

#[derive(Row, Deserialize)]
struct EventStatsRow {
    name: String,
    visitors: u64,
    count: u64,
    cr: f64,
    average_duration_seconds: u64,
}

#[derive(Row, Deserialize)]
struct TotalVisitorRow {
    visitors: u64,
    sessions: u64,
    views: u64,
    bounces: u64,
    bounce_rate: f64,
}

#[async_trait]
impl Store for ClickHouseStore {
    async fn save_page_views(&self, rows: &[PageView]) -> Result<()> {
        let rows: Vec<PageViewRow> = rows.iter().map(PageViewRow::from).collect();
        let n = insert_batch(&self.client, "page_view", rows).await?;
        metrics().page_views_saved.inc_by(n as u64);
        Ok(())
    }

    async fn save_sessions(&self, rows: &[Session]) -> Result<()> {
        let rows: Vec<SessionRow> = rows.iter().map(SessionRow::from).collect();
        let n = insert_batch(&self.client, "session", rows).await?;
        metrics().sessions_saved.inc_by(n as u64);
        Ok(())
    }

    async fn save_events(&self, rows: &[Event]) -> Result<()> {
        let rows: Vec<EventRow> = rows.iter().map(EventRow::from).collect();
        let n = insert_batch(&self.client, "event", rows).await?;
        metrics().events_saved.inc_by(n as u64);
        Ok(())
    }

    async fn save_user_agents(&self, rows: &[UserAgent]) -> Result<()> {
        let rows: Vec<UserAgentRow> = rows.iter().map(UserAgentRow::from).collect();
        let n = insert_batch(&self.client, "user_agent", rows).await?;
        metrics().user_agents_saved.inc_by(n as u64);
        Ok(())
    }

    async fn session(
        &self,
        client_id: u64,
        visitor_id: u64,
        max_age: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = Query {
            sql: "SELECT ?fields FROM session WHERE client_id = ? AND visitor_id = ? AND time > fromUnixTimestamp64Milli(?) AND sign = 1 ORDER BY time DESC, page_views DESC LIMIT 1"
                .to_string(),
            args: vec![
                pirsch_core::QueryArg::UInt(client_id),
                pirsch_core::QueryArg::UInt(visitor_id),
                pirsch_core::QueryArg::Int(max_age.timestamp_millis()),
            ],
        };
        let row = self.fetch_first::<SessionRow>("select session", &query).await?;
        Ok(row.map(Session::from))
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        Ok(self
            .fetch_first::<u64>("count", query)
            .await?
            .unwrap_or_default())
    }

    async fn select_page_stats(
        &self,
        include_title: bool,
        include_time_spent: bool,
        query: &Query,
    ) -> Result<Vec<PageStats>> {
        const CONTEXT: &str = "select page stats";
        let stats = match (include_title, include_time_spent) {
            (false, false) => self
                .fetch_all::<PageStatsRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| PageStats {
                    path: r.path,
                    visitors: r.visitors,
                    sessions: r.sessions,
                    relative_visitors: r.relative_visitors,
                    views: r.views,
                    relative_views: r.relative_views,
                    bounces: r.bounces,
                    bounce_rate: r.bounce_rate,
                    ..Default::default()
                })
                .collect(),
            (true, false) => self
                .fetch_all::<PageStatsTitleRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| PageStats {
                    path: r.path,
                    title: r.title,
                    visitors: r.visitors,
                    sessions: r.sessions,
                    relative_visitors: r.relative_visitors,
                    views: r.views,
                    relative_views: r.relative_views,
                    bounces: r.bounces,
                    bounce_rate: r.bounce_rate,
                    ..Default::default()
                })
                .collect(),
            (false, true) => self
                .fetch_all::<PageStatsTimeRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| PageStats {
                    path: r.path,
                    visitors: r.visitors,
                    sessions: r.sessions,
                    relative_visitors: r.relative_visitors,
                    views: r.views,
                    relative_views: r.relative_views,
                    bounces: r.bounces,
                    bounce_rate: r.bounce_rate,
                    average_time_spent_seconds: r.average_time_spent_seconds,
                    ..Default::default()
                })
                .collect(),
            (true, true) => self
                .fetch_all::<PageStatsTitleTimeRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| PageStats {
                    path: r.path,
                    title: r.title,
                    visitors: r.visitors,
                    sessions: r.sessions,
                    relative_visitors: r.relative_visitors,
                    views: r.views,
                    relative_views: r.relative_views,
                    bounces: r.bounces,
                    bounce_rate: r.bounce_rate,
                    average_time_spent_seconds: r.average_time_spent_seconds,
                })
                .collect(),
        };
        Ok(stats)
    }

    async fn select_entry_stats(&self, include_title: bool, query: &Query) -> Result<Vec<EntryStats>> {
        const CONTEXT: &str = "select entry stats";
        let stats = if include_title {
            self.fetch_all::<PathTitleCountRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| EntryStats {
                    path: r.path,
                    title: r.title,
                    entries: r.count,
                    ..Default::default()
                })
                .collect()
        } else {
            self.fetch_all::<PathCountRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| EntryStats {
                    path: r.path,
                    entries: r.count,
                    ..Default::default()
                })
                .collect()
        };
        Ok(stats)
    }

    async fn select_exit_stats(&self, include_title: bool, query: &Query) -> Result<Vec<ExitStats>> {
        const CONTEXT: &str = "select exit stats";
        let stats = if include_title {
            self.fetch_all::<PathTitleCountRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| ExitStats {
                    path: r.path,
                    title: r.title,
                    exits: r.count,
                    ..Default::default()
                })
                .collect()
        } else {
            self.fetch_all::<PathCountRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| ExitStats {
                    path: r.path,
                    exits: r.count,
                    ..Default::default()
                })
                .collect()
        };
        Ok(stats)
    }

    async fn select_total_visitor_session_stats(
        &self,
        query: &Query,
    ) -> Result<Vec<TotalVisitorSessionStats>> {
        Ok(self
            .fetch_all::<TotalVisitorSessionRow>("select total visitor session stats", query)
            .await?
            .into_iter()
            .map(|r| TotalVisitorSessionStats {
                path: r.path,
                visitors: r.visitors,
                sessions: r.sessions,
                views: r.views,
            })
            .collect())
    }

    async fn select_avg_time_spent_stats(&self, query: &Query) -> Result<Vec<AvgTimeSpentStats>> {
        Ok(self
            .fetch_all::<AvgTimeSpentRow>("select avg time spent stats", query)
            .await?
            .into_iter()
            .map(|r| AvgTimeSpentStats {
                path: r.path,
                average_time_spent_seconds: r.average_time_spent_seconds,
            })
            .collect())
    }

    async fn get_conversion_stats(&self, query: &Query) -> Result<ConversionStats> {
        Ok(self
            .fetch_first::<ConversionRow>("get conversion stats", query)
            .await?
            .map(|r| ConversionStats {
                visitors: r.visitors,
                views: r.views,
                cr: r.cr,
            })
            .unwrap_or_default())
    }

    async fn select_dimension_stats(&self, query: &Query) -> Result<Vec<DimensionStats>> {
        Ok(self
            .fetch_all::<DimensionRow>("select dimension stats", query)
            .await?
            .into_iter()
            .map(|r| DimensionStats {
                value: r.value,
                visitors: r.visitors,
                relative_visitors: r.relative_visitors,
            })
            .collect())
    }

    async fn select_screen_size_stats(&self, query: &Query) -> Result<Vec<ScreenSizeStats>> {
        Ok(self
            .fetch_all::<ScreenSizeRow>("select screen size stats", query)
            .await?
            .into_iter()
            .map(|r| ScreenSizeStats {
                screen_width: r.screen_width,
                screen_height: r.screen_height,
                visitors: r.visitors,
                relative_visitors: r.relative_visitors,
            })
            .collect())
    }

    async fn select_active_visitor_stats(
        &self,
        include_title: bool,
        query: &Query,
    ) -> Result<Vec<ActiveVisitorStats>> {
        const CONTEXT: &str = "select active visitor stats";
        let stats = if include_title {
            self.fetch_all::<ActiveVisitorTitleRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| ActiveVisitorStats {
                    path: r.path,
                    title: r.title,
                    visitors: r.visitors,
                })
                .collect()
        } else {
            self.fetch_all::<ActiveVisitorRow>(CONTEXT, query)
                .await?
                .into_iter()
                .map(|r| ActiveVisitorStats {
                    path: r.path,
                    visitors: r.visitors,
                    ..Default::default()
                })
                .collect()
        };
        Ok(stats)
    }

    async fn select_event_stats(&self, query: &Query) -> Result<Vec<EventStats>> {
        Ok(self
            .fetch_all::<EventStatsRow>("select event stats", query)
            .await?
            .into_iter()
            .map(|r| EventStats {
                name: r.name,
                visitors: r.visitors,
                count: r.count,
                cr: r.cr,
                average_duration_seconds: r.average_duration_seconds,
            })
            .collect())
    }

    async fn get_total_visitor_stats(&self, query: &Query) -> Result<TotalVisitorStats> {
        Ok(self
            .fetch_first::<TotalVisitorRow>("get total visitor stats", query)
            .await?
            .map(|r| TotalVisitorStats {
                visitors: r.visitors,
                sessions: r.sessions,
                views: r.views,
                bounces: r.bounces,
                bounce_rate: r.bounce_rate,
                average_time_spent_seconds: 0,
            })
            .unwrap_or_default())
    }
}
