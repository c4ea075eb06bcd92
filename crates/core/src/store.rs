//! Storage contract used by the tracker and the analyzer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Event, PageView, Session, UserAgent};
use crate::query::Query;
use crate::stats::{
    ActiveVisitorStats, AvgTimeSpentStats, ConversionStats, DimensionStats, EntryStats,
    EventStats, ExitStats, PageStats, ScreenSizeStats, TotalVisitorSessionStats,
    TotalVisitorStats,
};

/// Analytical store.
///
/// Each save writes the whole batch or nothing. Select methods read result
/// columns by position; the expected column order is given per method and
/// matches the field order the analyzer passes to the query builder.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_page_views(&self, rows: &[PageView]) -> Result<()>;

    async fn save_sessions(&self, rows: &[Session]) -> Result<()>;

    async fn save_events(&self, rows: &[Event]) -> Result<()>;

    async fn save_user_agents(&self, rows: &[UserAgent]) -> Result<()>;

    /// Latest live session row of a visitor newer than `max_age`.
    /// `Ok(None)` when there is none.
    async fn session(
        &self,
        client_id: u64,
        visitor_id: u64,
        max_age: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// First column of the first row as an unsigned integer; zero if the
    /// result is empty.
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Columns: path, [title], visitors, sessions, relative_visitors, views,
    /// relative_views, bounces, bounce_rate, [average_time_spent_seconds].
    async fn select_page_stats(
        &self,
        include_title: bool,
        include_time_spent: bool,
        query: &Query,
    ) -> Result<Vec<PageStats>>;

    /// Columns: entry_path, [entry_title], entries.
    async fn select_entry_stats(&self, include_title: bool, query: &Query)
        -> Result<Vec<EntryStats>>;

    /// Columns: exit_path, [exit_title], exits.
    async fn select_exit_stats(&self, include_title: bool, query: &Query) -> Result<Vec<ExitStats>>;

    /// Columns: path, visitors, sessions, views.
    async fn select_total_visitor_session_stats(
        &self,
        query: &Query,
    ) -> Result<Vec<TotalVisitorSessionStats>>;

    /// Columns: path, average_time_spent_seconds.
    async fn select_avg_time_spent_stats(&self, query: &Query) -> Result<Vec<AvgTimeSpentStats>>;

    /// Columns: visitors, views, cr. Zeroed when the result is empty.
    async fn get_conversion_stats(&self, query: &Query) -> Result<ConversionStats>;

    /// Columns: value, visitors, relative_visitors.
    async fn select_dimension_stats(&self, query: &Query) -> Result<Vec<DimensionStats>>;

    /// Columns: screen_width, screen_height, visitors, relative_visitors.
    async fn select_screen_size_stats(&self, query: &Query) -> Result<Vec<ScreenSizeStats>>;

    /// Columns: path, [title], visitors.
    async fn select_active_visitor_stats(
        &self,
        include_title: bool,
        query: &Query,
    ) -> Result<Vec<ActiveVisitorStats>>;

    /// Columns: event_name, visitors, count, cr, average_time_spent_seconds.
    async fn select_event_stats(&self, query: &Query) -> Result<Vec<EventStats>>;

    /// Columns: visitors, sessions, views, bounces, bounce_rate. Zeroed when
    /// the result is empty.
    async fn get_total_visitor_stats(&self, query: &Query) -> Result<TotalVisitorStats>;
}
