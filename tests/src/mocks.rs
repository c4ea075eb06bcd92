//! Mock implementations for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pirsch_core::{
    ActiveVisitorStats, AvgTimeSpentStats, ConversionStats, DimensionStats, EntryStats, Error,
    Event, EventStats, ExitStats, PageStats, PageView, Query, Result, ScreenSizeStats, Session,
    Store, TotalVisitorSessionStats, TotalVisitorStats, UserAgent,
};
use tokio::sync::watch;

/// Canned results returned by the select methods.
#[derive(Debug, Clone, Default)]
pub struct Canned {
    /// Popped in order by `count`; zero once empty.
    pub counts: VecDeque<u64>,
    pub page_stats: Vec<PageStats>,
    pub entry_stats: Vec<EntryStats>,
    pub exit_stats: Vec<ExitStats>,
    pub totals: Vec<TotalVisitorSessionStats>,
    pub time_spent: Vec<AvgTimeSpentStats>,
    pub conversion: ConversionStats,
    pub dimensions: Vec<DimensionStats>,
    pub screen_sizes: Vec<ScreenSizeStats>,
    pub active_visitors: Vec<ActiveVisitorStats>,
    pub events: Vec<EventStats>,
    pub total_visitors: TotalVisitorStats,
}

/// Store that keeps saved rows in memory.
///
/// This implements the same `Store` trait as `ClickHouseStore`, so the
/// tracker and the analyzer run their production code paths against it.
#[derive(Clone)]
pub struct MockStore {
    page_views: Arc<Mutex<Vec<PageView>>>,
    sessions: Arc<Mutex<Vec<Session>>>,
    events: Arc<Mutex<Vec<Event>>>,
    user_agents: Arc<Mutex<Vec<UserAgent>>>,
    queries: Arc<Mutex<Vec<Query>>>,
    canned: Arc<Mutex<Canned>>,
    stored_session: Arc<Mutex<Option<Session>>>,
    /// Simulate insert failures if set.
    should_fail: Arc<Mutex<bool>>,
    /// Simulate session lookup failures if set.
    lookup_fails: Arc<Mutex<bool>>,
    /// Saves wait while the gate is closed.
    gate: Arc<watch::Sender<bool>>,
    held: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            page_views: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(Vec::new())),
            user_agents: Arc::new(Mutex::new(Vec::new())),
            queries: Arc::new(Mutex::new(Vec::new())),
            canned: Arc::new(Mutex::new(Canned::default())),
            stored_session: Arc::new(Mutex::new(None)),
            should_fail: Arc::new(Mutex::new(false)),
            lookup_fails: Arc::new(Mutex::new(false)),
            gate: Arc::new(gate),
            held: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn page_views(&self) -> Vec<PageView> {
        self.page_views.lock().clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn user_agents(&self) -> Vec<UserAgent> {
        self.user_agents.lock().clone()
    }

    /// Every query passed to a select method, in call order.
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }

    /// Replace the canned select results.
    pub fn set_canned(&self, canned: Canned) {
        *self.canned.lock() = canned;
    }

    /// Session returned by lookups for any visitor.
    pub fn set_stored_session(&self, session: Option<Session>) {
        *self.stored_session.lock() = session;
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    pub fn set_lookup_fails(&self, fail: bool) {
        *self.lookup_fails.lock() = fail;
    }

    /// Hold all saves until the gate is opened again.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Saves currently waiting at the closed gate.
    pub fn held_saves(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    async fn before_save(&self) -> Result<()> {
        let mut gate = self.gate.subscribe();
        self.held.fetch_add(1, Ordering::SeqCst);
        let opened = gate.wait_for(|open| *open).await.map(|_| ());
        self.held.fetch_sub(1, Ordering::SeqCst);
        opened.map_err(|_| Error::internal("mock gate dropped"))?;
        if *self.should_fail.lock() {
            return Err(Error::storage_transient("mock store failure"));
        }
        Ok(())
    }

    fn record(&self, query: &Query) {
        self.queries.lock().push(query.clone());
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn save_page_views(&self, rows: &[PageView]) -> Result<()> {
        self.before_save().await?;
        self.page_views.lock().extend_from_slice(rows);
        Ok(())
    }

    async fn save_sessions(&self, rows: &[Session]) -> Result<()> {
        self.before_save().await?;
        self.sessions.lock().extend_from_slice(rows);
        Ok(())
    }

    async fn save_events(&self, rows: &[Event]) -> Result<()> {
        self.before_save().await?;
        self.events.lock().extend_from_slice(rows);
        Ok(())
    }

    async fn save_user_agents(&self, rows: &[UserAgent]) -> Result<()> {
        self.before_save().await?;
        self.user_agents.lock().extend_from_slice(rows);
        Ok(())
    }

    async fn session(
        &self,
        client_id: u64,
        visitor_id: u64,
        max_age: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        if *self.lookup_fails.lock() {
            return Err(Error::storage_transient("mock lookup failure"));
        }
        Ok(self
            .stored_session
            .lock()
            .clone()
            .filter(|s| s.client_id == client_id && s.visitor_id == visitor_id && s.time > max_age))
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        self.record(query);
        Ok(self.canned.lock().counts.pop_front().unwrap_or_default())
    }

    async fn select_page_stats(
        &self,
        _include_title: bool,
        _include_time_spent: bool,
        query: &Query,
    ) -> Result<Vec<PageStats>> {
        self.record(query);
        Ok(self.canned.lock().page_stats.clone())
    }

    async fn select_entry_stats(&self, _include_title: bool, query: &Query) -> Result<Vec<EntryStats>> {
        self.record(query);
        Ok(self.canned.lock().entry_stats.clone())
    }

    async fn select_exit_stats(&self, _include_title: bool, query: &Query) -> Result<Vec<ExitStats>> {
        self.record(query);
        Ok(self.canned.lock().exit_stats.clone())
    }

    async fn select_total_visitor_session_stats(
        &self,
        query: &Query,
    ) -> Result<Vec<TotalVisitorSessionStats>> {
        self.record(query);
        Ok(self.canned.lock().totals.clone())
    }

    async fn select_avg_time_spent_stats(&self, query: &Query) -> Result<Vec<AvgTimeSpentStats>> {
        self.record(query);
        Ok(self.canned.lock().time_spent.clone())
    }

    async fn get_conversion_stats(&self, query: &Query) -> Result<ConversionStats> {
        self.record(query);
        Ok(self.canned.lock().conversion.clone())
    }

    async fn select_dimension_stats(&self, query: &Query) -> Result<Vec<DimensionStats>> {
        self.record(query);
        Ok(self.canned.lock().dimensions.clone())
    }

    async fn select_screen_size_stats(&self, query: &Query) -> Result<Vec<ScreenSizeStats>> {
        self.record(query);
        Ok(self.canned.lock().screen_sizes.clone())
    }

    async fn select_active_visitor_stats(
        &self,
        _include_title: bool,
        query: &Query,
    ) -> Result<Vec<ActiveVisitorStats>> {
        self.record(query);
        Ok(self.canned.lock().active_visitors.clone())
    }

    async fn select_event_stats(&self, query: &Query) -> Result<Vec<EventStats>> {
        self.record(query);
        Ok(self.canned.lock().events.clone())
    }

    async fn get_total_visitor_stats(&self, query: &Query) -> Result<TotalVisitorStats> {
        self.record(query);
        Ok(self.canned.lock().total_visitors.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_captures_rows() {
        let mock = MockStore::new();
        let row = UserAgent {
            time: Utc::now(),
            user_agent: "Mozilla/5.0".into(),
        };
        mock.save_user_agents(&[row.clone()]).await.unwrap();
        assert_eq!(mock.user_agents(), vec![row]);
    }

    #[tokio::test]
    async fn test_mock_store_failure_mode() {
        let mock = MockStore::new();
        mock.set_should_fail(true);
        let result = mock.save_page_views(&[]).await;
        assert_eq!(result.unwrap_err().code(), "STORE_001");
    }

    #[tokio::test]
    async fn test_mock_store_counts_in_order() {
        let mock = MockStore::new();
        mock.set_canned(Canned {
            counts: VecDeque::from([2, 3]),
            ..Default::default()
        });
        let q = Query {
            sql: "SELECT 1".into(),
            args: vec![],
        };
        assert_eq!(mock.count(&q).await.unwrap(), 2);
        assert_eq!(mock.count(&q).await.unwrap(), 3);
        assert_eq!(mock.count(&q).await.unwrap(), 0);
        assert_eq!(mock.queries().len(), 3);
    }
}
