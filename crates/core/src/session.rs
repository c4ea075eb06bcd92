//! In-memory session state and its transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Session, Sign, VisitAttributes};

/// Default inactivity timeout (30 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default absolute session length (24 hours).
pub const DEFAULT_MAX_SESSION_LENGTH: Duration = Duration::from_secs(24 * 60 * 60);

/// Last known state of one visitor's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub client_id: u64,
    pub visitor_id: u64,
    pub session_id: u64,
    pub start: DateTime<Utc>,
    /// Time of the last hit.
    pub time: DateTime<Utc>,
    pub entry_path: String,
    pub entry_title: String,
    pub exit_path: String,
    pub exit_title: String,
    pub page_views: u16,
    pub is_bounce: bool,
    pub is_bot: u8,
    pub attributes: VisitAttributes,
    /// Set when the state was continued from a stored session row.
    pub continued: bool,
}

impl SessionState {
    /// Starts a new session with its first page view.
    pub fn start(
        client_id: u64,
        visitor_id: u64,
        session_id: u64,
        now: DateTime<Utc>,
        path: &str,
        title: &str,
        attributes: VisitAttributes,
    ) -> Self {
        Self {
            client_id,
            visitor_id,
            session_id,
            start: now,
            time: now,
            entry_path: path.to_string(),
            entry_title: title.to_string(),
            exit_path: path.to_string(),
            exit_title: title.to_string(),
            page_views: 1,
            is_bounce: true,
            is_bot: 0,
            attributes,
            continued: false,
        }
    }

    /// Rebuilds state from the latest stored session row.
    pub fn from_stored(row: &Session) -> Self {
        Self {
            client_id: row.client_id,
            visitor_id: row.visitor_id,
            session_id: row.session_id,
            start: row.start,
            time: row.time,
            entry_path: row.entry_path.clone(),
            entry_title: row.entry_title.clone(),
            exit_path: row.exit_path.clone(),
            exit_title: row.exit_title.clone(),
            page_views: row.page_views.max(1),
            is_bounce: row.page_views <= 1,
            is_bot: row.is_bot,
            attributes: row.attributes.clone(),
            continued: true,
        }
    }

    /// Whether a hit at `now` must start a new session. Both bounds are
    /// independent; whichever is reached first ends the session. A session
    /// never spans `max_session_length` or more.
    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        inactivity_timeout: Duration,
        max_session_length: Duration,
    ) -> bool {
        elapsed(self.time, now) > inactivity_timeout || elapsed(self.start, now) >= max_session_length
    }

    /// Applies a page view to the session. Returns seconds since the previous
    /// hit. Hits faster than `min_interval` raise the bot counter.
    pub fn visit(
        &mut self,
        now: DateTime<Utc>,
        path: &str,
        title: &str,
        min_interval: Duration,
    ) -> u32 {
        let since = self.touch(now, min_interval);
        self.exit_path = path.to_string();
        self.exit_title = title.to_string();
        self.page_views = self.page_views.saturating_add(1);
        self.is_bounce = self.page_views == 1;
        since
    }

    /// Refreshes the last hit time without counting a page view.
    pub fn touch(&mut self, now: DateTime<Utc>, min_interval: Duration) -> u32 {
        let since = elapsed(self.time, now);
        if since < min_interval {
            self.is_bot = self.is_bot.saturating_add(1);
        }
        if now > self.time {
            self.time = now;
        }
        since.as_secs().min(u32::MAX as u64) as u32
    }

    /// Seconds between session start and the last hit.
    pub fn duration_seconds(&self) -> u32 {
        elapsed(self.start, self.time).as_secs().min(u32::MAX as u64) as u32
    }

    /// Collapsing row for this state.
    pub fn to_row(&self, sign: Sign) -> Session {
        Session {
            sign,
            client_id: self.client_id,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            time: self.time,
            start: self.start,
            duration_seconds: self.duration_seconds(),
            entry_path: self.entry_path.clone(),
            exit_path: self.exit_path.clone(),
            page_views: self.page_views,
            is_bounce: self.is_bounce,
            entry_title: self.entry_title.clone(),
            exit_title: self.exit_title.clone(),
            attributes: self.attributes.clone(),
            is_bot: self.is_bot,
        }
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
