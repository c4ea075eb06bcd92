//! Sharded in-memory session cache.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pirsch_core::{Session, SessionState, VisitAttributes};
use telemetry::metrics;

type Key = (u64, u64);

/// What the current hit does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// Counts a page view.
    PageView,
    /// Refreshes the session without counting a page view.
    Event,
}

/// A hit as seen by the cache.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub kind: HitKind,
    pub path: &'a str,
    pub title: &'a str,
    pub attributes: &'a VisitAttributes,
}

/// Result of [`SessionCache::find_or_create`].
#[derive(Debug, Clone)]
pub struct Transition {
    /// State after the hit.
    pub state: SessionState,
    /// State before the hit; `None` when a new session was started.
    pub prior: Option<SessionState>,
    /// Seconds since the previous hit of the session.
    pub since_secs: u32,
}

/// Session states keyed by (client, visitor), spread over independently
/// locked shards.
pub struct SessionCache {
    shards: Vec<Mutex<HashMap<Key, SessionState>>>,
    inactivity_timeout: Duration,
    max_session_length: Duration,
    min_page_view_interval: Duration,
}

impl SessionCache {
    pub fn new(
        shards: usize,
        inactivity_timeout: Duration,
        max_session_length: Duration,
        min_page_view_interval: Duration,
    ) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            inactivity_timeout,
            max_session_length,
            min_page_view_interval,
        }
    }

    fn shard(&self, client_id: u64, visitor_id: u64) -> &Mutex<HashMap<Key, SessionState>> {
        let index = (client_id ^ visitor_id) % self.shards.len() as u64;
        &self.shards[index as usize]
    }

    /// Whether a live session exists for the visitor at `now`.
    pub fn contains_live(&self, client_id: u64, visitor_id: u64, now: DateTime<Utc>) -> bool {
        self.shard(client_id, visitor_id)
            .lock()
            .get(&(client_id, visitor_id))
            .is_some_and(|s| !s.is_expired(now, self.inactivity_timeout, self.max_session_length))
    }

    /// Applies a hit. Continues the cached session, or `stored` when nothing
    /// live is cached, and starts a new one otherwise.
    pub fn find_or_create(
        &self,
        client_id: u64,
        visitor_id: u64,
        now: DateTime<Utc>,
        visit: Visit<'_>,
        stored: Option<&Session>,
    ) -> Transition {
        let key = (client_id, visitor_id);
        let mut shard = self.shard(client_id, visitor_id).lock();

        let live = |s: &SessionState| {
            !s.is_expired(now, self.inactivity_timeout, self.max_session_length)
        };
        let prior = match shard.get(&key).filter(|s| live(*s)) {
            Some(cached) => Some(cached.clone()),
            None => stored.map(SessionState::from_stored).filter(|s| live(s)),
        };

        let transition = match prior {
            Some(prior) => {
                let mut state = prior.clone();
                let since_secs = match visit.kind {
                    HitKind::PageView => {
                        state.visit(now, visit.path, visit.title, self.min_page_view_interval)
                    }
                    HitKind::Event => state.touch(now, self.min_page_view_interval),
                };
                if prior.continued {
                    metrics().sessions_continued.inc();
                    state.continued = false;
                }
                Transition {
                    state,
                    prior: Some(prior),
                    since_secs,
                }
            }
            None => {
                metrics().sessions_created.inc();
                Transition {
                    state: SessionState::start(
                        client_id,
                        visitor_id,
                        rand::random(),
                        now,
                        visit.path,
                        visit.title,
                        visit.attributes.clone(),
                    ),
                    prior: None,
                    since_secs: 0,
                }
            }
        };

        if shard.insert(key, transition.state.clone()).is_none() {
            metrics().cached_sessions.inc();
        }
        transition
    }

    /// Removes expired sessions. Returns the number removed.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, s| !s.is_expired(now, self.inactivity_timeout, self.max_session_length));
            removed += before - shard.len();
        }
        if removed > 0 {
            metrics().cached_sessions.sub(removed as u64);
            metrics().sessions_evicted.inc_by(removed as u64);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
