//! The tracker: turns hits and events into page view, session, event and
//! user agent rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use pirsch_core::hit::{validate_event, validate_hit};
use pirsch_core::{
    fingerprint, Error, Event, EventRequest, HitRequest, PageView, Result, Salts, Session,
    SessionState, Sign, Store, UserAgent, VisitAttributes,
};
use telemetry::metrics;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{self, Collector, ErrorHandler, Message, Record, Slot};
use crate::bot::BotFilter;
use crate::cache::{HitKind, SessionCache, Transition, Visit};
use crate::config::TrackerConfig;
use crate::request::{attributes, Page};
use crate::ua::{GeoLookup, NoGeoLookup, UserAgentParser, WootheeParser};

/// Optional collaborators of a tracker.
pub struct TrackerOptions {
    pub user_agent_parser: Arc<dyn UserAgentParser>,
    pub geo: Arc<dyn GeoLookup>,
    /// Called for every batch that fails to save.
    pub on_error: Option<ErrorHandler>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            user_agent_parser: Arc::new(WootheeParser::new()),
            geo: Arc::new(NoGeoLookup),
            on_error: None,
        }
    }
}

#[derive(Clone)]
struct Senders {
    page_views: mpsc::Sender<Message<PageView>>,
    sessions: mpsc::Sender<Message<Session>>,
    events: mpsc::Sender<Message<Event>>,
    user_agents: mpsc::Sender<Message<UserAgent>>,
}

/// A hit that passed validation and bot checks.
struct Accepted {
    visitor_id: u64,
    stored: Option<Session>,
    page: Page,
    attributes: VisitAttributes,
}

/// Session-stitching tracker.
///
/// Must be created inside a tokio runtime; collectors and the eviction
/// sweeper run as tasks on it.
pub struct Tracker {
    config: TrackerConfig,
    salts: Salts,
    store: Arc<dyn Store>,
    cache: Arc<SessionCache>,
    bots: BotFilter,
    user_agent_parser: Arc<dyn UserAgentParser>,
    geo: Arc<dyn GeoLookup>,
    senders: RwLock<Option<Senders>>,
    /// Save workers, one pool per channel.
    pools: Vec<Arc<Semaphore>>,
    cancel: CancellationToken,
    sweeper_cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Tracker {
    pub fn new(store: Arc<dyn Store>, config: TrackerConfig) -> Result<Self> {
        Self::with_options(store, config, TrackerOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn Store>,
        config: TrackerConfig,
        options: TrackerOptions,
    ) -> Result<Self> {
        config.validate()?;
        if config.salt.is_empty() {
            warn!("Tracker salt is empty; fingerprints are predictable");
        }

        let cancel = CancellationToken::new();
        let sweeper_cancel = CancellationToken::new();
        let cache = Arc::new(SessionCache::new(
            config.shards,
            config.inactivity_timeout,
            config.max_session_length,
            config.min_page_view_interval,
        ));

        let mut tasks = Vec::with_capacity(5);
        let mut pools = Vec::with_capacity(4);
        let (page_views, pool, handle) = spawn_collector::<PageView>(&config, &store, &options, &cancel);
        pools.push(pool);
        tasks.push(handle);
        let (sessions, pool, handle) = spawn_collector::<Session>(&config, &store, &options, &cancel);
        pools.push(pool);
        tasks.push(handle);
        let (events, pool, handle) = spawn_collector::<Event>(&config, &store, &options, &cancel);
        pools.push(pool);
        tasks.push(handle);
        let (user_agents, pool, handle) = spawn_collector::<UserAgent>(&config, &store, &options, &cancel);
        pools.push(pool);
        tasks.push(handle);
        tasks.push(spawn_sweeper(
            cache.clone(),
            config.eviction_interval,
            sweeper_cancel.clone(),
        ));

        info!(
            workers = config.workers,
            batch_size = config.batch_size,
            batch_max_age_ms = %config.batch_max_age.as_millis(),
            shards = config.shards,
            "Tracker started"
        );

        Ok(Self {
            salts: Salts::new(config.salt.clone()),
            bots: BotFilter::new(config.max_hits_per_day),
            config,
            store,
            cache,
            user_agent_parser: options.user_agent_parser,
            geo: options.geo,
            senders: RwLock::new(Some(Senders {
                page_views,
                sessions,
                events,
                user_agents,
            })),
            pools,
            cancel,
            sweeper_cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of cached sessions.
    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    fn senders(&self) -> Result<Senders> {
        self.senders.read().clone().ok_or(Error::Stopped)
    }

    /// Tracks a page view at `now`. Channel capacity is reserved before the
    /// session changes, so a rejected hit leaves the cache untouched.
    pub async fn hit(&self, hit: &HitRequest, now: DateTime<Utc>) -> Result<()> {
        let senders = self.senders()?;
        metrics().hits_received.inc();
        if let Err(e) = validate_hit(hit) {
            metrics().hits_rejected.inc();
            return Err(e);
        }

        let Some(accepted) = self.accept(&senders, hit, now).await? else {
            return Ok(());
        };

        let page_views = self.reserve(&senders.page_views).await?;
        let sessions = self.reserve(&senders.sessions).await?;
        let transition = self.cache.find_or_create(
            hit.client_id,
            accepted.visitor_id,
            now,
            Visit {
                kind: HitKind::PageView,
                path: &accepted.page.path,
                title: &hit.title,
                attributes: &accepted.attributes,
            },
            accepted.stored.as_ref(),
        );

        let row = page_view(&transition, now, &accepted.page.path, &hit.title, &accepted.attributes);
        page_views.send(vec![row]);
        sessions.send(session_rows(&transition));
        Ok(())
    }

    /// Tracks a custom event at `now`. A visitor without a live session gets
    /// a new session and a page view for the event's page first.
    pub async fn event(
        &self,
        event: &EventRequest,
        hit: &HitRequest,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let senders = self.senders()?;
        metrics().events_received.inc();
        if let Err(e) = validate_event(event, hit) {
            metrics().hits_rejected.inc();
            return Err(e);
        }

        let Some(accepted) = self.accept(&senders, hit, now).await? else {
            return Ok(());
        };

        let page_views = self.reserve(&senders.page_views).await?;
        let sessions = self.reserve(&senders.sessions).await?;
        let events = self.reserve(&senders.events).await?;
        let transition = self.cache.find_or_create(
            hit.client_id,
            accepted.visitor_id,
            now,
            Visit {
                kind: HitKind::Event,
                path: &accepted.page.path,
                title: &hit.title,
                attributes: &accepted.attributes,
            },
            accepted.stored.as_ref(),
        );

        if transition.prior.is_none() {
            let row = page_view(&transition, now, &accepted.page.path, &hit.title, &accepted.attributes);
            page_views.send(vec![row]);
        }
        sessions.send(session_rows(&transition));

        let (event_meta_keys, event_meta_values) = event
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .unzip();
        let row = Event {
            client_id: hit.client_id,
            visitor_id: accepted.visitor_id,
            time: now,
            session_id: transition.state.session_id,
            event_name: event.name.trim().to_string(),
            event_meta_keys,
            event_meta_values,
            duration_seconds: event.duration_seconds,
            path: accepted.page.path,
            title: hit.title.clone(),
            attributes: accepted.attributes,
        };
        events.send(vec![row]);
        Ok(())
    }

    /// Runs the checks shared by hits and events and resolves the visitor.
    /// `None` means the hit is not tracked.
    async fn accept(
        &self,
        senders: &Senders,
        hit: &HitRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<Accepted>> {
        let user_agent = self.user_agent_parser.parse(&hit.user_agent);
        if user_agent.crawler {
            metrics().hits_dropped_bot.inc();
            debug!(client_id = hit.client_id, "Dropped crawler hit");
            return Ok(None);
        }

        if self.bots.sample_user_agent(now, &hit.user_agent) {
            let row = UserAgent {
                time: now,
                user_agent: hit.user_agent.clone(),
            };
            self.reserve(&senders.user_agents).await?.send(vec![row]);
        }

        if !self.bots.accept(now, &hit.ip, &hit.user_agent) {
            metrics().hits_dropped_bot.inc();
            debug!(client_id = hit.client_id, "Dropped hit over daily limit");
            return Ok(None);
        }

        let page = Page::parse(&hit.url)?;
        let attributes = attributes(hit, &page, &user_agent, self.geo.lookup(&hit.ip));
        let (visitor_id, stored) = self.resolve_visitor(hit, now).await;
        Ok(Some(Accepted {
            visitor_id,
            stored,
            page,
            attributes,
        }))
    }

    /// Picks today's or yesterday's fingerprint, whichever has a live
    /// session, and loads a stored session on a cache miss.
    async fn resolve_visitor(&self, hit: &HitRequest, now: DateTime<Utc>) -> (u64, Option<Session>) {
        let (today, yesterday) = self.salts.current(now);
        let current = fingerprint(&today, &hit.ip, &hit.user_agent);
        let previous = fingerprint(&yesterday, &hit.ip, &hit.user_agent);

        if self.cache.contains_live(hit.client_id, current, now) {
            return (current, None);
        }
        if previous != current && self.cache.contains_live(hit.client_id, previous, now) {
            return (previous, None);
        }
        if !self.config.lookup_store_sessions {
            return (current, None);
        }

        let max_age = now
            - chrono::Duration::from_std(self.config.inactivity_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        for visitor_id in [current, previous] {
            match self.store.session(hit.client_id, visitor_id, max_age).await {
                Ok(Some(session)) => return (visitor_id, Some(session)),
                Ok(None) => {}
                Err(e) => {
                    warn!(client_id = hit.client_id, error = %e, "Session lookup failed");
                    break;
                }
            }
            if previous == current {
                break;
            }
        }
        (current, None)
    }

    async fn reserve<'a, T: Record>(&self, tx: &'a mpsc::Sender<Message<T>>) -> Result<Slot<'a, T>> {
        batch::reserve(tx, self.config.enqueue_timeout).await
    }

    /// Saves everything accepted so far and waits for the inserts to finish.
    pub async fn flush(&self) -> Result<()> {
        let senders = self.senders()?;
        flush_channel(&senders.page_views).await?;
        flush_channel(&senders.sessions).await?;
        flush_channel(&senders.events).await?;
        flush_channel(&senders.user_agents).await?;
        drop(senders);
        self.wait_for_workers().await
    }

    async fn wait_for_workers(&self) -> Result<()> {
        let all = self.config.workers as u32;
        for pool in &self.pools {
            let _permits = pool
                .acquire_many(all)
                .await
                .map_err(|_| Error::internal("worker pool closed"))?;
        }
        Ok(())
    }

    /// Flushes and stops the tracker. Records still queued when the grace
    /// period ends are dropped. Later calls to `hit`, `event` and `flush`
    /// fail with `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let Some(senders) = self.senders.write().take() else {
            return Ok(());
        };
        drop(senders);
        self.sweeper_cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let drain = async {
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Tracker task failed");
                }
            }
            self.wait_for_workers().await
        };

        match tokio::time::timeout(self.config.stop_grace_period, drain).await {
            Ok(result) => {
                info!("Tracker stopped");
                result
            }
            Err(_) => {
                self.cancel.cancel();
                error!(
                    grace_period_secs = self.config.stop_grace_period.as_secs(),
                    "Tracker stop timed out; dropping queued records"
                );
                Ok(())
            }
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
    }
}

fn spawn_collector<T: Record>(
    config: &TrackerConfig,
    store: &Arc<dyn Store>,
    options: &TrackerOptions,
    cancel: &CancellationToken,
) -> (mpsc::Sender<Message<T>>, Arc<Semaphore>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pool = Arc::new(Semaphore::new(config.workers));
    let collector = Collector::<T> {
        rx,
        store: store.clone(),
        pool: pool.clone(),
        batch_size: config.batch_size,
        max_age: config.batch_max_age,
        on_error: options.on_error.clone(),
        cancel: cancel.clone(),
    };
    (tx, pool, tokio::spawn(collector.run()))
}

fn spawn_sweeper(
    cache: Arc<SessionCache>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = cache.evict(Utc::now());
                    if evicted > 0 {
                        debug!(evicted = evicted, "Evicted sessions");
                    }
                }
            }
        }
    })
}

async fn flush_channel<T: Record>(tx: &mpsc::Sender<Message<T>>) -> Result<()> {
    let (done, wait) = oneshot::channel();
    tx.send(Message::Flush(done))
        .await
        .map_err(|_| Error::Stopped)?;
    wait.await.map_err(|_| Error::Stopped)
}

fn page_view(
    transition: &Transition,
    now: DateTime<Utc>,
    path: &str,
    title: &str,
    attributes: &VisitAttributes,
) -> PageView {
    let state: &SessionState = &transition.state;
    PageView {
        client_id: state.client_id,
        visitor_id: state.visitor_id,
        session_id: state.session_id,
        time: now,
        duration_seconds: transition.since_secs,
        path: path.to_string(),
        title: title.to_string(),
        attributes: attributes.clone(),
    }
}

/// The cancel row of the prior state, if any, followed by the new state.
fn session_rows(transition: &Transition) -> Vec<Session> {
    let mut rows = Vec::with_capacity(2);
    if let Some(prior) = &transition.prior {
        rows.push(prior.to_row(Sign::Cancel));
    }
    rows.push(transition.state.to_row(Sign::State));
    rows
}
