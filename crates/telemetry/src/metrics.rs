//! In-process metrics for the tracker and the ClickHouse store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.sub(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn sub(&self, n: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    // Tracker
    pub hits_received: Counter,
    pub hits_rejected: Counter,
    pub hits_dropped_bot: Counter,
    pub events_received: Counter,
    pub sessions_created: Counter,
    pub sessions_continued: Counter,
    pub sessions_evicted: Counter,
    pub records_dropped: Counter,

    // Store
    pub page_views_saved: Counter,
    pub sessions_saved: Counter,
    pub events_saved: Counter,
    pub user_agents_saved: Counter,
    pub store_errors: Counter,
    pub queries: Counter,

    // Latency histograms
    pub batch_insert_latency_ms: Histogram,
    pub query_latency_ms: Histogram,

    // Gauges
    pub cached_sessions: Gauge,
    pub queued_records: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hits_received: u64,
    pub hits_rejected: u64,
    pub hits_dropped_bot: u64,
    pub events_received: u64,
    pub sessions_created: u64,
    pub sessions_continued: u64,
    pub sessions_evicted: u64,
    pub records_dropped: u64,
    pub page_views_saved: u64,
    pub sessions_saved: u64,
    pub events_saved: u64,
    pub user_agents_saved: u64,
    pub store_errors: u64,
    pub queries: u64,
    pub batch_insert_latency_mean_ms: f64,
    pub query_latency_mean_ms: f64,
    pub cached_sessions: u64,
    pub queued_records: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            hits_received: self.hits_received.get(),
            hits_rejected: self.hits_rejected.get(),
            hits_dropped_bot: self.hits_dropped_bot.get(),
            events_received: self.events_received.get(),
            sessions_created: self.sessions_created.get(),
            sessions_continued: self.sessions_continued.get(),
            sessions_evicted: self.sessions_evicted.get(),
            records_dropped: self.records_dropped.get(),
            page_views_saved: self.page_views_saved.get(),
            sessions_saved: self.sessions_saved.get(),
            events_saved: self.events_saved.get(),
            user_agents_saved: self.user_agents_saved.get(),
            store_errors: self.store_errors.get(),
            queries: self.queries.get(),
            batch_insert_latency_mean_ms: self.batch_insert_latency_ms.mean(),
            query_latency_mean_ms: self.query_latency_ms.mean(),
            cached_sessions: self.cached_sessions.get(),
            queued_records: self.queued_records.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
