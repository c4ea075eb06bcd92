//! Per-day hit limits per (ip, user agent) and user agent sampling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use pirsch_core::fingerprint;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_SIGNATURES: u64 = 1_000_000;
const MAX_SAMPLED_USER_AGENTS: u64 = 100_000;

/// Counts hits per signature and UTC day.
pub struct BotFilter {
    max_hits_per_day: u32,
    hits: Cache<u64, Arc<AtomicU32>>,
    sampled: Cache<u64, ()>,
}

impl BotFilter {
    /// `max_hits_per_day == 0` accepts every hit.
    pub fn new(max_hits_per_day: u32) -> Self {
        Self {
            max_hits_per_day,
            hits: Cache::builder()
                .max_capacity(MAX_SIGNATURES)
                .time_to_live(DAY)
                .build(),
            sampled: Cache::builder()
                .max_capacity(MAX_SAMPLED_USER_AGENTS)
                .time_to_live(DAY)
                .build(),
        }
    }

    /// Records a hit and reports whether it is within the daily limit.
    pub fn accept(&self, now: DateTime<Utc>, ip: &str, user_agent: &str) -> bool {
        if self.max_hits_per_day == 0 {
            return true;
        }
        let signature = fingerprint(&day(now), ip, user_agent);
        let counter = self
            .hits
            .get_with(signature, || Arc::new(AtomicU32::new(0)));
        let seen = counter.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        seen <= self.max_hits_per_day
    }

    /// True the first time a user agent is seen on a UTC day.
    pub fn sample_user_agent(&self, now: DateTime<Utc>, user_agent: &str) -> bool {
        if user_agent.is_empty() {
            return false;
        }
        let key = fingerprint(&day(now), "", user_agent);
        self.sampled.entry(key).or_insert(()).is_fresh()
    }
}

fn day(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}
