//! Tracker configuration.

use std::time::Duration;

use pirsch_core::session::{DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MAX_SESSION_LENGTH};
use pirsch_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tracker settings as loaded from configuration files and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Secret the daily fingerprint salt is derived from
    #[serde(default)]
    pub salt: String,
    /// Inactivity after which a hit starts a new session, in seconds
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    /// Absolute session length, in seconds
    #[serde(default = "default_max_session_length_secs")]
    pub max_session_length_secs: u64,
    /// Concurrent batch inserts per record channel
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum batch age in milliseconds
    #[serde(default = "default_batch_max_age_ms")]
    pub batch_max_age_ms: u64,
    /// Capacity of each record channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Session cache shards
    #[serde(default = "default_shards")]
    pub shards: usize,
    /// Session cache sweep interval in seconds
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// Hits accepted per (ip, user agent) and day; 0 disables the limit
    #[serde(default)]
    pub max_hits_per_day: u32,
    /// Time `stop` waits for queued records, in seconds
    #[serde(default = "default_stop_grace_period_secs")]
    pub stop_grace_period_secs: u64,
    /// How long a hit waits for channel capacity, in milliseconds; blocks when unset
    #[serde(default)]
    pub enqueue_timeout_ms: Option<u64>,
    /// Hits closer together than this raise the session bot counter, in milliseconds
    #[serde(default = "default_min_page_view_interval_ms")]
    pub min_page_view_interval_ms: u64,
    /// Continue sessions from the store on a cache miss
    #[serde(default = "default_lookup_store_sessions")]
    pub lookup_store_sessions: bool,
}

fn default_inactivity_timeout_secs() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT.as_secs()
}

fn default_max_session_length_secs() -> u64 {
    DEFAULT_MAX_SESSION_LENGTH.as_secs()
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_max_age_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_shards() -> usize {
    64
}

fn default_eviction_interval_secs() -> u64 {
    60
}

fn default_stop_grace_period_secs() -> u64 {
    10
}

fn default_min_page_view_interval_ms() -> u64 {
    500
}

fn default_lookup_store_sessions() -> bool {
    true
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            salt: String::new(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            max_session_length_secs: default_max_session_length_secs(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            batch_max_age_ms: default_batch_max_age_ms(),
            channel_capacity: default_channel_capacity(),
            shards: default_shards(),
            eviction_interval_secs: default_eviction_interval_secs(),
            max_hits_per_day: 0,
            stop_grace_period_secs: default_stop_grace_period_secs(),
            enqueue_timeout_ms: None,
            min_page_view_interval_ms: default_min_page_view_interval_ms(),
            lookup_store_sessions: default_lookup_store_sessions(),
        }
    }
}

/// Typed tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub salt: String,
    pub inactivity_timeout: Duration,
    pub max_session_length: Duration,
    pub workers: usize,
    pub batch_size: usize,
    pub batch_max_age: Duration,
    pub channel_capacity: usize,
    pub shards: usize,
    pub eviction_interval: Duration,
    pub max_hits_per_day: u32,
    pub stop_grace_period: Duration,
    pub enqueue_timeout: Option<Duration>,
    pub min_page_view_interval: Duration,
    pub lookup_store_sessions: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerSettings::default().into()
    }
}

impl From<TrackerSettings> for TrackerConfig {
    fn from(s: TrackerSettings) -> Self {
        Self {
            salt: s.salt,
            inactivity_timeout: Duration::from_secs(s.inactivity_timeout_secs),
            max_session_length: Duration::from_secs(s.max_session_length_secs),
            workers: s.workers,
            batch_size: s.batch_size,
            batch_max_age: Duration::from_millis(s.batch_max_age_ms),
            channel_capacity: s.channel_capacity,
            shards: s.shards,
            eviction_interval: Duration::from_secs(s.eviction_interval_secs),
            max_hits_per_day: s.max_hits_per_day,
            stop_grace_period: Duration::from_secs(s.stop_grace_period_secs),
            enqueue_timeout: s.enqueue_timeout_ms.map(Duration::from_millis),
            min_page_view_interval: Duration::from_millis(s.min_page_view_interval_ms),
            lookup_store_sessions: s.lookup_store_sessions,
        }
    }
}

impl TrackerConfig {
    /// Rejects configurations the tracker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.batch_max_age.is_zero() {
            return Err(Error::config("batch_max_age must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be at least 1"));
        }
        if self.shards == 0 {
            return Err(Error::config("shards must be at least 1"));
        }
        if self.eviction_interval.is_zero() {
            return Err(Error::config("eviction_interval must be positive"));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(Error::config("inactivity_timeout must be positive"));
        }
        if self.inactivity_timeout > self.max_session_length {
            return Err(Error::config(
                "inactivity_timeout cannot exceed max_session_length",
            ));
        }
        Ok(())
    }
}
