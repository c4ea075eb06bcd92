//! Visitor fingerprints and daily salts.

use chrono::{DateTime, Days, NaiveDate, Utc};
use xxhash_rust::xxh3::xxh3_64;

/// Derives the salt for a UTC day from a configured secret.
///
/// The salt changes at UTC midnight, which bounds visitor re-identification
/// to the current and the previous day.
#[derive(Debug, Clone)]
pub struct Salts {
    secret: String,
}

impl Salts {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Salt for the given UTC day.
    pub fn for_day(&self, day: NaiveDate) -> String {
        format!("{}{}", self.secret, day.format("%Y%m%d"))
    }

    /// Today's and yesterday's salts at `now`.
    pub fn current(&self, now: DateTime<Utc>) -> (String, String) {
        let today = now.date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        (self.for_day(today), self.for_day(yesterday))
    }
}

/// Fingerprint of a visitor: xxh3 over salt, IP and user agent.
pub fn fingerprint(salt: &str, ip: &str, user_agent: &str) -> u64 {
    let mut buf = Vec::with_capacity(salt.len() + ip.len() + user_agent.len());
    buf.extend_from_slice(salt.as_bytes());
    buf.extend_from_slice(ip.as_bytes());
    buf.extend_from_slice(user_agent.as_bytes());
    xxh3_64(&buf)
}
