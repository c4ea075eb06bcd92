//! Stored record types: page views, collapsing session rows, events and
//! sampled user agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attributes derived from a request and copied onto every stored row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitAttributes {
    pub language: String,
    pub country_code: String,
    pub city: String,
    pub referrer: String,
    pub referrer_name: String,
    pub referrer_icon: String,
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub desktop: bool,
    pub mobile: bool,
    pub screen_width: u16,
    pub screen_height: u16,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

/// One row per page load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageView {
    pub client_id: u64,
    pub visitor_id: u64,
    pub session_id: u64,
    pub time: DateTime<Utc>,
    /// Seconds since the previous page view of the same session.
    pub duration_seconds: u32,
    pub path: String,
    pub title: String,
    pub attributes: VisitAttributes,
}

/// Sign of a collapsing session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Cancel,
    State,
}

impl Sign {
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Cancel => -1,
            Self::State => 1,
        }
    }

    pub fn from_i8(sign: i8) -> Self {
        if sign < 0 {
            Self::Cancel
        } else {
            Self::State
        }
    }
}

/// Collapsing session row. A state change is written as the prior row with
/// `Sign::Cancel` followed by the new row with `Sign::State`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sign: Sign,
    pub client_id: u64,
    pub visitor_id: u64,
    pub session_id: u64,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub duration_seconds: u32,
    pub entry_path: String,
    pub exit_path: String,
    pub page_views: u16,
    pub is_bounce: bool,
    pub entry_title: String,
    pub exit_title: String,
    pub attributes: VisitAttributes,
    /// Number of hits that arrived faster than the minimum page view interval.
    pub is_bot: u8,
}

impl Session {
    /// Copy of this row with the cancelling sign.
    pub fn cancelled(&self) -> Self {
        Self {
            sign: Sign::Cancel,
            ..self.clone()
        }
    }
}

/// Custom event. `meta_keys` and `meta_values` always have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub client_id: u64,
    pub visitor_id: u64,
    pub time: DateTime<Utc>,
    pub session_id: u64,
    pub event_name: String,
    pub event_meta_keys: Vec<String>,
    pub event_meta_values: Vec<String>,
    pub duration_seconds: u32,
    pub path: String,
    pub title: String,
    pub attributes: VisitAttributes,
}

/// User agent sampled once per distinct string and day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub time: DateTime<Utc>,
    pub user_agent: String,
}
