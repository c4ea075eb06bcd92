//! Statistics results returned by the analyzer.

use serde::{Deserialize, Serialize};

/// Per-page statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub sessions: u64,
    pub relative_visitors: f64,
    pub views: u64,
    pub relative_views: f64,
    pub bounces: u64,
    pub bounce_rate: f64,
    pub average_time_spent_seconds: u64,
}

/// Entry page statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub sessions: u64,
    pub entries: u64,
    pub entry_rate: f64,
    pub average_time_spent_seconds: u64,
}

/// Exit page statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub sessions: u64,
    pub exits: u64,
    pub exit_rate: f64,
}

/// Visitors, sessions and views of one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalVisitorSessionStats {
    pub path: String,
    pub visitors: u64,
    pub sessions: u64,
    pub views: u64,
}

/// Average time on page of one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvgTimeSpentStats {
    pub path: String,
    pub average_time_spent_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub visitors: u64,
    pub views: u64,
    pub cr: f64,
}

/// Visitors grouped by a single string dimension (language, country, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub value: String,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSizeStats {
    pub screen_width: u16,
    pub screen_height: u16,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub platform_desktop: u64,
    pub platform_mobile: u64,
    pub platform_unknown: u64,
    pub relative_platform_desktop: f64,
    pub relative_platform_mobile: f64,
    pub relative_platform_unknown: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveVisitorStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
}

/// Per event name statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub name: String,
    pub visitors: u64,
    pub count: u64,
    pub cr: f64,
    pub average_duration_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalVisitorStats {
    pub visitors: u64,
    pub sessions: u64,
    pub views: u64,
    pub bounces: u64,
    pub bounce_rate: f64,
    /// Set when the filter asks for the average time on page.
    pub average_time_spent_seconds: u64,
}
