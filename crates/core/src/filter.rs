//! Query filter and its normalization.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::MAX_FILTER_VALUES;

/// Device class filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Mobile,
    Unknown,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Explicit sort on a selected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Case-insensitive substring search on a dimension field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Search {
    pub field: String,
    pub needle: String,
}

/// Statistics filter. Every multi-valued option accepts a `!` prefix on a
/// value to exclude it instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub client_id: u64,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub timezone: Tz,
    pub path: Vec<String>,
    pub entry_path: Vec<String>,
    pub exit_path: Vec<String>,
    /// Regular expressions matched against the path, combined with OR.
    pub path_pattern: Vec<String>,
    pub language: Vec<String>,
    pub country: Vec<String>,
    pub city: Vec<String>,
    pub referrer: Vec<String>,
    pub referrer_name: Vec<String>,
    pub os: Vec<String>,
    pub os_version: Vec<String>,
    pub browser: Vec<String>,
    pub browser_version: Vec<String>,
    pub platform: Option<Platform>,
    pub screen_class: Vec<String>,
    pub screen_width: Vec<String>,
    pub screen_height: Vec<String>,
    pub utm_source: Vec<String>,
    pub utm_medium: Vec<String>,
    pub utm_campaign: Vec<String>,
    pub utm_content: Vec<String>,
    pub utm_term: Vec<String>,
    pub event_name: Vec<String>,
    pub event_meta_key: Vec<String>,
    pub event_meta: BTreeMap<String, String>,
    pub search: Vec<Search>,
    pub sort: Vec<Sort>,
    pub offset: u32,
    pub limit: u32,
    pub include_title: bool,
    pub include_time_on_page: bool,
    /// Adds the average time on page to the visitor totals.
    pub include_avg_time_on_page: bool,
    /// Sessions with this many fast hits or more are excluded. Zero disables.
    pub min_is_bot: u8,
    /// Exact lower time bound replacing the day range (active visitors).
    #[serde(skip)]
    pub from: Option<DateTime<Utc>>,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            client_id: 0,
            start: None,
            end: None,
            timezone: Tz::UTC,
            path: Vec::new(),
            entry_path: Vec::new(),
            exit_path: Vec::new(),
            path_pattern: Vec::new(),
            language: Vec::new(),
            country: Vec::new(),
            city: Vec::new(),
            referrer: Vec::new(),
            referrer_name: Vec::new(),
            os: Vec::new(),
            os_version: Vec::new(),
            browser: Vec::new(),
            browser_version: Vec::new(),
            platform: None,
            screen_class: Vec::new(),
            screen_width: Vec::new(),
            screen_height: Vec::new(),
            utm_source: Vec::new(),
            utm_medium: Vec::new(),
            utm_campaign: Vec::new(),
            utm_content: Vec::new(),
            utm_term: Vec::new(),
            event_name: Vec::new(),
            event_meta_key: Vec::new(),
            event_meta: BTreeMap::new(),
            search: Vec::new(),
            sort: Vec::new(),
            offset: 0,
            limit: 0,
            include_title: false,
            include_time_on_page: false,
            include_avg_time_on_page: false,
            min_is_bot: 0,
            from: None,
        }
    }
}

impl Filter {
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            ..Default::default()
        }
    }

    /// Sets the day range.
    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Returns a validated copy with defaults applied, using the current time.
    pub fn normalized(&self) -> Result<Filter> {
        self.normalized_at(Utc::now())
    }

    /// Returns a validated copy with defaults applied:
    /// empty values dropped, missing dates set to today in the filter's
    /// timezone, and a reversed range swapped.
    pub fn normalized_at(&self, now: DateTime<Utc>) -> Result<Filter> {
        let mut f = self.clone();
        let today = now.with_timezone(&f.timezone).date_naive();
        let start = f.start.unwrap_or(today);
        let end = f.end.unwrap_or(today);
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        f.start = Some(start);
        f.end = Some(end);

        for values in f.multi_values_mut() {
            values.retain(|v| !v.trim().is_empty() && v.trim() != "!");
            if values.len() > MAX_FILTER_VALUES {
                return Err(Error::config(format!(
                    "filter accepts at most {} values per option",
                    MAX_FILTER_VALUES
                )));
            }
        }
        f.event_meta.retain(|k, _| !k.is_empty());
        f.search.retain(|s| !s.field.is_empty() && !s.needle.is_empty());

        for pattern in &f.path_pattern {
            Regex::new(pattern.strip_prefix('!').unwrap_or(pattern))
                .map_err(|e| Error::config(format!("invalid path pattern {:?}: {}", pattern, e)))?;
        }
        for (option, values) in [("screen_width", &f.screen_width), ("screen_height", &f.screen_height)] {
            for v in values {
                v.trim_start_matches('!')
                    .parse::<u16>()
                    .map_err(|_| Error::config(format!("{} must be numeric, got {:?}", option, v)))?;
            }
        }

        Ok(f)
    }

    fn multi_values_mut(&mut self) -> [&mut Vec<String>; 23] {
        [
            &mut self.path,
            &mut self.entry_path,
            &mut self.exit_path,
            &mut self.path_pattern,
            &mut self.language,
            &mut self.country,
            &mut self.city,
            &mut self.referrer,
            &mut self.referrer_name,
            &mut self.os,
            &mut self.os_version,
            &mut self.browser,
            &mut self.browser_version,
            &mut self.screen_class,
            &mut self.screen_width,
            &mut self.screen_height,
            &mut self.utm_source,
            &mut self.utm_medium,
            &mut self.utm_campaign,
            &mut self.utm_content,
            &mut self.utm_term,
            &mut self.event_name,
            &mut self.event_meta_key,
        ]
    }

    /// Whether an entry or exit page constraint is set.
    pub fn has_entry_exit(&self) -> bool {
        !self.entry_path.is_empty() || !self.exit_path.is_empty()
    }

    /// Whether any event constraint is set.
    pub fn has_event_filter(&self) -> bool {
        !self.event_name.is_empty() || !self.event_meta_key.is_empty() || !self.event_meta.is_empty()
    }

    /// Whether a page path constraint is set.
    pub fn has_path_filter(&self) -> bool {
        !self.path.is_empty() || !self.path_pattern.is_empty()
    }
}
