//! Closed catalog of selectable and groupable fields.

use crate::error::{Error, Result};
use crate::filter::Direction;

/// Which stored relation a field needs beyond plain page view rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Available on page view and event rows alike.
    Any,
    /// Needs the collapsed session state.
    Session,
    /// Only defined for event rows.
    Event,
}

/// Scalar total a relative field is divided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Total {
    Visitors,
    Views,
}

/// A field of the query vocabulary.
///
/// `rows` is the expression over page view or event rows (`v`), joined with
/// the per-session aggregate `s` when needed. `sessions` is the expression
/// over sessions collapsed to one row each (columns `live`, `views_sum`,
/// `bounced`). A `None` expression means the field is not available in that
/// shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: &'static str,
    pub rows: Option<&'static str>,
    pub sessions: Option<&'static str>,
    pub direction: Direction,
    pub affinity: Affinity,
    pub aggregate: bool,
    pub total: Option<Total>,
}

const fn dimension(name: &'static str, rows: &'static str, sessions: &'static str) -> Field {
    Field {
        name,
        rows: Some(rows),
        sessions: Some(sessions),
        direction: Direction::Asc,
        affinity: Affinity::Any,
        aggregate: false,
        total: None,
    }
}

const fn page_dimension(name: &'static str, rows: &'static str) -> Field {
    Field {
        name,
        rows: Some(rows),
        sessions: None,
        direction: Direction::Asc,
        affinity: Affinity::Any,
        aggregate: false,
        total: None,
    }
}

const fn session_dimension(name: &'static str) -> Field {
    Field {
        name,
        rows: None,
        sessions: Some(name),
        direction: Direction::Asc,
        affinity: Affinity::Session,
        aggregate: false,
        total: None,
    }
}

impl Field {
    pub const VISITORS: Field = Field {
        name: "visitors",
        rows: Some("uniq(v.visitor_id)"),
        sessions: Some("uniq(visitor_id)"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: None,
    };
    pub const SESSIONS: Field = Field {
        name: "sessions",
        rows: Some("uniq(v.visitor_id, v.session_id)"),
        sessions: Some("toUInt64(sum(live))"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: None,
    };
    pub const VIEWS: Field = Field {
        name: "views",
        rows: Some("count(*)"),
        sessions: Some("toUInt64(sum(views_sum))"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: None,
    };
    pub const BOUNCES: Field = Field {
        name: "bounces",
        rows: Some("uniqIf(v.visitor_id, v.session_id, s.bounced > 0)"),
        sessions: Some("toUInt64(sum(bounced))"),
        direction: Direction::Desc,
        affinity: Affinity::Session,
        aggregate: true,
        total: None,
    };
    pub const BOUNCE_RATE: Field = Field {
        name: "bounce_rate",
        rows: Some(
            "uniqIf(v.visitor_id, v.session_id, s.bounced > 0) / greatest(uniq(v.visitor_id, v.session_id), 1)",
        ),
        sessions: Some("sum(bounced) / greatest(sum(live), 1)"),
        direction: Direction::Desc,
        affinity: Affinity::Session,
        aggregate: true,
        total: None,
    };
    pub const RELATIVE_VISITORS: Field = Field {
        name: "relative_visitors",
        rows: Some("uniq(v.visitor_id)"),
        sessions: Some("uniq(visitor_id)"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: Some(Total::Visitors),
    };
    pub const RELATIVE_VIEWS: Field = Field {
        name: "relative_views",
        rows: Some("count(*)"),
        sessions: Some("sum(views_sum)"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: Some(Total::Views),
    };
    /// Conversion rate: matching visitors relative to all visitors.
    pub const CR: Field = Field {
        name: "cr",
        rows: Some("uniq(v.visitor_id)"),
        sessions: Some("uniq(visitor_id)"),
        direction: Direction::Desc,
        affinity: Affinity::Any,
        aggregate: true,
        total: Some(Total::Visitors),
    };
    pub const ENTRIES: Field = Field {
        name: "entries",
        rows: None,
        sessions: Some("toUInt64(sum(live))"),
        direction: Direction::Desc,
        affinity: Affinity::Session,
        aggregate: true,
        total: None,
    };
    pub const EXITS: Field = Field {
        name: "exits",
        rows: None,
        sessions: Some("toUInt64(sum(live))"),
        direction: Direction::Desc,
        affinity: Affinity::Session,
        aggregate: true,
        total: None,
    };
    pub const EVENT_TIME_SPENT: Field = Field {
        name: "average_time_spent_seconds",
        rows: Some("toUInt64(avg(v.duration_seconds))"),
        sessions: None,
        direction: Direction::Desc,
        affinity: Affinity::Event,
        aggregate: true,
        total: None,
    };
    /// Number of event rows.
    pub const COUNT: Field = Field {
        name: "count",
        rows: Some("count(*)"),
        sessions: None,
        direction: Direction::Desc,
        affinity: Affinity::Event,
        aggregate: true,
        total: None,
    };

    pub const PATH: Field = page_dimension("path", "v.path");
    pub const TITLE: Field = page_dimension("title", "v.title");
    pub const ENTRY_PATH: Field = session_dimension("entry_path");
    pub const EXIT_PATH: Field = session_dimension("exit_path");
    pub const ENTRY_TITLE: Field = session_dimension("entry_title");
    pub const EXIT_TITLE: Field = session_dimension("exit_title");
    pub const LANGUAGE: Field = dimension("language", "v.language", "language");
    pub const COUNTRY: Field = dimension("country_code", "v.country_code", "country_code");
    pub const CITY: Field = dimension("city", "v.city", "city");
    pub const REFERRER: Field = dimension("referrer", "v.referrer", "referrer");
    pub const REFERRER_NAME: Field = dimension("referrer_name", "v.referrer_name", "referrer_name");
    pub const REFERRER_ICON: Field = dimension("referrer_icon", "v.referrer_icon", "referrer_icon");
    pub const OS: Field = dimension("os", "v.os", "os");
    pub const OS_VERSION: Field = dimension("os_version", "v.os_version", "os_version");
    pub const BROWSER: Field = dimension("browser", "v.browser", "browser");
    pub const BROWSER_VERSION: Field =
        dimension("browser_version", "v.browser_version", "browser_version");
    pub const SCREEN_CLASS: Field = dimension("screen_class", "v.screen_class", "screen_class");
    pub const SCREEN_WIDTH: Field = dimension("screen_width", "v.screen_width", "screen_width");
    pub const SCREEN_HEIGHT: Field = dimension("screen_height", "v.screen_height", "screen_height");
    pub const UTM_SOURCE: Field = dimension("utm_source", "v.utm_source", "utm_source");
    pub const UTM_MEDIUM: Field = dimension("utm_medium", "v.utm_medium", "utm_medium");
    pub const UTM_CAMPAIGN: Field = dimension("utm_campaign", "v.utm_campaign", "utm_campaign");
    pub const UTM_CONTENT: Field = dimension("utm_content", "v.utm_content", "utm_content");
    pub const UTM_TERM: Field = dimension("utm_term", "v.utm_term", "utm_term");
    pub const EVENT_NAME: Field = Field {
        name: "event_name",
        rows: Some("v.event_name"),
        sessions: None,
        direction: Direction::Asc,
        affinity: Affinity::Event,
        aggregate: false,
        total: None,
    };

    /// Every field of the vocabulary.
    pub const ALL: &'static [Field] = &[
        Self::VISITORS,
        Self::SESSIONS,
        Self::VIEWS,
        Self::BOUNCES,
        Self::BOUNCE_RATE,
        Self::RELATIVE_VISITORS,
        Self::RELATIVE_VIEWS,
        Self::CR,
        Self::ENTRIES,
        Self::EXITS,
        Self::EVENT_TIME_SPENT,
        Self::COUNT,
        Self::PATH,
        Self::TITLE,
        Self::ENTRY_PATH,
        Self::EXIT_PATH,
        Self::ENTRY_TITLE,
        Self::EXIT_TITLE,
        Self::LANGUAGE,
        Self::COUNTRY,
        Self::CITY,
        Self::REFERRER,
        Self::REFERRER_NAME,
        Self::REFERRER_ICON,
        Self::OS,
        Self::OS_VERSION,
        Self::BROWSER,
        Self::BROWSER_VERSION,
        Self::SCREEN_CLASS,
        Self::SCREEN_WIDTH,
        Self::SCREEN_HEIGHT,
        Self::UTM_SOURCE,
        Self::UTM_MEDIUM,
        Self::UTM_CAMPAIGN,
        Self::UTM_CONTENT,
        Self::UTM_TERM,
        Self::EVENT_NAME,
    ];

    /// Looks up a field by its output name.
    pub fn by_name(name: &str) -> Result<Field> {
        Self::ALL
            .iter()
            .find(|f| f.name == name)
            .copied()
            .ok_or_else(|| Error::config(format!("unknown field {:?}", name)))
    }

    /// Only defined on collapsed sessions.
    pub fn session_only(&self) -> bool {
        self.rows.is_none()
    }
}
