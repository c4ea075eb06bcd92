//! ClickHouse table schemas.
//!
//! - DateTime64(3, 'UTC') for millisecond precision, written as i64 millis
//! - LowCardinality for enum-like fields
//! - `session` is a CollapsingMergeTree on `sign`; every state change is a
//!   cancel row (-1) of the prior state followed by the new state (+1)

/// SQL for creating the page view table.
pub const CREATE_PAGE_VIEW_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS page_view (
    client_id UInt64,
    visitor_id UInt64,
    session_id UInt64,
    time DateTime64(3, 'UTC'),
    duration_seconds UInt32,
    path String,
    title String,
    language LowCardinality(String),
    country_code LowCardinality(String),
    city String,
    referrer String,
    referrer_name String,
    referrer_icon String,
    os LowCardinality(String),
    os_version LowCardinality(String),
    browser LowCardinality(String),
    browser_version LowCardinality(String),
    desktop UInt8,
    mobile UInt8,
    screen_width UInt16,
    screen_height UInt16,
    screen_class LowCardinality(String),
    utm_source String,
    utm_medium String,
    utm_campaign String,
    utm_content String,
    utm_term String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(time)
ORDER BY (client_id, visitor_id, session_id, time)
SETTINGS index_granularity = 8192
"#;

/// SQL for creating the collapsing session table.
///
/// Partitioned by `start`, which never changes within a session, so the
/// cancel and state rows of one session always meet in the same partition.
pub const CREATE_SESSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    sign Int8,
    client_id UInt64,
    visitor_id UInt64,
    session_id UInt64,
    time DateTime64(3, 'UTC'),
    start DateTime64(3, 'UTC'),
    duration_seconds UInt32,
    entry_path String,
    exit_path String,
    page_views UInt16,
    is_bounce UInt8,
    entry_title String,
    exit_title String,
    language LowCardinality(String),
    country_code LowCardinality(String),
    city String,
    referrer String,
    referrer_name String,
    referrer_icon String,
    os LowCardinality(String),
    os_version LowCardinality(String),
    browser LowCardinality(String),
    browser_version LowCardinality(String),
    desktop UInt8,
    mobile UInt8,
    screen_width UInt16,
    screen_height UInt16,
    screen_class LowCardinality(String),
    utm_source String,
    utm_medium String,
    utm_campaign String,
    utm_content String,
    utm_term String,
    is_bot UInt8
)
ENGINE = CollapsingMergeTree(sign)
PARTITION BY toYYYYMM(start)
ORDER BY (client_id, visitor_id, session_id)
SETTINGS index_granularity = 8192
"#;

/// SQL for creating the custom event table.
pub const CREATE_EVENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event (
    client_id UInt64,
    visitor_id UInt64,
    time DateTime64(3, 'UTC'),
    session_id UInt64,
    event_name String,
    event_meta_keys Array(String),
    event_meta_values Array(String),
    duration_seconds UInt32,
    path String,
    title String,
    language LowCardinality(String),
    country_code LowCardinality(String),
    city String,
    referrer String,
    referrer_name String,
    referrer_icon String,
    os LowCardinality(String),
    os_version LowCardinality(String),
    browser LowCardinality(String),
    browser_version LowCardinality(String),
    desktop UInt8,
    mobile UInt8,
    screen_width UInt16,
    screen_height UInt16,
    screen_class LowCardinality(String),
    utm_source String,
    utm_medium String,
    utm_campaign String,
    utm_content String,
    utm_term String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(time)
ORDER BY (client_id, visitor_id, session_id, event_name, time)
SETTINGS index_granularity = 8192
"#;

/// SQL for creating the sampled user agent table.
pub const CREATE_USER_AGENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_agent (
    time DateTime64(3, 'UTC'),
    user_agent String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(time)
ORDER BY (time, user_agent)
"#;

/// Table names in creation order.
pub const TABLES: [&str; 4] = ["page_view", "session", "event", "user_agent"];

/// DDL statements for all tables, in creation order.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_PAGE_VIEW_TABLE,
        CREATE_SESSION_TABLE,
        CREATE_EVENT_TABLE,
        CREATE_USER_AGENT_TABLE,
    ]
}

/// Statement creating the configured database.
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS `{}`", database.replace('`', ""))
}
