//! Batch insert helpers for ClickHouse.

use std::time::Instant;

use crate::client::ClickHouseClient;
use crate::error::{classify, timed_out};
use chrono::{DateTime, Utc};
use clickhouse::Row;
use pirsch_core::{Event, PageView, Result, Session, Sign, UserAgent, VisitAttributes};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tracing::debug;

/// Page view row.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct PageViewRow {
    pub client_id: u64,
    pub visitor_id: u64,
    pub session_id: u64,
    pub time: i64, // DateTime64(3) as milliseconds
    pub duration_seconds: u32,
    pub path: String,
    pub title: String,
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
    pub desktop: u8,
    pub mobile: u8,
    pub screen_width: u16,
    pub screen_height: u16,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

impl From<&PageView> for PageViewRow {
    fn from(pv: &PageView) -> Self {
        let a = &pv.attributes;
        Self {
            client_id: pv.client_id,
            visitor_id: pv.visitor_id,
            session_id: pv.session_id,
            time: pv.time.timestamp_millis(),
            duration_seconds: pv.duration_seconds,
            path: pv.path.clone(),
            title: pv.title.clone(),
            language: a.language.clone(),
            country_code: a.country_code.clone(),
            city: a.city.clone(),
            referrer: a.referrer.clone(),
            referrer_name: a.referrer_name.clone(),
            referrer_icon: a.referrer_icon.clone(),
            os: a.os.clone(),
            os_version: a.os_version.clone(),
            browser: a.browser.clone(),
            browser_version: a.browser_version.clone(),
            desktop: a.desktop as u8,
            mobile: a.mobile as u8,
            screen_width: a.screen_width,
            screen_height: a.screen_height,
            screen_class: a.screen_class.clone(),
            utm_source: a.utm_source.clone(),
            utm_medium: a.utm_medium.clone(),
            utm_campaign: a.utm_campaign.clone(),
            utm_content: a.utm_content.clone(),
            utm_term: a.utm_term.clone(),
        }
    }
}

/// Collapsing session row.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct SessionRow {
    pub sign: i8,
    pub client_id: u64,
    pub visitor_id: u64,
    pub session_id: u64,
    pub time: i64,
    pub start: i64,
    pub duration_seconds: u32,
    pub entry_path: String,
    pub exit_path: String,
    pub page_views: u16,
    pub is_bounce: u8,
    pub entry_title: String,
    pub exit_title: String,
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
    pub desktop: u8,
    pub mobile: u8,
    pub screen_width: u16,
    pub screen_height: u16,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    pub is_bot: u8,
}

impl From<&Session> for SessionRow {
    fn from(s: &Session) -> Self {
        let a = &s.attributes;
        Self {
            sign: s.sign.as_i8(),
            client_id: s.client_id,
            visitor_id: s.visitor_id,
            session_id: s.session_id,
            time: s.time.timestamp_millis(),
            start: s.start.timestamp_millis(),
            duration_seconds: s.duration_seconds,
            entry_path: s.entry_path.clone(),
            exit_path: s.exit_path.clone(),
            page_views: s.page_views,
            is_bounce: s.is_bounce as u8,
            entry_title: s.entry_title.clone(),
            exit_title: s.exit_title.clone(),
            language: a.language.clone(),
            country_code: a.country_code.clone(),
            city: a.city.clone(),
            referrer: a.referrer.clone(),
            referrer_name: a.referrer_name.clone(),
            referrer_icon: a.referrer_icon.clone(),
            os: a.os.clone(),
            os_version: a.os_version.clone(),
            browser: a.browser.clone(),
            browser_version: a.browser_version.clone(),
            desktop: a.desktop as u8,
            mobile: a.mobile as u8,
            screen_width: a.screen_width,
            screen_height: a.screen_height,
            screen_class: a.screen_class.clone(),
            utm_source: a.utm_source.clone(),
            utm_medium: a.utm_medium.clone(),
            utm_campaign: a.utm_campaign.clone(),
            utm_content: a.utm_content.clone(),
            utm_term: a.utm_term.clone(),
            is_bot: s.is_bot,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            sign: Sign::from_i8(row.sign),
            client_id: row.client_id,
            visitor_id: row.visitor_id,
            session_id: row.session_id,
            time: from_millis(row.time),
            start: from_millis(row.start),
            duration_seconds: row.duration_seconds,
            entry_path: row.entry_path,
            exit_path: row.exit_path,
            page_views: row.page_views,
            is_bounce: row.is_bounce > 0,
            entry_title: row.entry_title,
            exit_title: row.exit_title,
            attributes: VisitAttributes {
                language: row.language,
                country_code: row.country_code,
                city: row.city,
                referrer: row.referrer,
                referrer_name: row.referrer_name,
                referrer_icon: row.referrer_icon,
                os: row.os,
                os_version: row.os_version,
                browser: row.browser,
                browser_version: row.browser_version,
                desktop: row.desktop > 0,
                mobile: row.mobile > 0,
                screen_width: row.screen_width,
                screen_height: row.screen_height,
                screen_class: row.screen_class,
                utm_source: row.utm_source,
                utm_medium: row.utm_medium,
                utm_campaign: row.utm_campaign,
                utm_content: row.utm_content,
                utm_term: row.utm_term,
            },
            is_bot: row.is_bot,
        }
    }
}

/// Custom event row.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct EventRow {
    pub client_id: u64,
    pub visitor_id: u64,
    pub time: i64,
    pub session_id: u64,
    pub event_name: String,
    pub event_meta_keys: Vec<String>,
    pub event_meta_values: Vec<String>,
    pub duration_seconds: u32,
    pub path: String,
    pub title: String,
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
    pub desktop: u8,
    pub mobile: u8,
    pub screen_width: u16,
    pub screen_height: u16,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

impl From<&Event> for EventRow {
    fn from(e: &Event) -> Self {
        let a = &e.attributes;
        Self {
            client_id: e.client_id,
            visitor_id: e.visitor_id,
            time: e.time.timestamp_millis(),
            session_id: e.session_id,
            event_name: e.event_name.clone(),
            event_meta_keys: e.event_meta_keys.clone(),
            event_meta_values: e.event_meta_values.clone(),
            duration_seconds: e.duration_seconds,
            path: e.path.clone(),
            title: e.title.clone(),
            language: a.language.clone(),
            country_code: a.country_code.clone(),
            city: a.city.clone(),
            referrer: a.referrer.clone(),
            referrer_name: a.referrer_name.clone(),
            referrer_icon: a.referrer_icon.clone(),
            os: a.os.clone(),
            os_version: a.os_version.clone(),
            browser: a.browser.clone(),
            browser_version: a.browser_version.clone(),
            desktop: a.desktop as u8,
            mobile: a.mobile as u8,
            screen_width: a.screen_width,
            screen_height: a.screen_height,
            screen_class: a.screen_class.clone(),
            utm_source: a.utm_source.clone(),
            utm_medium: a.utm_medium.clone(),
            utm_campaign: a.utm_campaign.clone(),
            utm_content: a.utm_content.clone(),
            utm_term: a.utm_term.clone(),
        }
    }
}

/// Sampled user agent row.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserAgentRow {
    pub time: i64,
    pub user_agent: String,
}

impl From<&UserAgent> for UserAgentRow {
    fn from(ua: &UserAgent) -> Self {
        Self {
            time: ua.time.timestamp_millis(),
            user_agent: ua.user_agent.clone(),
        }
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Writes all rows in a single INSERT. Either the statement completes or
/// the whole batch is discarded: dropping an unfinished insert aborts it.
pub async fn insert_batch<T>(client: &ClickHouseClient, table: &str, rows: Vec<T>) -> Result<usize>
where
    T: Row + Serialize,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let count = rows.len();
    let start = Instant::now();
    let timeout = client.config().timeout();
    let context = format!("insert into {}", table);

    let write = async {
        let mut insert = client
            .inner()
            .insert::<T>(table)
            .map_err(|e| classify(&context, e))?;

        for row in &rows {
            insert.write(row).await.map_err(|e| classify(&context, e))?;
        }

        insert.end().await.map_err(|e| classify(&context, e))
    };

    let result = match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(&context, timeout)),
    };

    let elapsed = start.elapsed();
    metrics()
        .batch_insert_latency_ms
        .observe(elapsed.as_millis() as u64);

    match result {
        Ok(()) => {
            debug!(
                table = table,
                count = count,
                latency_ms = %elapsed.as_millis(),
                "Inserted batch to ClickHouse"
            );
            Ok(count)
        }
        Err(e) => {
            metrics().store_errors.inc();
            Err(e)
        }
    }
}
