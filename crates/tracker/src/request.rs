//! Derives stored visit attributes from a raw hit.

use pirsch_core::limits::{MAX_PATH_LEN, MAX_UTM_LEN};
use pirsch_core::{Error, HitRequest, Result, VisitAttributes};
use url::Url;

use crate::ua::{Location, ParsedUserAgent};

/// The tracked page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub hostname: String,
    pub path: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

impl Page {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| Error::validation(format!("url: {}", e)))?;
        let mut page = Page {
            hostname: url.host_str().unwrap_or_default().to_lowercase(),
            path: truncate(url.path(), MAX_PATH_LEN),
            utm_source: String::new(),
            utm_medium: String::new(),
            utm_campaign: String::new(),
            utm_content: String::new(),
            utm_term: String::new(),
        };
        if page.path.is_empty() {
            page.path = "/".to_string();
        }

        for (key, value) in url.query_pairs() {
            let target = match key.as_ref() {
                "utm_source" => &mut page.utm_source,
                "utm_medium" => &mut page.utm_medium,
                "utm_campaign" => &mut page.utm_campaign,
                "utm_content" => &mut page.utm_content,
                "utm_term" => &mut page.utm_term,
                _ => continue,
            };
            if target.is_empty() {
                *target = truncate(value.trim(), MAX_UTM_LEN);
            }
        }
        Ok(page)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Host of the referrer, or empty for self-referrals and unparseable referrers.
pub fn referrer_name(referrer: &str, hostname: &str) -> String {
    match Url::parse(referrer) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            let own = hostname.strip_prefix("www.").unwrap_or(hostname);
            if host == own {
                String::new()
            } else {
                host.to_string()
            }
        }
        Err(_) => String::new(),
    }
}

/// Lower-cased two letter code of the first Accept-Language tag.
pub fn language(accept_language: &str) -> String {
    let first = accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .unwrap_or_default()
        .trim();
    let primary = first.split(['-', '_']).next().unwrap_or_default();
    if primary.len() == 2 && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        primary.to_ascii_lowercase()
    } else {
        String::new()
    }
}

/// Screen class for a screen width; empty when the width is unknown.
pub fn screen_class(width: u16) -> &'static str {
    match width {
        0 => "",
        w if w >= 2560 => "XXL",
        w if w >= 1920 => "XL",
        w if w >= 1280 => "L",
        w if w >= 1024 => "M",
        w if w >= 768 => "S",
        _ => "XS",
    }
}

/// All per-visit attributes of a hit.
pub fn attributes(
    hit: &HitRequest,
    page: &Page,
    user_agent: &ParsedUserAgent,
    location: Option<Location>,
) -> VisitAttributes {
    let location = location.unwrap_or_default();
    VisitAttributes {
        language: language(&hit.accept_language),
        country_code: location.country_code.to_lowercase(),
        city: location.city,
        referrer: hit.referrer.clone(),
        referrer_name: referrer_name(&hit.referrer, &page.hostname),
        referrer_icon: String::new(),
        os: user_agent.os.clone(),
        os_version: user_agent.os_version.clone(),
        browser: user_agent.browser.clone(),
        browser_version: user_agent.browser_version.clone(),
        desktop: user_agent.desktop,
        mobile: user_agent.mobile,
        screen_width: hit.screen_width,
        screen_height: hit.screen_height,
        screen_class: screen_class(hit.screen_width).to_string(),
        utm_source: page.utm_source.clone(),
        utm_medium: page.utm_medium.clone(),
        utm_campaign: page.utm_campaign.clone(),
        utm_content: page.utm_content.clone(),
        utm_term: page.utm_term.clone(),
    }
}
