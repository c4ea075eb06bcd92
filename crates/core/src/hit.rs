//! Tracked requests and their validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::limits::{MAX_EVENT_META_ENTRIES, MAX_EVENT_META_LEN, MAX_SCREEN_DIMENSION};

/// A page hit as handed over by the tracking handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct HitRequest {
    pub client_id: u64,
    /// Raw client IP, used for the fingerprint only.
    #[validate(length(min = 1, max = 45))]
    pub ip: String,
    #[validate(length(max = 512))]
    pub user_agent: String,
    /// Full page URL. Path, hostname and UTM parameters are read from it.
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub title: String,
    #[validate(length(max = 2048))]
    #[serde(default)]
    pub referrer: String,
    /// Raw Accept-Language header.
    #[validate(length(max = 256))]
    #[serde(default)]
    pub accept_language: String,
    #[serde(default)]
    pub screen_width: u16,
    #[serde(default)]
    pub screen_height: u16,
}

/// A custom event attached to a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct EventRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(custom(function = "validate_meta"))]
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub duration_seconds: u32,
}

fn validate_meta(meta: &BTreeMap<String, String>) -> std::result::Result<(), ValidationError> {
    if meta.len() > MAX_EVENT_META_ENTRIES {
        let mut err = ValidationError::new("too_many_meta_entries");
        err.message = Some(format!("at most {} meta entries", MAX_EVENT_META_ENTRIES).into());
        return Err(err);
    }
    if meta
        .iter()
        .any(|(k, v)| k.is_empty() || k.len() > MAX_EVENT_META_LEN || v.len() > MAX_EVENT_META_LEN)
    {
        let mut err = ValidationError::new("invalid_meta_entry");
        err.message = Some(format!("meta keys must be 1..={} chars", MAX_EVENT_META_LEN).into());
        return Err(err);
    }
    Ok(())
}

/// Validates a page hit.
pub fn validate_hit(hit: &HitRequest) -> Result<()> {
    hit.validate()
        .map_err(|e| Error::validation(format!("{}", e)))?;

    if hit.screen_width > MAX_SCREEN_DIMENSION || hit.screen_height > MAX_SCREEN_DIMENSION {
        return Err(Error::validation(format!(
            "screen dimensions cannot exceed {}px",
            MAX_SCREEN_DIMENSION
        )));
    }

    url::Url::parse(&hit.url).map_err(|e| Error::validation(format!("url: {}", e)))?;
    Ok(())
}

/// Validates an event together with the hit it belongs to.
pub fn validate_event(event: &EventRequest, hit: &HitRequest) -> Result<()> {
    event
        .validate()
        .map_err(|e| Error::validation(format!("event: {}", e)))?;
    validate_hit(hit)
}
