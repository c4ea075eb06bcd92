//! Size limits for tracked requests and query filters.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so string limits are duplicated in [`crate::hit`]. Keep both in sync when
//! modifying.

// === Hit Field Limits (chars) ===

/// User agent string max length.
/// Browser UAs: 100-300 typical, 500+ with extensions.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// IP address max length (IPv6 = 45 chars).
pub const MAX_IP_LEN: usize = 45;

/// Request URL max length.
pub const MAX_URL_LEN: usize = 2048;

/// Stored path max length.
pub const MAX_PATH_LEN: usize = 2000;

/// Page title max length.
pub const MAX_TITLE_LEN: usize = 500;

/// Referrer URL max length.
/// Matches HTTP Referer header limit.
pub const MAX_REFERRER_LEN: usize = 2048;

/// Raw Accept-Language header max length.
pub const MAX_ACCEPT_LANGUAGE_LEN: usize = 256;

/// UTM parameter max length.
pub const MAX_UTM_LEN: usize = 200;

// === Event Limits ===

/// Event name max length.
pub const MAX_EVENT_NAME_LEN: usize = 200;

/// Maximum number of meta entries attached to one event.
pub const MAX_EVENT_META_ENTRIES: usize = 64;

/// Maximum length of a single meta key or value.
pub const MAX_EVENT_META_LEN: usize = 512;

// === Screen Bounds ===

/// Largest accepted screen dimension in pixels.
pub const MAX_SCREEN_DIMENSION: u16 = 16_384;

// === Filter Limits ===

/// Maximum number of values in a single multi-valued filter option.
pub const MAX_FILTER_VALUES: usize = 256;
