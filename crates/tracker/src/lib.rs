//! Hit ingestion and session stitching.
//!
//! A [`Tracker`] fingerprints each hit, continues or starts the visitor's
//! session in a sharded in-memory cache and writes page view, collapsing
//! session, event and user agent rows through batched, bounded channels.

pub mod batch;
pub mod bot;
pub mod cache;
pub mod config;
pub mod request;
pub mod tracker;
pub mod ua;

pub use batch::ErrorHandler;
pub use cache::SessionCache;
pub use config::{TrackerConfig, TrackerSettings};
pub use tracker::{Tracker, TrackerOptions};
pub use ua::{GeoLookup, Location, NoGeoLookup, ParsedUserAgent, UserAgentParser, WootheeParser};
