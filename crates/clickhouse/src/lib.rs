//! ClickHouse storage for pirsch.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod insert;
pub mod query;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use store::ClickHouseStore;
