//! Aggregate statistics over page views, sessions and events.

pub mod analyzer;
mod pages;

pub use analyzer::Analyzer;
