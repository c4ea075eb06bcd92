//! Shared harness for the pirsch integration tests.

pub mod mocks;
pub mod setup;
