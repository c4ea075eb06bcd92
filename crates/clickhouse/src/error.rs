//! Mapping of ClickHouse driver errors onto pirsch error kinds.

use std::time::Duration;

use clickhouse::error::Error as ChError;
use pirsch_core::Error;

/// Network failures and timeouts are transient; everything else (schema,
/// type or constraint mismatches, bad responses) is fatal.
pub fn classify(context: &str, err: ChError) -> Error {
    let message = format!("{}: {}", context, err);
    if is_transient(&err) {
        Error::storage_transient(message)
    } else {
        Error::storage_fatal(message)
    }
}

fn is_transient(err: &ChError) -> bool {
    matches!(err, ChError::Network(_) | ChError::TimedOut)
}

/// Error for a call that exceeded the configured timeout.
pub fn timed_out(context: &str, timeout: Duration) -> Error {
    Error::storage_transient(format!(
        "{}: timed out after {}ms",
        context,
        timeout.as_millis()
    ))
}
