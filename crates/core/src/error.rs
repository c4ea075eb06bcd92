//! Unified error types for pirsch.
//!
//! Every error maps onto one stable [`ErrorKind`] with a stable code:
//! - CONFIG_001: invalid filter or tracker configuration
//! - VALID_001: invalid hit or event input
//! - STORE_001: transient storage failure (network, timeout)
//! - STORE_002: fatal storage failure (schema, constraint, decoding)
//! - TRACK_001: batch channel full beyond the enqueue deadline
//! - TRACK_002: operation on a stopped tracker

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Validation,
    StorageTransient,
    StorageFatal,
    Overloaded,
    Stopped,
    Internal,
}

impl ErrorKind {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG_001",
            Self::Validation => "VALID_001",
            Self::StorageTransient => "STORE_001",
            Self::StorageFatal => "STORE_002",
            Self::Overloaded => "TRACK_001",
            Self::Stopped => "TRACK_002",
            Self::Internal => "INTERNAL_001",
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTransient | Self::Overloaded)
    }
}

/// Unified error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[{}] {message}", ErrorKind::Config.code())]
    Config { message: String },

    #[error("[{}] {message}", ErrorKind::Validation.code())]
    Validation { message: String },

    /// Storage error. `retryable` separates network/timeout failures
    /// from schema or constraint failures.
    #[error("[{}] {message}", if *retryable { ErrorKind::StorageTransient.code() } else { ErrorKind::StorageFatal.code() })]
    Storage { message: String, retryable: bool },

    #[error("[{}] {channel} channel full after {waited_ms}ms", ErrorKind::Overloaded.code())]
    Overloaded { channel: &'static str, waited_ms: u64 },

    #[error("[{}] tracker is stopped", ErrorKind::Stopped.code())]
    Stopped,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transient (retryable) storage error.
    pub fn storage_transient(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a fatal storage error.
    pub fn storage_fatal(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn overloaded(channel: &'static str, waited_ms: u64) -> Self {
        Self::Overloaded { channel, waited_ms }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Storage { retryable: true, .. } => ErrorKind::StorageTransient,
            Self::Storage { retryable: false, .. } => ErrorKind::StorageFatal,
            Self::Overloaded { .. } => ErrorKind::Overloaded,
            Self::Stopped => ErrorKind::Stopped,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the stable error code.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Prefix the message with a single line of context, keeping the kind.
    pub fn context(self, ctx: &str) -> Self {
        match self {
            Self::Config { message } => Self::Config {
                message: format!("{}: {}", ctx, message),
            },
            Self::Validation { message } => Self::Validation {
                message: format!("{}: {}", ctx, message),
            },
            Self::Storage { message, retryable } => Self::Storage {
                message: format!("{}: {}", ctx, message),
                retryable,
            },
            Self::Internal(message) => Self::Internal(format!("{}: {}", ctx, message)),
            other => other,
        }
    }
}
