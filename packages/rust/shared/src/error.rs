//! Error types for Sieve.
//!
//! Library crates use [`SieveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Sieve operations.
#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a feed or a page.
    #[error("network error: {0}")]
    Network(String),

    /// Feed, HTML or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Inference service error. `transient` failures may succeed on retry.
    #[error("inference error: {message}")]
    Inference { message: String, transient: bool },

    /// A content plugin failed on an item.
    #[error("plugin {name} failed: {message}")]
    Plugin { name: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SieveError>;

impl SieveError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// An inference failure worth retrying (rate limited, server error, timeout).
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Inference {
            message: msg.into(),
            transient: true,
        }
    }

    /// An inference failure that will not go away on retry.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Inference {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a plugin error for the named plugin.
    pub fn plugin(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Plugin {
            name: name.into(),
            message: msg.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Inference {
                transient: true,
                ..
            }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
