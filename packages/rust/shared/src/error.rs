//! Error types for pixivbot.
//!
//! Library crates use [`PixivBotError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pixivbot operations.
#[derive(Debug, thiserror::Error)]
pub enum PixivBotError {
    /// Non-success HTTP status from the search endpoint.
    #[error("upstream request to {endpoint} failed with HTTP {status}: {detail}")]
    UpstreamRequest {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// The search endpoint answered, but with no usable items.
    #[error("search returned no results (strategy: {strategy})")]
    EmptyResult { strategy: String },

    /// Restricted content was encountered without an explicit override.
    #[error("{}", policy_message(.id))]
    ContentPolicyViolation { id: Option<String> },

    /// The artwork detail endpoint failed or reported an error body.
    #[error("failed to fetch artwork {id}: {reason}")]
    DetailFetch { id: String, reason: String },

    /// Every search strategy was tried without producing a result.
    #[error("all {attempts} search strategies failed, last error: {last_error}")]
    AllStrategiesExhausted { attempts: usize, last_error: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level network error (connect, timeout, proxy).
    #[error("network error: {0}")]
    Network(String),

    /// Malformed response payload.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Image download failed after retries or produced an incomplete file.
    #[error("download error: {0}")]
    Download(String),

    /// Image decoding or re-encoding error.
    #[error("image error: {0}")]
    Image(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PixivBotError>;

impl PixivBotError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn policy_message(id: &Option<String>) -> String {
    match id {
        Some(id) => format!("restricted content skipped (artwork {id})"),
        None => "every result was restricted content".to_string(),
    }
}
