//! Error types for the conversation core.

use thiserror::Error;

/// Errors produced by the gateway and surfaced to the conversation store.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport failure (connection refused, reset, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Success status, but no readable body to stream from.
    #[error("response carried no readable body")]
    StreamUnavailable,

    /// Submitted text was empty after trimming.
    #[error("message text is empty")]
    EmptyMessage,

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used for notifications and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    Network,
    StreamUnavailable,
    Validation,
}

impl ChatError {
    /// Map the error onto its coarse kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Status { .. } | Self::Malformed(_) => ErrorKind::Network,
            Self::StreamUnavailable => ErrorKind::StreamUnavailable,
            Self::EmptyMessage | Self::Config(_) => ErrorKind::Validation,
        }
    }

    /// Whether repeating the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Status { .. } | Self::StreamUnavailable
        )
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
