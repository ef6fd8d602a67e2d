//! Unified error types for the Nectar core.
//!
//! Transport and API errors are shared by every layer; queue and handler
//! errors belong to the dispatch engine.

use std::time::Duration;

use thiserror::Error;

/// A boxed error as returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be sent or the connection broke mid-flight.
    #[error("request to {url} failed: {reason}")]
    RequestFailed {
        /// The URL (with the token redacted).
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The server answered a plain HTTP request with a non-success status.
    #[error("{url} answered HTTP {status}")]
    UnexpectedStatus {
        /// The URL (with the token redacted).
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Failed to bind a listener.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed {
        /// The address that could not be bound.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport was shut down.
    #[error("transport is closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for remote API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No bot token was configured before the first call.
    #[error("bot token is not set")]
    MissingToken,

    /// The call never produced a well-formed response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The call timed out.
    #[error("API call timed out")]
    Timeout,

    /// The remote API answered with `ok: false`.
    #[error("API error ({code}): {description}")]
    Api {
        /// The `error_code` field.
        code: i64,
        /// The `description` field.
        description: String,
        /// Seconds to wait before repeating the request, when flood-limited.
        retry_after: Option<u64>,
    },

    /// Failed to serialize parameters or deserialize the result.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The response body was not a valid API envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call could not be built from the given arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Returns `true` for errors worth retrying after a delay.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(TransportError::Closed) => false,
            Self::Transport(_) | Self::Timeout | Self::InvalidResponse(_) => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::MissingToken | Self::Serialization(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Returns `true` if retrying can never succeed without reconfiguration.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MissingToken => true,
            Self::Api { code, .. } => *code == 401 || *code == 404,
            _ => false,
        }
    }

    /// The flood-control hint, if the server supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Returned when pushing onto a queue that has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("update queue is closed")]
pub struct QueueClosed;

/// A failure raised by an application handler.
#[derive(Debug, Error)]
#[error("handler '{handler}' failed: {source}")]
pub struct HandlerError {
    /// The name of the failing handler.
    pub handler: String,
    /// The underlying error.
    #[source]
    pub source: BoxError,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let io = ApiError::Transport(TransportError::Io("reset".into()));
        assert!(io.is_transient());
        assert!(!io.is_fatal());

        let flood = ApiError::Api {
            code: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(3),
        };
        assert!(flood.is_transient());
        assert_eq!(flood.retry_after(), Some(Duration::from_secs(3)));

        let bad_request = ApiError::Api {
            code: 400,
            description: "Bad Request: chat not found".into(),
            retry_after: None,
        };
        assert!(!bad_request.is_transient());
        assert!(!bad_request.is_fatal());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        assert!(ApiError::MissingToken.is_fatal());
        assert!(!ApiError::MissingToken.is_transient());
        let unauthorized = ApiError::Api {
            code: 401,
            description: "Unauthorized".into(),
            retry_after: None,
        };
        assert!(unauthorized.is_fatal());
    }
}
