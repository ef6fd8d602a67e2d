//! Runtime error types.

use nectar_core::{ApiError, TransportError};
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while starting or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A startup API call (`getMe`, `setWebhook`, `deleteWebhook`) failed,
    /// or polling stopped on a fatal error.
    #[error("Bot API error: {0}")]
    Api(#[from] ApiError),

    /// Building the HTTP client or binding the webhook listener failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reading the webhook certificate failed.
    #[error("Failed to read certificate: {0}")]
    Certificate(#[source] std::io::Error),

    /// `run` was called while the runtime was already running.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
