//! HTTP transports.
//!
//! The client talks to the remote Bot API; the server receives webhook
//! pushes.

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::{DEFAULT_API_URL, HttpTransport, HttpTransportConfig};

#[cfg(feature = "http-server")]
mod server;
#[cfg(feature = "http-server")]
pub use server::{SECRET_TOKEN_HEADER, WebhookConfig, WebhookHandle, WebhookServer};
