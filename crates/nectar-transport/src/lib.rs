//! # Nectar Transport
//!
//! Network side of the Nectar bot framework: the outbound Bot API transport
//! and the two update sources.
//!
//! ## Features
//!
//! - `http-client`: reqwest-based [`ApiTransport`](nectar_core::ApiTransport)
//! - `http-server`: axum webhook listener
//! - `full`: both
//!
//! Rate limiting and long polling are always available; they only depend on
//! the seams defined in `nectar-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌─────────────────────────┐
//! │ RateLimitedTransport     │        │ LongPoller / Webhook    │
//! │   └─ HttpTransport       │        │   └─ UpdateQueue        │
//! ├──────────────────────────┤        ├─────────────────────────┤
//! │ nectar-core: ApiTransport│        │ nectar-core: queue      │
//! └──────────────────────────┘        └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nectar_core::{Bot, UpdateQueue};
//! use nectar_transport::{HttpTransport, HttpTransportConfig, LongPoller, PollingConfig};
//! use nectar_transport::{RateLimitedTransport, RateLimiter};
//!
//! let http = HttpTransport::new(HttpTransportConfig {
//!     token: Some(token),
//!     ..Default::default()
//! })?;
//! let bot = Bot::new(RateLimitedTransport::new(http, Arc::new(RateLimiter::default())));
//!
//! let queue = UpdateQueue::unbounded();
//! let mut poller = LongPoller::new(bot.clone(), queue.clone(), PollingConfig::default());
//! poller.run(cancel).await?;
//! ```

#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

pub mod polling;
pub mod ratelimit;

pub use polling::{BatchReport, LongPoller, PollingConfig};
pub use ratelimit::{RateLimitConfig, RateLimitPermit, RateLimitedTransport, RateLimiter};

#[cfg(feature = "http-client")]
pub use http::{DEFAULT_API_URL, HttpTransport, HttpTransportConfig};

#[cfg(feature = "http-server")]
pub use http::{WebhookConfig, WebhookHandle, WebhookServer};
