//! Nectar Runtime - orchestration layer for the Nectar bot framework.
//!
//! This crate provides:
//! - Layered configuration (`nectar.toml`, `NECTAR_*` environment variables)
//! - Logging setup from configuration
//! - [`NectarRuntime`], which connects the Bot API transport, the update
//!   source, the queue and the dispatcher
//!
//! ```ignore
//! use nectar_core::prelude::*;
//! use nectar_runtime::NectarRuntime;
//!
//! async fn echo(ctx: Context, msg: Message) -> ApiResult<()> {
//!     if let Some(text) = msg.text {
//!         ctx.reply(text).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NectarRuntime::builder().build()?;
//!     runtime.router().on_message(echo);
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, NectarConfig, UpdateMode};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{NectarRuntime, RuntimeBuilder, wait_for_shutdown};

// Re-export tracing for use by applications
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for applications.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
