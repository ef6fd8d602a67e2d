//! # Nectar
//!
//! A framework for Telegram-style bots: it receives updates by long polling
//! or webhook, queues them, and fans each one out concurrently to the
//! handlers whose update kind and filters match.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌────────────┐     ┌────────────────────┐
//! │ LongPoller / │────▶│ UpdateQueue │────▶│ Dispatcher │────▶│ handler(ctx, msg)  │──▶ Bot
//! │ Webhook      │     │             │     │ N workers  │────▶│ handler(ctx, query)│──▶ Bot
//! └──────────────┘     └─────────────┘     └────────────┘     └────────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, wires the pieces, handles shutdown
//! - **Router**: registration-ordered handlers with [`Filter`](prelude::Filter)s
//! - **Bot**: typed Bot API calls behind a global rate limiter
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nectar::prelude::*;
//!
//! async fn start(ctx: Context, _msg: Message) -> ApiResult<()> {
//!     ctx.reply("Hello!").await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NectarRuntime::builder().build()?;
//!     runtime.router().on_message(start).filter(filters::command(["start"]));
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use nectar_core as core;
pub use nectar_runtime as runtime;
pub use nectar_transport as transport;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use nectar_runtime::{NectarConfig, NectarRuntime, RuntimeError, UpdateMode};

    // Handlers, filters and payloads
    pub use nectar_core::prelude::*;
    pub use nectar_core::{FromUpdate, HandlerError, UpdateFetcher};

    // Logging
    pub use nectar_runtime::prelude::*;
}
