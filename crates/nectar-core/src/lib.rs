//! # Nectar Core
//!
//! The update-ingestion and dispatch engine of the Nectar bot framework.
//!
//! ## Building Blocks
//!
//! - **Data model**: [`Update`] with exactly one [`UpdateKind`], plus the
//!   payload records handlers receive ([`Message`], [`CallbackQuery`], ...).
//! - **Bot handle**: [`Bot`] calls the remote API through an
//!   [`ApiTransport`]; it also implements [`UpdateFetcher`] for the poller.
//! - **Handlers**: async functions `(Context, Payload) -> R`, registered on a
//!   [`Router`] with optional [`Filter`]s.
//! - **Queue**: [`UpdateQueue`] buffers updates between ingestion and
//!   dispatch, with duplicate detection and an [`OverflowPolicy`].
//! - **Dispatcher**: [`Dispatcher`] runs a pool of workers draining the
//!   queue.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌────────────┐     ┌──────────┐
//! │ Poller or    │────▶│ UpdateQueue │────▶│ Dispatcher │────▶│ Handler  │
//! │ webhook      │     │             │     │ (N workers)│────▶│ Handler  │
//! └──────────────┘     └─────────────┘     └────────────┘     └──────────┘
//!                                                                  │
//!                                                    Context ─▶ Bot ─▶ ApiTransport
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use nectar_core::prelude::*;
//!
//! async fn start(ctx: Context, _msg: Message) -> ApiResult<()> {
//!     ctx.reply("Welcome!").await?;
//!     Ok(())
//! }
//!
//! let router = Router::new();
//! router.on_message(start).filter(filters::command(["start"]));
//!
//! let queue = UpdateQueue::unbounded();
//! let dispatcher = Dispatcher::start(router, bot, queue.clone(), DispatcherConfig::default());
//! ```

pub mod backoff;
pub mod bot;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler;
pub mod queue;
pub mod requests;
pub mod router;
pub mod types;

#[cfg(test)]
mod test_support;

pub use backoff::{Backoff, RetryConfig};
pub use bot::{ApiRequest, ApiTransport, Bot, InputFile, UpdateFetcher};
pub use context::Context;
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig, dispatch};
pub use error::{
    ApiError, ApiResult, BoxError, HandlerError, QueueClosed, TransportError, TransportResult,
};
pub use filter::{Filter, filters};
pub use handler::{
    BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerRecord, IntoOutcome, Propagation,
    into_handler,
};
pub use queue::{OverflowPolicy, PushOutcome, QueueConfig, UpdateQueue};
pub use requests::{
    AnswerCallbackQuery, ChatId, CopyMessage, EditMessageText, EditedMessage, ForwardMessage,
    GetUpdates, MessageId, SendMessage, SetWebhook, WebhookInfo,
};
pub use router::{HandlerBuilder, Router};
pub use types::{
    CallbackQuery, Chat, ChatJoinRequest, ChatMemberUpdated, ChatType, ChosenInlineResult, File,
    FromUpdate, InlineQuery, MediaKind, Message, Poll, PollAnswer, PollOption, PreCheckoutQuery,
    ShippingQuery, Update, UpdateKind, UpdateType, User,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::filter::{Filter, filters};
    pub use super::handler::Propagation;
    pub use super::requests::*;
    pub use super::types::*;
    pub use super::{
        ApiError, ApiResult, Bot, Context, Dispatcher, DispatcherConfig, Router, UpdateQueue,
    };
}
