//! Handler system.
//!
//! A handler is any async function taking a [`Context`] and a typed payload:
//!
//! ```rust,ignore
//! async fn greet(ctx: Context, msg: Message) -> ApiResult<()> {
//!     ctx.reply(format!("Hello, {}!", msg.from.map(|u| u.first_name).unwrap_or_default()))
//!         .await?;
//!     Ok(())
//! }
//!
//! async fn log_everything(_ctx: Context, update: Update) {
//!     tracing::info!(update_id = update.update_id, "seen");
//! }
//! ```
//!
//! The payload type implements [`FromUpdate`]; the return type implements
//! [`IntoOutcome`]. Handlers are type-erased into [`BoxedHandler`]s and stored
//! in immutable [`HandlerRecord`]s.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;
use crate::filter::Filter;
use crate::types::{FromUpdate, Update, UpdateType};

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Outcomes
// ============================================================================

/// Whether later handlers for the same update should still run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    #[default]
    Continue,
    /// Skip every matched handler that has not started yet.
    Stop,
}

/// Conversion of a handler's return value into its dispatch outcome.
pub trait IntoOutcome: Send {
    fn into_outcome(self) -> Result<Propagation, BoxError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Propagation, BoxError> {
        Ok(Propagation::Continue)
    }
}

impl IntoOutcome for Propagation {
    fn into_outcome(self) -> Result<Propagation, BoxError> {
        Ok(self)
    }
}

impl<E> IntoOutcome for Result<(), E>
where
    E: Into<BoxError> + Send,
{
    fn into_outcome(self) -> Result<Propagation, BoxError> {
        self.map(|()| Propagation::Continue).map_err(Into::into)
    }
}

impl<E> IntoOutcome for Result<Propagation, E>
where
    E: Into<BoxError> + Send,
{
    fn into_outcome(self) -> Result<Propagation, BoxError> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// An async callback over a typed payload `P`.
///
/// Implemented for every `async fn(Context, P) -> R` (and equivalent closures)
/// where `P: FromUpdate` and `R: IntoOutcome`.
pub trait Handler<P>: Clone + Send + Sync + 'static {
    fn call(self, ctx: Context, payload: P) -> BoxFuture<'static, Result<Propagation, BoxError>>;
}

impl<F, Fut, P, R> Handler<P> for F
where
    F: FnOnce(Context, P) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    P: FromUpdate,
    R: IntoOutcome,
{
    fn call(self, ctx: Context, payload: P) -> BoxFuture<'static, Result<Propagation, BoxError>> {
        Box::pin(async move { (self)(ctx, payload).await.into_outcome() })
    }
}

// ============================================================================
// Type Erasure
// ============================================================================

/// Type-erased handler trait for dynamic dispatch.
pub trait ErasedHandler: Send + Sync {
    /// Returns `true` if the handler's payload can be extracted from `update`.
    fn accepts(&self, update: &Update) -> bool;

    /// Starts the handler, or returns `None` if the payload is missing.
    fn call(
        &self,
        ctx: Context,
        update: &Update,
    ) -> Option<BoxFuture<'static, Result<Propagation, BoxError>>>;
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

struct HandlerFn<F, P> {
    f: F,
    _marker: PhantomData<fn() -> P>,
}

impl<F, P> ErasedHandler for HandlerFn<F, P>
where
    F: Handler<P>,
    P: FromUpdate,
{
    fn accepts(&self, update: &Update) -> bool {
        P::from_update(update).is_some()
    }

    fn call(
        &self,
        ctx: Context,
        update: &Update,
    ) -> Option<BoxFuture<'static, Result<Propagation, BoxError>>> {
        let payload = P::from_update(update)?;
        Some(self.f.clone().call(ctx, payload))
    }
}

/// Convert a handler function into a boxed handler.
pub fn into_handler<F, P>(f: F) -> BoxedHandler
where
    F: Handler<P>,
    P: FromUpdate,
{
    Arc::new(HandlerFn {
        f,
        _marker: PhantomData,
    })
}

// ============================================================================
// Handler Records
// ============================================================================

/// An immutable registration: name, target kind, optional filter, callback.
#[derive(Clone)]
pub struct HandlerRecord {
    name: Arc<str>,
    target: Option<UpdateType>,
    filter: Option<Filter>,
    handler: BoxedHandler,
}

impl HandlerRecord {
    /// `target: None` matches every update kind.
    pub fn new(
        name: impl Into<Arc<str>>,
        target: Option<UpdateType>,
        filter: Option<Filter>,
        handler: BoxedHandler,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            filter,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<UpdateType> {
        self.target
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Kind equal (or any), payload extractable, and filter true.
    pub fn matches(&self, update: &Update) -> bool {
        self.target.is_none_or(|t| t == update.update_type())
            && self.handler.accepts(update)
            && self.filter.as_ref().is_none_or(|f| f.matches(update))
    }
}

impl std::fmt::Debug for HandlerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRecord")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bot;
    use crate::test_support::RecordingTransport;
    use crate::types::{CallbackQuery, Message};
    use serde_json::json;

    async fn plain(_ctx: Context, _msg: Message) {}

    async fn stopping(_ctx: Context, _msg: Message) -> Propagation {
        Propagation::Stop
    }

    async fn failing(_ctx: Context, _msg: Message) -> Result<(), std::io::Error> {
        Err(std::io::Error::other("boom"))
    }

    fn message_update() -> Update {
        Update::from_value(json!({ "update_id": 1, "message": { "text": "hi" } })).unwrap()
    }

    fn ctx(update: &Update) -> Context {
        Context::new(Bot::new(RecordingTransport::new()), Arc::new(update.clone()))
    }

    #[tokio::test]
    async fn test_outcomes_from_return_types() {
        let update = message_update();

        let out = into_handler(plain).call(ctx(&update), &update).unwrap().await;
        assert_eq!(out.unwrap(), Propagation::Continue);

        let out = into_handler(stopping).call(ctx(&update), &update).unwrap().await;
        assert_eq!(out.unwrap(), Propagation::Stop);

        let out = into_handler(failing).call(ctx(&update), &update).unwrap().await;
        assert_eq!(out.unwrap_err().to_string(), "boom");
    }

    #[test]
    fn test_record_requires_extractable_payload() {
        let update = message_update();
        let for_queries = HandlerRecord::new(
            "queries",
            None,
            None,
            into_handler(|_ctx: Context, _q: CallbackQuery| async {}),
        );
        assert!(!for_queries.matches(&update));

        let any_message = HandlerRecord::new("messages", None, None, into_handler(plain));
        assert!(any_message.matches(&update));

        let filtered = HandlerRecord::new(
            "filtered",
            Some(UpdateType::Message),
            Some(Filter::none()),
            into_handler(plain),
        );
        assert!(!filtered.matches(&update));
    }
}
