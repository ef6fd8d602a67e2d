//! The handler registry.
//!
//! [`Router`] keeps handler records in registration order. Storage is
//! copy-on-write: each registration swaps in a new `Arc<Vec<_>>`, and the
//! dispatcher takes a [`snapshot`](Router::snapshot) per update, so handlers
//! added during live dispatch only see later updates.
//!
//! # Example
//!
//! ```rust,ignore
//! let router = Router::new();
//!
//! router.on_message(start).filter(filters::command(["start"])).name("start");
//! router.on_callback_query(vote).filter(filters::callback_data("vote"));
//! router.on_update(audit);
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::filter::Filter;
use crate::handler::{BoxedHandler, Handler, HandlerRecord, into_handler};
use crate::types::{
    CallbackQuery, ChatJoinRequest, ChatMemberUpdated, ChosenInlineResult, FromUpdate,
    InlineQuery, Message, Poll, PollAnswer, PreCheckoutQuery, ShippingQuery, Update, UpdateType,
};

/// Registration-ordered handler registry. Clones share the same registry.
#[derive(Clone, Default)]
pub struct Router {
    records: Arc<RwLock<Arc<Vec<HandlerRecord>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished record.
    pub fn add(&self, record: HandlerRecord) {
        debug!(handler = record.name(), target = ?record.target(), "Registering handler");
        let mut records = self.records.write();
        let mut next = Vec::with_capacity(records.len() + 1);
        next.extend(records.iter().cloned());
        next.push(record);
        *records = Arc::new(next);
    }

    /// The records registered so far, in registration order.
    pub fn snapshot(&self) -> Arc<Vec<HandlerRecord>> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Registers `handler` for `target` (`None` = every kind).
    ///
    /// The record is added when the returned builder is dropped, so a filter
    /// and a name can be chained onto the call.
    pub fn register<F, P>(&self, target: Option<UpdateType>, handler: F) -> HandlerBuilder<'_>
    where
        F: Handler<P>,
        P: FromUpdate,
    {
        HandlerBuilder {
            router: self,
            name: std::any::type_name::<F>().to_string(),
            target,
            filter: None,
            handler: Some(into_handler(handler)),
        }
    }

    /// Every update kind; the payload is the whole [`Update`].
    pub fn on_update<F>(&self, handler: F) -> HandlerBuilder<'_>
    where
        F: Handler<Update>,
    {
        self.register(None, handler)
    }
}

macro_rules! typed_shortcuts {
    ($($(#[$doc:meta])* $fn_name:ident => $kind:ident($payload:ty);)*) => {
        impl Router {
            $(
                $(#[$doc])*
                pub fn $fn_name<F>(&self, handler: F) -> HandlerBuilder<'_>
                where
                    F: Handler<$payload>,
                {
                    self.register(Some(UpdateType::$kind), handler)
                }
            )*
        }
    };
}

typed_shortcuts! {
    /// New incoming messages.
    on_message => Message(Message);
    on_edited_message => EditedMessage(Message);
    on_channel_post => ChannelPost(Message);
    on_edited_channel_post => EditedChannelPost(Message);
    on_inline_query => InlineQuery(InlineQuery);
    on_chosen_inline_result => ChosenInlineResult(ChosenInlineResult);
    on_callback_query => CallbackQuery(CallbackQuery);
    on_shipping_query => ShippingQuery(ShippingQuery);
    on_pre_checkout_query => PreCheckoutQuery(PreCheckoutQuery);
    on_poll => Poll(Poll);
    on_poll_answer => PollAnswer(PollAnswer);
    /// Changes to the bot's own membership in a chat.
    on_my_chat_member => MyChatMember(ChatMemberUpdated);
    on_chat_member => ChatMember(ChatMemberUpdated);
    on_chat_join_request => ChatJoinRequest(ChatJoinRequest);
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("handlers", &self.len())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Attaches a filter and a name to a registration. Commits on drop.
pub struct HandlerBuilder<'a> {
    router: &'a Router,
    name: String,
    target: Option<UpdateType>,
    filter: Option<Filter>,
    handler: Option<BoxedHandler>,
}

impl HandlerBuilder<'_> {
    /// Sets the filter; calling it again ANDs the filters together.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & filter,
            None => filter,
        });
        self
    }

    /// Names the handler in logs. Defaults to the handler's type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Drop for HandlerBuilder<'_> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            let name = std::mem::take(&mut self.name);
            self.router.add(HandlerRecord::new(
                name,
                self.target,
                self.filter.take(),
                handler,
            ));
        }
    }
}
