//! The per-update [`Context`] passed to handlers.
//!
//! All handlers matched for one update share the same propagation flag: a
//! clone of the context is handed to each, so a stop raised by one is seen by
//! every handler that has not started yet.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bot::Bot;
use crate::error::{ApiError, ApiResult};
use crate::requests::SendMessage;
use crate::types::{Message, Update};

/// The context object passed to handlers during update processing.
///
/// Dereferences to [`Bot`], so remote methods can be called directly:
///
/// ```rust,ignore
/// async fn start(ctx: Context, msg: Message) -> ApiResult<()> {
///     ctx.send_message(&SendMessage::new(msg.chat.id, "Hello!")).await?;
///     ctx.stop_propagation();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Context {
    bot: Bot,
    update: Arc<Update>,
    stopped: Arc<AtomicBool>,
}

impl Context {
    pub fn new(bot: Bot, update: Arc<Update>) -> Self {
        Self {
            bot,
            update,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// The update being processed.
    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn update_id(&self) -> i64 {
        self.update.update_id
    }

    /// Skips every matched handler for this update that has not started yet.
    pub fn stop_propagation(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns `true` until some handler stops propagation.
    pub fn is_propagating(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Sends `text` to the chat of the current update, as a reply to its
    /// message when there is one.
    pub async fn reply(&self, text: impl Into<String>) -> ApiResult<Message> {
        let chat = self.update.chat().ok_or_else(|| {
            ApiError::InvalidRequest(format!(
                "update {} has no chat to reply to",
                self.update.update_id
            ))
        })?;
        let mut params = SendMessage::new(chat.id, text);
        if let Some(msg) = self.update.message().filter(|m| m.message_id != 0) {
            params = params.reply_to(msg.message_id);
        }
        self.bot.send_message(&params).await
    }
}

impl Deref for Context {
    type Target = Bot;

    fn deref(&self) -> &Self::Target {
        &self.bot
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("update_id", &self.update.update_id)
            .field("kind", &self.update.update_type())
            .field("is_propagating", &self.is_propagating())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use serde_json::json;

    fn message_update() -> Arc<Update> {
        Arc::new(
            Update::from_value(json!({
                "update_id": 1,
                "message": { "message_id": 5, "chat": { "id": 99, "type": "private" }, "text": "hi" }
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_stop_is_shared_between_clones() {
        let ctx = Context::new(Bot::new(RecordingTransport::new()), message_update());
        let sibling = ctx.clone();
        assert!(sibling.is_propagating());
        ctx.stop_propagation();
        assert!(!sibling.is_propagating());
    }

    #[tokio::test]
    async fn test_reply_targets_update_chat() {
        let transport = RecordingTransport::new();
        transport.respond("sendMessage", json!({ "message_id": 6 }));
        let ctx = Context::new(Bot::new(transport.clone()), message_update());

        ctx.reply("pong").await.unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.params.get("chat_id"), Some(&json!(99)));
        assert_eq!(request.params.get("reply_to_message_id"), Some(&json!(5)));
        assert_eq!(request.params.get("text"), Some(&json!("pong")));
    }
}
