//! The [`Update`] envelope and its kinds.
//!
//! On the wire an update is an object with an `update_id` and exactly one
//! optional field naming its kind. Here it is a struct holding the id and an
//! [`UpdateKind`] enum, so "exactly one kind" holds by construction.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{
    CallbackQuery, Chat, ChatJoinRequest, ChatMemberUpdated, ChosenInlineResult, InlineQuery,
    Message, Poll, PollAnswer, PreCheckoutQuery, ShippingQuery, User,
};

// ============================================================================
// Update Type Classification
// ============================================================================

/// The fieldless discriminant of an [`UpdateKind`].
///
/// Handlers register against an `UpdateType`; the serialized names match the
/// wire field names, so a list of these can be sent as `allowed_updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Message,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
    InlineQuery,
    ChosenInlineResult,
    CallbackQuery,
    ShippingQuery,
    PreCheckoutQuery,
    Poll,
    PollAnswer,
    MyChatMember,
    ChatMember,
    ChatJoinRequest,
    Unknown,
}

impl UpdateType {
    /// The wire field name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::EditedMessage => "edited_message",
            Self::ChannelPost => "channel_post",
            Self::EditedChannelPost => "edited_channel_post",
            Self::InlineQuery => "inline_query",
            Self::ChosenInlineResult => "chosen_inline_result",
            Self::CallbackQuery => "callback_query",
            Self::ShippingQuery => "shipping_query",
            Self::PreCheckoutQuery => "pre_checkout_query",
            Self::Poll => "poll",
            Self::PollAnswer => "poll_answer",
            Self::MyChatMember => "my_chat_member",
            Self::ChatMember => "chat_member",
            Self::ChatJoinRequest => "chat_join_request",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` for kinds whose payload is a [`Message`].
    pub fn carries_message(self) -> bool {
        matches!(
            self,
            Self::Message | Self::EditedMessage | Self::ChannelPost | Self::EditedChannelPost
        )
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognised update type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown update type '{0}'")]
pub struct ParseUpdateTypeError(pub String);

impl FromStr for UpdateType {
    type Err = ParseUpdateTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "message" => Self::Message,
            "edited_message" => Self::EditedMessage,
            "channel_post" => Self::ChannelPost,
            "edited_channel_post" => Self::EditedChannelPost,
            "inline_query" => Self::InlineQuery,
            "chosen_inline_result" => Self::ChosenInlineResult,
            "callback_query" => Self::CallbackQuery,
            "shipping_query" => Self::ShippingQuery,
            "pre_checkout_query" => Self::PreCheckoutQuery,
            "poll" => Self::Poll,
            "poll_answer" => Self::PollAnswer,
            "my_chat_member" => Self::MyChatMember,
            "chat_member" => Self::ChatMember,
            "chat_join_request" => Self::ChatJoinRequest,
            other => return Err(ParseUpdateTypeError(other.to_string())),
        })
    }
}

// ============================================================================
// Update
// ============================================================================

/// The payload of an update. Exactly one kind per update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    CallbackQuery(CallbackQuery),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    Poll(Poll),
    PollAnswer(PollAnswer),
    MyChatMember(ChatMemberUpdated),
    ChatMember(ChatMemberUpdated),
    ChatJoinRequest(ChatJoinRequest),
    /// None of the known kinds was present; the remaining fields are kept.
    Unknown(Value),
}

impl UpdateKind {
    /// The discriminant of this kind.
    pub fn update_type(&self) -> UpdateType {
        match self {
            Self::Message(_) => UpdateType::Message,
            Self::EditedMessage(_) => UpdateType::EditedMessage,
            Self::ChannelPost(_) => UpdateType::ChannelPost,
            Self::EditedChannelPost(_) => UpdateType::EditedChannelPost,
            Self::InlineQuery(_) => UpdateType::InlineQuery,
            Self::ChosenInlineResult(_) => UpdateType::ChosenInlineResult,
            Self::CallbackQuery(_) => UpdateType::CallbackQuery,
            Self::ShippingQuery(_) => UpdateType::ShippingQuery,
            Self::PreCheckoutQuery(_) => UpdateType::PreCheckoutQuery,
            Self::Poll(_) => UpdateType::Poll,
            Self::PollAnswer(_) => UpdateType::PollAnswer,
            Self::MyChatMember(_) => UpdateType::MyChatMember,
            Self::ChatMember(_) => UpdateType::ChatMember,
            Self::ChatJoinRequest(_) => UpdateType::ChatJoinRequest,
            Self::Unknown(_) => UpdateType::Unknown,
        }
    }
}

/// One event delivered by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdate", into = "RawUpdate")]
pub struct Update {
    /// Monotonically increasing identifier, used as the polling cursor.
    pub update_id: i64,
    /// The populated kind.
    pub kind: UpdateKind,
}

impl Update {
    /// Creates an update from its parts.
    pub fn new(update_id: i64, kind: UpdateKind) -> Self {
        Self { update_id, kind }
    }

    /// Parses an update from a JSON value.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// The discriminant of the populated kind.
    pub fn update_type(&self) -> UpdateType {
        self.kind.update_type()
    }

    /// The message carried by a message-bearing kind.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            UpdateKind::CallbackQuery(q) => q.message.as_deref(),
            _ => None,
        }
    }

    /// The user that caused this update, when the kind has one.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => m.from.as_ref(),
            UpdateKind::InlineQuery(q) => Some(&q.from),
            UpdateKind::ChosenInlineResult(r) => Some(&r.from),
            UpdateKind::CallbackQuery(q) => Some(&q.from),
            UpdateKind::ShippingQuery(q) => Some(&q.from),
            UpdateKind::PreCheckoutQuery(q) => Some(&q.from),
            UpdateKind::PollAnswer(a) => a.user.as_ref(),
            UpdateKind::MyChatMember(c) | UpdateKind::ChatMember(c) => Some(&c.from),
            UpdateKind::ChatJoinRequest(r) => Some(&r.from),
            UpdateKind::Poll(_) | UpdateKind::Unknown(_) => None,
        }
    }

    /// The chat this update happened in, when the kind has one.
    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            UpdateKind::MyChatMember(c) | UpdateKind::ChatMember(c) => Some(&c.chat),
            UpdateKind::ChatJoinRequest(r) => Some(&r.chat),
            UpdateKind::PollAnswer(a) => a.voter_chat.as_ref(),
            _ => self.message().map(|m| &m.chat),
        }
    }
}

// ============================================================================
// Wire representation
// ============================================================================

/// The flat wire shape: every kind is an optional sibling field.
#[derive(Default, Serialize, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edited_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_post: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edited_channel_post: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_query: Option<InlineQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chosen_inline_result: Option<ChosenInlineResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_query: Option<CallbackQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shipping_query: Option<ShippingQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_checkout_query: Option<PreCheckoutQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poll: Option<Poll>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poll_answer: Option<PollAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    my_chat_member: Option<ChatMemberUpdated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_member: Option<ChatMemberUpdated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_join_request: Option<ChatJoinRequest>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl TryFrom<RawUpdate> for Update {
    type Error = String;

    fn try_from(raw: RawUpdate) -> Result<Self, Self::Error> {
        let candidates = [
            raw.message.map(UpdateKind::Message),
            raw.edited_message.map(UpdateKind::EditedMessage),
            raw.channel_post.map(UpdateKind::ChannelPost),
            raw.edited_channel_post.map(UpdateKind::EditedChannelPost),
            raw.inline_query.map(UpdateKind::InlineQuery),
            raw.chosen_inline_result.map(UpdateKind::ChosenInlineResult),
            raw.callback_query.map(UpdateKind::CallbackQuery),
            raw.shipping_query.map(UpdateKind::ShippingQuery),
            raw.pre_checkout_query.map(UpdateKind::PreCheckoutQuery),
            raw.poll.map(UpdateKind::Poll),
            raw.poll_answer.map(UpdateKind::PollAnswer),
            raw.my_chat_member.map(UpdateKind::MyChatMember),
            raw.chat_member.map(UpdateKind::ChatMember),
            raw.chat_join_request.map(UpdateKind::ChatJoinRequest),
        ];

        let mut kinds = candidates.into_iter().flatten();
        let kind = kinds
            .next()
            .unwrap_or_else(|| UpdateKind::Unknown(Value::Object(raw.rest)));

        if let Some(extra) = kinds.next() {
            return Err(format!(
                "update {} carries more than one kind ({} and {})",
                raw.update_id,
                kind.update_type(),
                extra.update_type()
            ));
        }

        Ok(Update {
            update_id: raw.update_id,
            kind,
        })
    }
}

impl From<Update> for RawUpdate {
    fn from(update: Update) -> Self {
        let mut raw = RawUpdate {
            update_id: update.update_id,
            ..Default::default()
        };
        match update.kind {
            UpdateKind::Message(m) => raw.message = Some(m),
            UpdateKind::EditedMessage(m) => raw.edited_message = Some(m),
            UpdateKind::ChannelPost(m) => raw.channel_post = Some(m),
            UpdateKind::EditedChannelPost(m) => raw.edited_channel_post = Some(m),
            UpdateKind::InlineQuery(q) => raw.inline_query = Some(q),
            UpdateKind::ChosenInlineResult(r) => raw.chosen_inline_result = Some(r),
            UpdateKind::CallbackQuery(q) => raw.callback_query = Some(q),
            UpdateKind::ShippingQuery(q) => raw.shipping_query = Some(q),
            UpdateKind::PreCheckoutQuery(q) => raw.pre_checkout_query = Some(q),
            UpdateKind::Poll(p) => raw.poll = Some(p),
            UpdateKind::PollAnswer(a) => raw.poll_answer = Some(a),
            UpdateKind::MyChatMember(c) => raw.my_chat_member = Some(c),
            UpdateKind::ChatMember(c) => raw.chat_member = Some(c),
            UpdateKind::ChatJoinRequest(r) => raw.chat_join_request = Some(r),
            UpdateKind::Unknown(Value::Object(rest)) => raw.rest = rest,
            UpdateKind::Unknown(_) => {}
        }
        raw
    }
}

// ============================================================================
// Payload Extraction
// ============================================================================

/// Extracts a typed payload from an update.
///
/// Handlers declare the payload they want as their second argument; the
/// dispatcher calls `from_update` after the record's kind has matched, so the
/// extraction only fails when a handler was registered with a payload type
/// that the kind does not carry.
pub trait FromUpdate: Sized + Send + 'static {
    /// Returns the payload, or `None` if the update does not carry it.
    fn from_update(update: &Update) -> Option<Self>;
}

impl FromUpdate for Update {
    fn from_update(update: &Update) -> Option<Self> {
        Some(update.clone())
    }
}

impl FromUpdate for Message {
    fn from_update(update: &Update) -> Option<Self> {
        match &update.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m.clone()),
            _ => None,
        }
    }
}

impl FromUpdate for ChatMemberUpdated {
    fn from_update(update: &Update) -> Option<Self> {
        match &update.kind {
            UpdateKind::MyChatMember(c) | UpdateKind::ChatMember(c) => Some(c.clone()),
            _ => None,
        }
    }
}

macro_rules! impl_from_update {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl FromUpdate for $ty {
                fn from_update(update: &Update) -> Option<Self> {
                    match &update.kind {
                        UpdateKind::$variant(payload) => Some(payload.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_update!(
    InlineQuery => InlineQuery,
    ChosenInlineResult => ChosenInlineResult,
    CallbackQuery => CallbackQuery,
    ShippingQuery => ShippingQuery,
    PreCheckoutQuery => PreCheckoutQuery,
    Poll => Poll,
    PollAnswer => PollAnswer,
    ChatJoinRequest => ChatJoinRequest,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_message_update() {
        let update = Update::from_value(json!({
            "update_id": 101,
            "message": { "text": "/start" }
        }))
        .unwrap();

        assert_eq!(update.update_id, 101);
        assert_eq!(update.update_type(), UpdateType::Message);
        assert_eq!(update.message().and_then(Message::text), Some("/start"));
    }

    #[test]
    fn test_two_kinds_is_malformed() {
        let result = Update::from_value(json!({
            "update_id": 5,
            "message": { "text": "a" },
            "poll": { "id": "p" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_update_id_is_malformed() {
        assert!(Update::from_value(json!({ "message": { "text": "a" } })).is_err());
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let update = Update::from_value(json!({
            "update_id": 9,
            "message_reaction": { "chat": { "id": 1 } }
        }))
        .unwrap();

        assert_eq!(update.update_type(), UpdateType::Unknown);
        match &update.kind {
            UpdateKind::Unknown(rest) => assert!(rest.get("message_reaction").is_some()),
            other => panic!("unexpected kind {other:?}"),
        }

        let back = serde_json::to_value(&update).unwrap();
        assert!(back.get("message_reaction").is_some());
    }

    #[test]
    fn test_callback_query_sender_and_payload() {
        let update = Update::from_value(json!({
            "update_id": 3,
            "callback_query": {
                "id": "q1",
                "from": { "id": 42, "is_bot": false, "first_name": "Ada" },
                "chat_instance": "ci",
                "data": "vote:1"
            }
        }))
        .unwrap();

        assert_eq!(update.sender().map(|u| u.id), Some(42));
        let query = CallbackQuery::from_update(&update).unwrap();
        assert_eq!(query.data.as_deref(), Some("vote:1"));
        assert!(Message::from_update(&update).is_none());
    }

    #[test]
    fn test_update_type_from_str() {
        assert_eq!(
            "chat_join_request".parse::<UpdateType>(),
            Ok(UpdateType::ChatJoinRequest)
        );
        assert!("reaction".parse::<UpdateType>().is_err());
    }
}
