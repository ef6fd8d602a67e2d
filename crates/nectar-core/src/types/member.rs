use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Chat, User};

/// A change in the status of a chat member.
///
/// The member records are kept as raw JSON; their shape depends on the
/// `status` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub date: i64,
    pub old_chat_member: Value,
    pub new_chat_member: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<Value>,
}

impl ChatMemberUpdated {
    /// The `status` of the member before the change.
    pub fn old_status(&self) -> Option<&str> {
        self.old_chat_member.get("status").and_then(Value::as_str)
    }

    /// The `status` of the member after the change.
    pub fn new_status(&self) -> Option<&str> {
        self.new_chat_member.get("status").and_then(Value::as_str)
    }
}

/// A request to join a chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatJoinRequest {
    pub chat: Chat,
    pub from: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_chat_id: Option<i64>,
    pub date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<Value>,
}
