use serde::{Deserialize, Serialize};

/// The kind of a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
    /// A chat type this crate does not know about, or no type at all.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ChatType {
    /// Returns `true` for basic groups and supergroups.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

/// A private chat, group, supergroup or channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl Chat {
    /// Returns `true` if `name` equals this chat's public username, ignoring a
    /// leading `@` and ASCII case.
    pub fn has_username(&self, name: &str) -> bool {
        let name = name.trim_start_matches('@');
        self.username
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(name))
    }
}
