use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Chat, User};

/// Content kinds a message may carry besides text.
///
/// Attachment payloads are kept as raw JSON on [`Message`]; filters only care
/// whether a kind is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Animation,
    Audio,
    Contact,
    Dice,
    Document,
    Game,
    Location,
    Photo,
    Poll,
    Sticker,
    Venue,
    Video,
    VideoNote,
    Voice,
    WebPage,
}

impl MediaKind {
    /// All media kinds, in wire-name order.
    pub const ALL: [MediaKind; 15] = [
        Self::Animation,
        Self::Audio,
        Self::Contact,
        Self::Dice,
        Self::Document,
        Self::Game,
        Self::Location,
        Self::Photo,
        Self::Poll,
        Self::Sticker,
        Self::Venue,
        Self::Video,
        Self::VideoNote,
        Self::Voice,
        Self::WebPage,
    ];

    /// The wire field name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Animation => "animation",
            Self::Audio => "audio",
            Self::Contact => "contact",
            Self::Dice => "dice",
            Self::Document => "document",
            Self::Game => "game",
            Self::Location => "location",
            Self::Photo => "photo",
            Self::Poll => "poll",
            Self::Sticker => "sticker",
            Self::Venue => "venue",
            Self::Video => "video",
            Self::VideoNote => "video_note",
            Self::Voice => "voice",
            Self::WebPage => "web_page",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a chat.
///
/// Deserialization is lenient: missing scalar fields fall back to their
/// defaults so that partial payloads still reach handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<Chat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_origin: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_chat_members: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_chat_member: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_note: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<Value>,
    /// Link preview of a URL in the text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_page: Option<Value>,
}

impl Message {
    /// The message text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The media caption, if any.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// The text, or the caption for media messages.
    pub fn text_or_caption(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }

    /// Returns `true` if this message replies to another one.
    pub fn is_reply(&self) -> bool {
        self.reply_to_message.is_some()
    }

    /// Returns `true` if this message was forwarded.
    pub fn is_forwarded(&self) -> bool {
        self.forward_date.is_some() || self.forward_origin.is_some()
    }

    /// Returns `true` if the message carries the given content kind.
    pub fn has_media(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Animation => self.animation.is_some(),
            MediaKind::Audio => self.audio.is_some(),
            MediaKind::Contact => self.contact.is_some(),
            MediaKind::Dice => self.dice.is_some(),
            MediaKind::Document => self.document.is_some(),
            MediaKind::Game => self.game.is_some(),
            MediaKind::Location => self.location.is_some(),
            MediaKind::Photo => self.photo.as_ref().is_some_and(|p| !p.is_empty()),
            MediaKind::Poll => self.poll.is_some(),
            MediaKind::Sticker => self.sticker.is_some(),
            MediaKind::Venue => self.venue.is_some(),
            MediaKind::Video => self.video.is_some(),
            MediaKind::VideoNote => self.video_note.is_some(),
            MediaKind::Voice => self.voice.is_some(),
            MediaKind::WebPage => self.web_page.is_some(),
        }
    }

    /// The first content kind present on this message.
    pub fn media_kind(&self) -> Option<MediaKind> {
        MediaKind::ALL.into_iter().find(|k| self.has_media(*k))
    }

    /// The `file_id` of the attached file, picking the largest photo size.
    pub fn file_id(&self) -> Option<&str> {
        let attachment = self
            .document
            .as_ref()
            .or_else(|| self.photo.as_ref().and_then(|sizes| sizes.last()))
            .or(self.audio.as_ref())
            .or(self.video.as_ref())
            .or(self.voice.as_ref())
            .or(self.video_note.as_ref())
            .or(self.animation.as_ref())
            .or(self.sticker.as_ref())?;
        attachment.get("file_id").and_then(Value::as_str)
    }
}
