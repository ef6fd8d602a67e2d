//! Composable predicates over updates.
//!
//! A [`Filter`] wraps a `Fn(&Update) -> bool`. Filters combine with `&`, `|`
//! and `!` into new filters; evaluation short-circuits left to right.
//!
//! # Example
//!
//! ```rust,ignore
//! use nectar_core::filters;
//!
//! let admin_commands = filters::command(["ban", "kick"]) & filters::group() & !filters::forwarded();
//! ```

use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

type Predicate = dyn Fn(&crate::types::Update) -> bool + Send + Sync;

/// A reusable, cheap-to-clone predicate over an [`Update`](crate::types::Update).
#[derive(Clone)]
pub struct Filter {
    predicate: Arc<Predicate>,
}

impl Filter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&crate::types::Update) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Matches every update.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Matches no update.
    pub fn none() -> Self {
        Self::new(|_| false)
    }

    /// Evaluates the filter.
    pub fn matches(&self, update: &crate::types::Update) -> bool {
        (self.predicate)(update)
    }

    pub fn and(self, other: Filter) -> Self {
        Self::new(move |u| self.matches(u) && other.matches(u))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::new(move |u| self.matches(u) || other.matches(u))
    }

    pub fn negate(self) -> Self {
        Self::new(move |u| !self.matches(u))
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Filter(..)")
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        self.and(rhs)
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.or(rhs)
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        self.negate()
    }
}

/// Built-in filters.
///
/// Message-scoped filters inspect whichever message-bearing kind the update
/// carries (message, edited message, channel post or edited channel post) and
/// never match other kinds.
pub mod filters {
    use regex::Regex;

    use super::Filter;
    use crate::types::{ChatType, MediaKind, Message, Update, UpdateKind};

    fn carried_message(update: &Update) -> Option<&Message> {
        match &update.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            _ => None,
        }
    }

    fn message<F>(predicate: F) -> Filter
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Filter::new(move |u| carried_message(u).is_some_and(&predicate))
    }

    fn media(kind: MediaKind) -> Filter {
        message(move |m| m.has_media(kind))
    }

    // ------------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------------

    /// Messages with text.
    pub fn text() -> Filter {
        message(|m| m.text.is_some())
    }

    /// Messages whose text contains `needle`.
    pub fn text_contains(needle: impl Into<String>) -> Filter {
        let needle = needle.into();
        message(move |m| m.text().is_some_and(|t| t.contains(needle.as_str())))
    }

    /// Media messages with a caption.
    pub fn caption() -> Filter {
        message(|m| m.caption.is_some())
    }

    pub fn caption_contains(needle: impl Into<String>) -> Filter {
        let needle = needle.into();
        message(move |m| m.caption().is_some_and(|c| c.contains(needle.as_str())))
    }

    /// Messages starting with `/` followed by one of `commands`, ignoring case.
    pub fn command<I, S>(commands: I) -> Filter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        command_with_prefixes(commands, ["/"])
    }

    /// Messages starting with any prefix followed by any command, ignoring case.
    pub fn command_with_prefixes<I, S, P, T>(commands: I, prefixes: P) -> Filter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let commands: Vec<String> = commands
            .into_iter()
            .map(|c| c.into().to_lowercase())
            .collect();
        let triggers: Vec<String> = prefixes
            .into_iter()
            .map(Into::into)
            .flat_map(|prefix: String| {
                let prefix = prefix.to_lowercase();
                commands
                    .iter()
                    .map(move |cmd| format!("{prefix}{cmd}"))
                    .collect::<Vec<_>>()
            })
            .collect();

        message(move |m| {
            m.text().is_some_and(|text| {
                let text = text.to_lowercase();
                triggers.iter().any(|t| text.starts_with(t.as_str()))
            })
        })
    }

    /// Messages whose text matches `pattern` anywhere.
    pub fn regex(pattern: &str) -> Result<Filter, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(message(move |m| m.text().is_some_and(|t| re.is_match(t))))
    }

    // ------------------------------------------------------------------------
    // Sender and chat
    // ------------------------------------------------------------------------

    /// A user given by numeric id or `@username`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Who {
        Id(i64),
        Username(String),
    }

    impl From<i64> for Who {
        fn from(id: i64) -> Self {
            Self::Id(id)
        }
    }

    impl From<&str> for Who {
        fn from(name: &str) -> Self {
            Self::Username(name.to_string())
        }
    }

    impl From<String> for Who {
        fn from(name: String) -> Self {
            Self::Username(name)
        }
    }

    fn collect_who<I, W>(items: I) -> Vec<Who>
    where
        I: IntoIterator<Item = W>,
        W: Into<Who>,
    {
        items.into_iter().map(Into::into).collect()
    }

    /// Updates sent by one of `users`. Covers every kind that has a sender,
    /// including callback queries.
    pub fn user<I, W>(users: I) -> Filter
    where
        I: IntoIterator<Item = W>,
        W: Into<Who>,
    {
        let users = collect_who(users);
        Filter::new(move |u| {
            u.sender().is_some_and(|sender| {
                users.iter().any(|w| match w {
                    Who::Id(id) => sender.id == *id,
                    Who::Username(name) => sender.has_username(name),
                })
            })
        })
    }

    /// Updates from one of `chats`.
    pub fn chat<I, W>(chats: I) -> Filter
    where
        I: IntoIterator<Item = W>,
        W: Into<Who>,
    {
        let chats = collect_who(chats);
        Filter::new(move |u| {
            u.chat().is_some_and(|chat| {
                chats.iter().any(|w| match w {
                    Who::Id(id) => chat.id == *id,
                    Who::Username(name) => chat.has_username(name),
                })
            })
        })
    }

    pub fn private() -> Filter {
        message(|m| m.chat.kind == ChatType::Private)
    }

    /// Groups and supergroups.
    pub fn group() -> Filter {
        message(|m| m.chat.kind.is_group())
    }

    pub fn channel() -> Filter {
        message(|m| m.chat.kind == ChatType::Channel)
    }

    // ------------------------------------------------------------------------
    // Message shape
    // ------------------------------------------------------------------------

    pub fn reply() -> Filter {
        message(Message::is_reply)
    }

    pub fn forwarded() -> Filter {
        message(Message::is_forwarded)
    }

    pub fn new_chat_members() -> Filter {
        message(|m| m.new_chat_members.as_ref().is_some_and(|v| !v.is_empty()))
    }

    pub fn left_chat_member() -> Filter {
        message(|m| m.left_chat_member.is_some())
    }

    /// Callback queries whose data equals `data`.
    pub fn callback_data(data: impl Into<String>) -> Filter {
        let data = data.into();
        Filter::new(move |u| match &u.kind {
            UpdateKind::CallbackQuery(q) => q.data.as_deref() == Some(data.as_str()),
            _ => false,
        })
    }

    // ------------------------------------------------------------------------
    // Content kinds
    // ------------------------------------------------------------------------

    pub fn photo() -> Filter {
        media(MediaKind::Photo)
    }

    pub fn video() -> Filter {
        media(MediaKind::Video)
    }

    pub fn document() -> Filter {
        media(MediaKind::Document)
    }

    pub fn audio() -> Filter {
        media(MediaKind::Audio)
    }

    pub fn voice() -> Filter {
        media(MediaKind::Voice)
    }

    pub fn video_note() -> Filter {
        media(MediaKind::VideoNote)
    }

    pub fn sticker() -> Filter {
        media(MediaKind::Sticker)
    }

    pub fn contact() -> Filter {
        media(MediaKind::Contact)
    }

    pub fn location() -> Filter {
        media(MediaKind::Location)
    }

    pub fn venue() -> Filter {
        media(MediaKind::Venue)
    }

    pub fn animation() -> Filter {
        media(MediaKind::Animation)
    }

    pub fn dice() -> Filter {
        media(MediaKind::Dice)
    }

    pub fn game() -> Filter {
        media(MediaKind::Game)
    }

    /// Messages with a link preview.
    pub fn web_page() -> Filter {
        media(MediaKind::WebPage)
    }

    /// Poll updates, and messages carrying a poll.
    pub fn poll() -> Filter {
        Filter::new(|u| matches!(u.kind, UpdateKind::Poll(_))) | media(MediaKind::Poll)
    }
}

#[cfg(test)]
mod tests {
    use super::filters;
    use super::*;
    use crate::types::Update;
    use serde_json::{Value, json};

    fn update(body: Value) -> Update {
        let mut value = json!({ "update_id": 1 });
        if let (Value::Object(target), Value::Object(src)) = (&mut value, body) {
            target.extend(src);
        }
        Update::from_value(value).unwrap()
    }

    fn text_update(text: &str) -> Update {
        update(json!({
            "message": {
                "message_id": 1,
                "chat": { "id": 10, "type": "private" },
                "from": { "id": 77, "first_name": "Ann", "username": "Ann_X" },
                "text": text
            }
        }))
    }

    #[test]
    fn test_and_not_truth_table() {
        let a = Filter::new(|u| u.update_id % 2 == 0);
        let b = Filter::new(|u| u.update_id % 3 == 0);
        let combined = a.clone() & !b.clone();

        for id in 0..12 {
            let u = Update::new(id, crate::types::UpdateKind::Poll(Default::default()));
            assert_eq!(combined.matches(&u), a.matches(&u) && !b.matches(&u), "id {id}");
        }
    }

    #[test]
    fn test_or_short_circuits() {
        let panicking = Filter::new(|_| panic!("must not be evaluated"));
        let f = Filter::all() | panicking.clone();
        assert!(f.matches(&text_update("x")));
        let g = Filter::none() & panicking;
        assert!(!g.matches(&text_update("x")));
    }

    #[test]
    fn test_command_is_case_insensitive_with_prefixes() {
        let start = filters::command(["start"]);
        assert!(start.matches(&text_update("/start")));
        assert!(start.matches(&text_update("/START now")));
        assert!(!start.matches(&text_update("start")));

        let bang = filters::command_with_prefixes(["help"], ["!", "/"]);
        assert!(bang.matches(&text_update("!help")));
        assert!(bang.matches(&text_update("/Help")));
        assert!(!bang.matches(&text_update(".help")));
    }

    #[test]
    fn test_text_and_regex() {
        assert!(filters::text().matches(&text_update("hello")));
        assert!(filters::text_contains("ell").matches(&text_update("hello")));
        assert!(!filters::text_contains("xyz").matches(&text_update("hello")));

        let digits = filters::regex(r"\d{3}").unwrap();
        assert!(digits.matches(&text_update("code 123")));
        assert!(!digits.matches(&text_update("code 12")));
        assert!(filters::regex("(").is_err());
    }

    #[test]
    fn test_user_by_id_or_username() {
        let u = text_update("hi");
        assert!(filters::user([77]).matches(&u));
        assert!(filters::user(["@ann_x"]).matches(&u));
        assert!(!filters::user([1]).matches(&u));
    }

    #[test]
    fn test_user_covers_callback_query_sender() {
        let u = update(json!({
            "callback_query": {
                "id": "q",
                "from": { "id": 5, "first_name": "Bo" },
                "chat_instance": "c",
                "data": "yes"
            }
        }));
        assert!(filters::user([5]).matches(&u));
        assert!(filters::callback_data("yes").matches(&u));
        assert!(!filters::text().matches(&u));
    }

    #[test]
    fn test_chat_type_filters() {
        let private = text_update("x");
        assert!(filters::private().matches(&private));
        assert!(!filters::group().matches(&private));

        let supergroup = update(json!({
            "message": { "chat": { "id": -100, "type": "supergroup" }, "text": "x" }
        }));
        assert!(filters::group().matches(&supergroup));
        assert!(filters::chat([-100]).matches(&supergroup));

        let post = update(json!({
            "channel_post": { "chat": { "id": -200, "type": "channel" }, "text": "news" }
        }));
        assert!(filters::channel().matches(&post));
        assert!(filters::text().matches(&post));
    }

    #[test]
    fn test_media_and_shape_filters() {
        let photo = update(json!({
            "message": {
                "chat": { "id": 1, "type": "private" },
                "photo": [{ "file_id": "a" }],
                "caption": "look",
                "forward_date": 1700000000,
                "reply_to_message": { "message_id": 3, "text": "orig" }
            }
        }));
        assert!(filters::photo().matches(&photo));
        assert!(!filters::video().matches(&photo));
        assert!(filters::caption_contains("lo").matches(&photo));
        assert!(filters::forwarded().matches(&photo));
        assert!(filters::reply().matches(&photo));
        assert!(!filters::text().matches(&photo));
    }

    #[test]
    fn test_web_page_filter() {
        let preview = update(json!({
            "message": {
                "chat": { "id": 1, "type": "private" },
                "text": "see https://example.org",
                "web_page": { "url": "https://example.org" }
            }
        }));
        assert!(filters::web_page().matches(&preview));
        assert!(filters::text().matches(&preview));
        assert!(!filters::web_page().matches(&text_update("no link")));
    }

    #[test]
    fn test_poll_filter_matches_poll_updates() {
        let u = update(json!({ "poll": { "id": "p1", "question": "?" } }));
        assert!(filters::poll().matches(&u));
        assert!(!filters::poll().matches(&text_update("x")));
    }
}
