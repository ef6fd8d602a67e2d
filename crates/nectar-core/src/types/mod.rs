//! Update data model.
//!
//! Only the fields the engine, the built-in filters and typical handlers need
//! are typed. Records are plain data: acting on them goes through the
//! [`Bot`](crate::Bot) carried by the handler's [`Context`](crate::Context).

mod chat;
mod file;
mod member;
mod message;
mod poll;
mod query;
mod update;
mod user;

pub use chat::{Chat, ChatType};
pub use file::File;
pub use member::{ChatJoinRequest, ChatMemberUpdated};
pub use message::{MediaKind, Message};
pub use poll::{Poll, PollAnswer, PollOption};
pub use query::{CallbackQuery, ChosenInlineResult, InlineQuery, PreCheckoutQuery, ShippingQuery};
pub use update::{FromUpdate, ParseUpdateTypeError, Update, UpdateKind, UpdateType};
pub use user::User;
