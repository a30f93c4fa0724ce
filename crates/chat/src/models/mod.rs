//! Domain models for conversation entities

mod attachment;
mod conversation;
mod identity;
mod message;
mod sync_cursor;

pub use attachment::Attachment;
pub use conversation::{ConversationId, ConversationKind, ConversationRef, ConversationTarget};
pub use identity::Identity;
pub use message::{
    Delivery, LocalId, Message, MessageBuilder, MessageId, MessageKind, Reaction, ReplyPreview,
};
pub use sync_cursor::SyncCursor;
