//! Message model representing one entry in a conversation

use super::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message within a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Temporary id of an optimistic message, unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl LocalId {
    /// The message id used for the placeholder until the server assigns one
    pub fn message_id(&self) -> MessageId {
        MessageId(self.to_string())
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Content type of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Parse the backend's `message_type`, treating anything unknown as text
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" | "file" => Self::Document,
            _ => Self::Text,
        }
    }
}

/// One user's reaction on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: String,
    pub kind: String,
}

/// Sender and content of the message being replied to, when the backend embeds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub sender: String,
    pub content: String,
}

/// Local delivery state of a message
///
/// Everything the server returned is `Confirmed`; optimistic entries and
/// messages with an in-flight mutation are `Pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Delivery {
    #[default]
    Confirmed,
    Pending,
    Failed(String),
}

/// A single message within a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Sender username
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_for_everyone: bool,
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub reply_preview: Option<ReplyPreview>,
    pub reactions: Vec<Reaction>,
    pub is_mine: bool,
    pub is_read: bool,
    #[serde(skip)]
    pub delivery: Delivery,
    /// Set on optimistic entries only
    #[serde(skip)]
    pub local_id: Option<LocalId>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, conversation_id: ConversationId) -> MessageBuilder {
        MessageBuilder::new(id, conversation_id)
    }

    /// The reaction kind `user` currently holds on this message
    pub fn reaction_of(&self, user: &str) -> Option<&str> {
        self.reactions
            .iter()
            .find(|r| r.user == user)
            .map(|r| r.kind.as_str())
    }

    /// Set `user`'s reaction to `kind`.
    ///
    /// A user holds at most one reaction per message: a different kind
    /// replaces the previous one, the same kind removes it.
    pub fn toggle_reaction(&mut self, user: &str, kind: &str) {
        let next = (self.reaction_of(user) != Some(kind)).then(|| kind.to_string());
        self.set_reaction(user, next);
    }

    /// Replace whatever `user` holds with `kind`, or clear it
    pub fn set_reaction(&mut self, user: &str, kind: Option<String>) {
        self.reactions.retain(|r| r.user != user);
        if let Some(kind) = kind {
            self.reactions.push(Reaction {
                user: user.to_string(),
                kind,
            });
        }
    }

    pub fn apply_edit(&mut self, content: &str, at: DateTime<Utc>) {
        self.content = content.to_string();
        self.edited_at = Some(at);
    }

    /// Mark as deleted and hide the content
    ///
    /// Id, position, reactions and reply links stay.
    pub fn tombstone(&mut self, for_everyone: bool) {
        self.is_deleted = true;
        self.deleted_for_everyone |= for_everyone;
        self.content.clear();
        self.media_url = None;
    }

    pub fn is_optimistic(&self) -> bool {
        self.local_id.is_some()
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    conversation_id: ConversationId,
    sender: String,
    content: String,
    kind: MessageKind,
    media_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    edited_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    deleted_for_everyone: bool,
    reply_to_id: Option<MessageId>,
    reply_preview: Option<ReplyPreview>,
    reactions: Vec<Reaction>,
    is_mine: bool,
    is_read: bool,
}

impl MessageBuilder {
    fn new(id: MessageId, conversation_id: ConversationId) -> Self {
        Self {
            id,
            conversation_id,
            sender: String::new(),
            content: String::new(),
            kind: MessageKind::Text,
            media_url: None,
            created_at: None,
            edited_at: None,
            is_deleted: false,
            deleted_for_everyone: false,
            reply_to_id: None,
            reply_preview: None,
            reactions: Vec::new(),
            is_mine: false,
            is_read: false,
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn media_url(mut self, media_url: Option<String>) -> Self {
        self.media_url = media_url;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn edited_at(mut self, edited_at: Option<DateTime<Utc>>) -> Self {
        self.edited_at = edited_at;
        self
    }

    pub fn deleted(mut self, is_deleted: bool, for_everyone: bool) -> Self {
        self.is_deleted = is_deleted;
        self.deleted_for_everyone = for_everyone;
        self
    }

    pub fn reply_to(mut self, reply_to_id: Option<MessageId>) -> Self {
        self.reply_to_id = reply_to_id;
        self
    }

    pub fn reply_preview(mut self, preview: Option<ReplyPreview>) -> Self {
        self.reply_preview = preview;
        self
    }

    pub fn reactions(mut self, reactions: Vec<Reaction>) -> Self {
        self.reactions = reactions;
        self
    }

    pub fn mine(mut self, is_mine: bool) -> Self {
        self.is_mine = is_mine;
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender: self.sender,
            content: self.content,
            kind: self.kind,
            media_url: self.media_url,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            edited_at: self.edited_at,
            is_deleted: self.is_deleted,
            deleted_for_everyone: self.deleted_for_everyone,
            reply_to_id: self.reply_to_id,
            reply_preview: self.reply_preview,
            reactions: self.reactions,
            is_mine: self.is_mine,
            is_read: self.is_read,
            delivery: Delivery::Confirmed,
            local_id: None,
        }
    }
}
