//! Backend integration
//!
//! This module provides:
//! - The [`ChatBackend`] trait every backend implements
//! - An HTTP client for the REST backend
//! - An in-memory reference backend for tests and offline use
//! - Response normalization to domain models

mod client;
mod memory;
mod multipart;
mod normalize;

pub use client::HttpBackend;
pub use memory::InMemoryBackend;
pub use normalize::{
    normalize_conversation, normalize_group, normalize_identity, normalize_message,
    parse_timestamp,
};

use anyhow::Result;

use crate::models::{
    Attachment, ConversationRef, ConversationTarget, Identity, Message, MessageId, MessageKind,
};

/// A message to create on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub sender: String,
    pub target: ConversationTarget,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
}

/// Operations the conversation core needs from the server
///
/// Failures are `anyhow::Error`; an authoritative refusal carries a
/// [`crate::error::ServerRejected`] so callers can tell it from a
/// transient failure.
pub trait ChatBackend: Send + Sync {
    /// Exchange credentials for the user's identity
    fn login(&self, username: &str, password: &str) -> Result<Identity>;

    /// All direct conversations and groups `username` takes part in
    fn list_conversations(&self, username: &str) -> Result<Vec<ConversationRef>>;

    /// Full message snapshot of one conversation
    fn fetch_messages(&self, username: &str, target: &ConversationTarget) -> Result<Vec<Message>>;

    /// Create a text message; returns the stored message
    fn send_message(&self, request: &SendRequest) -> Result<Message>;

    /// Create a media message from an uploaded file
    fn upload_media(&self, request: &SendRequest, attachment: &Attachment) -> Result<Message>;

    fn edit_message(&self, id: &MessageId, username: &str, new_content: &str) -> Result<()>;

    fn delete_message(&self, id: &MessageId, username: &str, for_everyone: bool) -> Result<()>;

    fn react_message(&self, id: &MessageId, username: &str, kind: &str) -> Result<()>;

    fn forward_message(&self, id: &MessageId, sender: &str, recipients: &[String]) -> Result<()>;

    /// Mark everything `peer` sent to `username` as read
    fn mark_read(&self, username: &str, peer: &str) -> Result<()>;
}

/// REST response types
pub mod wire {
    use serde::{Deserialize, Serialize};

    /// Ids arrive as numbers or strings depending on the endpoint
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(untagged)]
    pub enum WireId {
        Int(i64),
        Text(String),
    }

    impl std::fmt::Display for WireId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Int(n) => write!(f, "{n}"),
                Self::Text(s) => f.write_str(s),
            }
        }
    }

    /// User object embedded in several responses
    #[derive(Debug, Clone, Deserialize)]
    pub struct WireUser {
        pub username: String,
        pub full_name: Option<String>,
        pub avatar: Option<String>,
        pub is_online: Option<bool>,
        pub is_admin: Option<bool>,
    }

    /// A sender is either a user object or a bare username
    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum WireSender {
        User(WireUser),
        Name(String),
    }

    impl WireSender {
        pub fn username(&self) -> &str {
            match self {
                Self::User(user) => &user.username,
                Self::Name(name) => name,
            }
        }
    }

    /// Response from `POST /login/`
    #[derive(Debug, Deserialize)]
    pub struct LoginResponse {
        pub user: Option<WireUser>,
        pub username: Option<String>,
        pub full_name: Option<String>,
        pub is_admin: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireReaction {
        pub user: WireSender,
        #[serde(rename = "type", alias = "reaction_type")]
        pub kind: String,
    }

    /// The replied-to message, embedded or as a bare id
    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum WireReplyTo {
        Id(WireId),
        Embedded {
            id: Option<WireId>,
            sender: Option<WireSender>,
            content: Option<String>,
        },
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireMessage {
        pub id: WireId,
        pub sender: WireSender,
        #[serde(default)]
        pub content: Option<String>,
        #[serde(default)]
        pub message_type: Option<String>,
        #[serde(default)]
        pub media_url: Option<String>,
        pub created_at: String,
        #[serde(default)]
        pub edited_at: Option<String>,
        #[serde(default)]
        pub deleted: bool,
        #[serde(default)]
        pub deleted_for_everyone: bool,
        #[serde(default)]
        pub reply_to: Option<WireReplyTo>,
        #[serde(default)]
        pub reactions: Vec<WireReaction>,
        #[serde(default)]
        pub is_mine: Option<bool>,
        #[serde(default)]
        pub is_read: bool,
    }

    /// Response from `GET /messages/` and `GET /group-messages/`
    #[derive(Debug, Deserialize)]
    pub struct MessagesResponse {
        #[serde(default)]
        pub messages: Vec<WireMessage>,
    }

    /// Response from `POST /send-message/`
    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub enum SendResponse {
        Wrapped { message: WireMessage },
        Bare(WireMessage),
        IdOnly { message_id: WireId },
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum WireLastMessage {
        Text(String),
        Full {
            content: Option<String>,
            created_at: Option<String>,
        },
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireConversation {
        #[serde(default)]
        pub other_user: Option<WireUser>,
        #[serde(default)]
        pub last_message: Option<WireLastMessage>,
        #[serde(default)]
        pub unread_count: u32,
        #[serde(default)]
        pub updated_at: Option<String>,
    }

    /// Response from `GET /conversations/`
    #[derive(Debug, Deserialize)]
    pub struct ConversationsResponse {
        #[serde(default)]
        pub conversations: Vec<WireConversation>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireGroup {
        pub id: WireId,
        pub name: String,
        #[serde(default)]
        pub avatar: Option<String>,
        #[serde(default)]
        pub member_count: Option<u32>,
        #[serde(default)]
        pub last_message: Option<WireLastMessage>,
        #[serde(default)]
        pub unread_count: u32,
        #[serde(default)]
        pub updated_at: Option<String>,
    }

    /// Response from `GET /groups/`
    #[derive(Debug, Deserialize)]
    pub struct GroupsResponse {
        #[serde(default)]
        pub groups: Vec<WireGroup>,
    }

    /// Error body the backend sends with 4xx responses
    #[derive(Debug, Default, Deserialize)]
    pub struct ErrorBody {
        pub error: Option<String>,
        pub message: Option<String>,
        pub detail: Option<String>,
    }

    impl ErrorBody {
        pub fn reason(self) -> Option<String> {
            self.error.or(self.message).or(self.detail)
        }
    }
}
