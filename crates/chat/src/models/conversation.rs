//! Conversation model representing a direct chat or a group

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a conversation
///
/// Derived from what the backend addresses: `direct:<username>` for a
/// two-party chat, `group:<group id>` for a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn direct(peer: &str) -> Self {
        Self(format!("direct:{peer}"))
    }

    pub fn group(group_id: &str) -> Self {
        Self(format!("group:{group_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// What the backend needs to address a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationTarget {
    /// Two-party chat with the given username
    Direct(String),
    /// Group chat with the given group id
    Group(String),
}

impl ConversationTarget {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::Direct(peer) => ConversationId::direct(peer),
            Self::Group(group_id) => ConversationId::group(group_id),
        }
    }
}

/// One entry of the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Peer username (direct) or group id (group)
    pub peer_or_group_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Only known for direct conversations
    #[serde(default)]
    pub is_online: Option<bool>,
    /// Only known for groups
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message_preview: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRef {
    /// A direct conversation with `peer`
    pub fn direct(peer: impl Into<String>, display_name: impl Into<String>) -> Self {
        let peer = peer.into();
        Self {
            id: ConversationId::direct(&peer),
            kind: ConversationKind::Direct,
            peer_or_group_id: peer,
            display_name: display_name.into(),
            avatar: None,
            is_online: None,
            member_count: None,
            unread_count: 0,
            last_message_preview: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// A group conversation
    pub fn group(group_id: impl Into<String>, name: impl Into<String>, member_count: u32) -> Self {
        let group_id = group_id.into();
        Self {
            id: ConversationId::group(&group_id),
            kind: ConversationKind::Group,
            peer_or_group_id: group_id,
            display_name: name.into(),
            avatar: None,
            is_online: None,
            member_count: Some(member_count),
            unread_count: 0,
            last_message_preview: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn target(&self) -> ConversationTarget {
        match self.kind {
            ConversationKind::Direct => ConversationTarget::Direct(self.peer_or_group_id.clone()),
            ConversationKind::Group => ConversationTarget::Group(self.peer_or_group_id.clone()),
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_ids_are_prefixed() {
        let conv = ConversationRef::direct("bob", "Bob Builder");
        assert_eq!(conv.id.as_str(), "direct:bob");
        assert_eq!(conv.target(), ConversationTarget::Direct("bob".to_string()));
        assert!(!conv.is_group());
    }

    #[test]
    fn test_group_ids_do_not_collide_with_direct() {
        let group = ConversationRef::group("bob", "Bob's group", 3);
        let direct = ConversationRef::direct("bob", "Bob");
        assert_ne!(group.id, direct.id);
        assert_eq!(group.target().conversation_id(), group.id);
    }
}
