//! REST response normalization
//!
//! Converts backend responses to domain models.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use super::SendRequest;
use super::wire::{
    LoginResponse, WireConversation, WireGroup, WireLastMessage, WireMessage, WireReplyTo,
};
use crate::models::{
    ConversationId, ConversationRef, Identity, Message, MessageId, MessageKind, Reaction,
    ReplyPreview,
};

/// Parse a backend timestamp
///
/// Accepts RFC 3339 and offset-less ISO 8601 (taken as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Normalize a login response to an Identity
pub fn normalize_identity(response: LoginResponse) -> Result<Identity> {
    let (username, full_name, is_admin) = match response.user {
        Some(user) => (Some(user.username), user.full_name, user.is_admin),
        None => (response.username, response.full_name, response.is_admin),
    };
    let username = username.context("Login response has no username")?;
    let display_name = full_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| username.clone());

    Ok(Identity {
        username,
        display_name,
        is_admin: is_admin.unwrap_or(false),
    })
}

/// Normalize a backend message
///
/// `me` decides ownership when the backend does not say.
pub fn normalize_message(wire: WireMessage, conversation_id: &ConversationId, me: &str) -> Message {
    let sender = wire.sender.username().to_string();
    let is_mine = wire.is_mine.unwrap_or(sender == me);

    let (reply_to_id, reply_preview) = match wire.reply_to {
        Some(WireReplyTo::Id(id)) => (Some(MessageId::new(id.to_string())), None),
        Some(WireReplyTo::Embedded {
            id,
            sender,
            content,
        }) => {
            let preview = ReplyPreview {
                sender: sender.map(|s| s.username().to_string()).unwrap_or_default(),
                content: content.unwrap_or_default(),
            };
            (id.map(|id| MessageId::new(id.to_string())), Some(preview))
        }
        None => (None, None),
    };

    let reactions = wire
        .reactions
        .into_iter()
        .map(|r| Reaction {
            user: r.user.username().to_string(),
            kind: r.kind,
        })
        .collect();

    let created_at = parse_timestamp(&wire.created_at).unwrap_or_else(Utc::now);
    let edited_at = wire.edited_at.as_deref().and_then(parse_timestamp);
    let kind = wire
        .message_type
        .as_deref()
        .map(MessageKind::parse)
        .unwrap_or_default();

    Message::builder(MessageId::new(wire.id.to_string()), conversation_id.clone())
        .sender(sender)
        .content(wire.content.unwrap_or_default())
        .kind(kind)
        .media_url(wire.media_url.filter(|url| !url.is_empty()))
        .created_at(created_at)
        .edited_at(edited_at)
        .deleted(wire.deleted || wire.deleted_for_everyone, wire.deleted_for_everyone)
        .reply_to(reply_to_id)
        .reply_preview(reply_preview)
        .reactions(reactions)
        .mine(is_mine)
        .read(wire.is_read)
        .build()
}

/// Build the stored message when the backend only returned its id
pub fn message_from_request(id: MessageId, request: &SendRequest) -> Message {
    Message::builder(id, request.target.conversation_id())
        .sender(request.sender.clone())
        .content(request.content.clone())
        .kind(request.kind)
        .reply_to(request.reply_to.clone())
        .mine(true)
        .build()
}

/// Normalize a direct conversation entry; entries without a peer are skipped
pub fn normalize_conversation(wire: WireConversation) -> Option<ConversationRef> {
    let peer = wire.other_user?;
    let display_name = peer
        .full_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| peer.username.clone());

    let mut conv = ConversationRef::direct(peer.username, display_name);
    conv.avatar = peer.avatar;
    conv.is_online = peer.is_online;
    conv.unread_count = wire.unread_count;
    let (preview, last_at) = split_last_message(wire.last_message);
    conv.last_message_preview = preview;
    conv.updated_at = wire
        .updated_at
        .as_deref()
        .and_then(parse_timestamp)
        .or(last_at)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Some(conv)
}

/// Normalize a group entry
pub fn normalize_group(wire: WireGroup) -> ConversationRef {
    let mut conv = ConversationRef::group(wire.id.to_string(), wire.name, 0);
    conv.member_count = wire.member_count;
    conv.avatar = wire.avatar;
    conv.unread_count = wire.unread_count;
    let (preview, last_at) = split_last_message(wire.last_message);
    conv.last_message_preview = preview;
    conv.updated_at = wire
        .updated_at
        .as_deref()
        .and_then(parse_timestamp)
        .or(last_at)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    conv
}

fn split_last_message(last: Option<WireLastMessage>) -> (String, Option<DateTime<Utc>>) {
    match last {
        Some(WireLastMessage::Text(text)) => (text, None),
        Some(WireLastMessage::Full {
            content,
            created_at,
        }) => (
            content.unwrap_or_default(),
            created_at.as_deref().and_then(parse_timestamp),
        ),
        None => (String::new(), None),
    }
}
