//! Conversation list queries

use crate::models::ConversationRef;

/// Conversations whose name or peer/group id contains `text`, case-insensitively
///
/// Blank text matches everything.
pub fn filter_conversations<'a>(
    conversations: &'a [ConversationRef],
    text: &str,
) -> Vec<&'a ConversationRef> {
    let needle = text.trim().to_lowercase();
    conversations
        .iter()
        .filter(|c| {
            needle.is_empty()
                || c.display_name.to_lowercase().contains(&needle)
                || c.peer_or_group_id.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Conversations ordered newest activity first
pub fn sorted_by_recent(conversations: &[ConversationRef]) -> Vec<&ConversationRef> {
    let mut sorted: Vec<&ConversationRef> = conversations.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted
}

/// Total unread messages across the list
pub fn total_unread(conversations: &[ConversationRef]) -> u32 {
    conversations.iter().map(|c| c.unread_count).sum()
}
