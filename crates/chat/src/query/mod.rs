//! Query API for presentation
//!
//! Read-only helpers that shape chat state for display.

mod conversations;
mod messages;

pub use conversations::{filter_conversations, sorted_by_recent, total_unread};
pub use messages::{format_timestamp, message_preview, reaction_counts, reaction_emoji};
