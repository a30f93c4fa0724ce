//! Message display helpers

use chrono::{DateTime, Utc};

use crate::models::{Message, MessageKind};

/// Short relative label for a message or conversation timestamp
///
/// "Just now" under a minute, "5m ago" under an hour, the time of day for
/// today, "Yesterday", otherwise the date.
pub fn format_timestamp(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - ts;
    if elapsed.num_seconds() < 60 {
        return "Just now".to_string();
    }
    if elapsed.num_minutes() < 60 {
        return format!("{}m ago", elapsed.num_minutes());
    }

    let days = (now.date_naive() - ts.date_naive()).num_days();
    match days {
        0 => ts.format("%H:%M").to_string(),
        1 => "Yesterday".to_string(),
        _ => ts.format("%b %-d").to_string(),
    }
}

/// Emoji for a reaction kind
pub fn reaction_emoji(kind: &str) -> Option<&'static str> {
    match kind {
        "like" => Some("👍"),
        "love" => Some("❤️"),
        "laugh" => Some("😂"),
        "wow" => Some("😮"),
        "sad" => Some("😢"),
        "angry" => Some("😠"),
        _ => None,
    }
}

/// Reaction kinds on a message with their counts, in first-seen order
pub fn reaction_counts(message: &Message) -> Vec<(&str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for reaction in &message.reactions {
        match counts.iter_mut().find(|(kind, _)| *kind == reaction.kind) {
            Some((_, n)) => *n += 1,
            None => counts.push((reaction.kind.as_str(), 1)),
        }
    }
    counts
}

/// One-line text for a message in lists and reply previews
pub fn message_preview(message: &Message) -> String {
    if message.is_deleted {
        return "This message was deleted".to_string();
    }
    match message.kind {
        MessageKind::Text => message.content.clone(),
        MessageKind::Image => "📷 Photo".to_string(),
        MessageKind::Video => "🎥 Video".to_string(),
        MessageKind::Audio => "🎵 Audio".to_string(),
        MessageKind::Document => "📄 Document".to_string(),
    }
}
