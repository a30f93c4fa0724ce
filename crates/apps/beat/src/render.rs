//! Plain-text rendering of chat state

use chat::{
    ChatState, ComposeMode, ConversationRef, Delivery, Message, format_timestamp, message_preview,
    reaction_counts, reaction_emoji,
};
use chrono::{DateTime, Utc};

pub fn conversation_line(n: usize, conv: &ConversationRef, now: DateTime<Utc>) -> String {
    let presence = match conv.is_online {
        Some(true) => " ●",
        _ => "",
    };
    let members = conv
        .member_count
        .map(|count| format!(" ({count} members)"))
        .unwrap_or_default();
    let unread = if conv.unread_count > 0 {
        format!(" [{}]", conv.unread_count)
    } else {
        String::new()
    };
    format!(
        "{n:>3}. {}{presence}{members}{unread}  {}  {}",
        conv.display_name,
        format_timestamp(conv.updated_at, now),
        conv.last_message_preview
    )
}

pub fn message_line(n: usize, msg: &Message, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{n:>3}. {} {}: ",
        format_timestamp(msg.created_at, now),
        if msg.is_mine { "you" } else { msg.sender.as_str() }
    );

    if let Some(preview) = &msg.reply_preview {
        line.push_str(&format!("[re {}: {}] ", preview.sender, preview.content));
    }
    line.push_str(&message_preview(msg));
    if !msg.is_deleted {
        if let Some(url) = &msg.media_url {
            line.push_str(&format!(" <{url}>"));
        }
        if msg.edited_at.is_some() {
            line.push_str(" (edited)");
        }
    }

    let reactions: Vec<String> = reaction_counts(msg)
        .into_iter()
        .map(|(kind, count)| format!("{}{count}", reaction_emoji(kind).unwrap_or(kind)))
        .collect();
    if !reactions.is_empty() {
        line.push_str(&format!("  {}", reactions.join(" ")));
    }

    match &msg.delivery {
        Delivery::Confirmed => {}
        Delivery::Pending => line.push_str("  …"),
        Delivery::Failed(reason) => line.push_str(&format!("  ✗ {reason} (/retry {n})")),
    }
    line
}

/// One-line composer status, if it is doing anything
pub fn composer_status(state: &ChatState) -> Option<String> {
    let composer = state.composer()?;
    match composer.mode() {
        ComposeMode::Idle => None,
        ComposeMode::Replying(target) => Some(format!(
            "replying to {}: {}",
            target.sender, target.content
        )),
        ComposeMode::Editing(target) => Some(format!("editing: {}", target.content)),
        ComposeMode::ForwardSelecting(ids) => {
            Some(format!("{} selected, /forward <user>...", ids.len()))
        }
    }
}

/// Prints the active conversation only when it changed since the last call
#[derive(Default)]
pub struct Screen {
    shown: Vec<Message>,
}

impl Screen {
    pub fn render(&mut self, state: &ChatState) -> Option<String> {
        if state.messages() == self.shown.as_slice() {
            return None;
        }
        self.shown = state.messages().to_vec();
        Some(self.format(state))
    }

    pub fn force(&mut self, state: &ChatState) -> String {
        self.shown = state.messages().to_vec();
        self.format(state)
    }

    fn format(&self, state: &ChatState) -> String {
        let now = Utc::now();
        let title = state
            .active_conversation()
            .map(|c| c.display_name.clone())
            .unwrap_or_default();
        let mut out = format!("── {title} ──\n");
        for (i, msg) in state.messages().iter().enumerate() {
            out.push_str(&message_line(i + 1, msg, now));
            out.push('\n');
        }
        if let Some(status) = composer_status(state) {
            out.push_str(&format!("({status})\n"));
        }
        out
    }
}
