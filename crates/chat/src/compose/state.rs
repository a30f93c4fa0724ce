//! Composition state machine
//!
//! ```text
//! Idle -> Replying(msg)          -> Idle   (send with reply_to, or cancel)
//! Idle -> Editing(msg)           -> Idle   (submit edit, or cancel)
//! Idle -> ForwardSelecting(ids)  -> Idle   (forward to targets, or cancel)
//! ```
//!
//! Only one non-idle mode exists at a time. Entering a mode while another is
//! active resets to Idle first.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use super::typing::TypingIndicator;
use crate::error::ValidationError;
use crate::models::{Attachment, Message, MessageId};

/// Enough of a message to show what is being replied to or edited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: MessageId,
    pub sender: String,
    pub content: String,
}

impl From<&Message> for MessageRef {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            sender: msg.sender.clone(),
            content: msg.content.clone(),
        }
    }
}

/// What the composer is currently doing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ComposeMode {
    #[default]
    Idle,
    Replying(MessageRef),
    Editing(MessageRef),
    ForwardSelecting(BTreeSet<MessageId>),
}

/// What submitting the draft should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Send {
        text: String,
        reply_to: Option<MessageId>,
    },
    Edit {
        id: MessageId,
        text: String,
    },
}

/// Composition state for the active conversation
#[derive(Debug, Clone)]
pub struct Composer {
    draft: String,
    mode: ComposeMode,
    pending_attachment: Option<Attachment>,
    typing: TypingIndicator,
}

impl Composer {
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            draft: String::new(),
            mode: ComposeMode::Idle,
            pending_attachment: None,
            typing: TypingIndicator::new(typing_timeout),
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn mode(&self) -> &ComposeMode {
        &self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.mode == ComposeMode::Idle
    }

    pub fn pending_attachment(&self) -> Option<&Attachment> {
        self.pending_attachment.as_ref()
    }

    pub fn is_typing(&self, now: DateTime<Utc>) -> bool {
        self.typing.is_typing(now)
    }

    /// Replace the draft text (a keystroke)
    pub fn set_draft(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.draft = text.into();
        self.typing.note_keystroke(now);
    }

    pub fn start_reply(&mut self, target: &Message) {
        self.leave_mode();
        debug!("Replying to {}", target.id);
        self.mode = ComposeMode::Replying(target.into());
    }

    /// Enter edit mode, seeding the draft with the message's current content
    pub fn start_edit(&mut self, target: &Message) -> Result<(), ValidationError> {
        if !target.is_mine {
            return Err(ValidationError::NotOwner(target.id.clone()));
        }
        if target.is_deleted {
            return Err(ValidationError::MessageDeleted(target.id.clone()));
        }
        self.leave_mode();
        debug!("Editing {}", target.id);
        self.draft = target.content.clone();
        self.mode = ComposeMode::Editing(target.into());
        Ok(())
    }

    /// Add or remove a message from the forward selection
    ///
    /// Enters ForwardSelecting when needed; removing the last id returns to Idle.
    pub fn toggle_forward(&mut self, id: MessageId) {
        match &mut self.mode {
            ComposeMode::ForwardSelecting(ids) => {
                if !ids.remove(&id) {
                    ids.insert(id);
                }
                if ids.is_empty() {
                    self.mode = ComposeMode::Idle;
                }
            }
            _ => {
                self.leave_mode();
                self.mode = ComposeMode::ForwardSelecting(BTreeSet::from([id]));
            }
        }
    }

    pub fn forward_selection(&self) -> Option<&BTreeSet<MessageId>> {
        match &self.mode {
            ComposeMode::ForwardSelecting(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn stage_attachment(&mut self, attachment: Attachment) {
        self.pending_attachment = Some(attachment);
    }

    pub fn clear_attachment(&mut self) {
        self.pending_attachment = None;
    }

    /// The command submitting the draft would issue
    pub fn submission(&self) -> Result<Submission, ValidationError> {
        match &self.mode {
            ComposeMode::Editing(target) => Ok(Submission::Edit {
                id: target.id.clone(),
                text: self.draft.clone(),
            }),
            ComposeMode::Replying(target) => Ok(Submission::Send {
                text: self.draft.clone(),
                reply_to: Some(target.id.clone()),
            }),
            ComposeMode::Idle => Ok(Submission::Send {
                text: self.draft.clone(),
                reply_to: None,
            }),
            ComposeMode::ForwardSelecting(_) => Err(ValidationError::NoTargets),
        }
    }

    /// A send or edit went out: back to Idle with an empty draft
    pub fn complete_submission(&mut self) {
        self.draft.clear();
        self.mode = ComposeMode::Idle;
        self.typing.clear();
    }

    /// A forward went out: back to Idle, the typed draft stays
    pub fn complete_forward(&mut self) {
        self.leave_mode();
    }

    /// Explicit cancel; always returns to Idle
    pub fn cancel(&mut self) {
        self.reset();
    }

    /// Unconditional reset to Idle with an empty draft
    pub fn reset(&mut self) {
        self.draft.clear();
        self.mode = ComposeMode::Idle;
        self.pending_attachment = None;
        self.typing.clear();
    }

    /// Force Idle before entering another mode
    ///
    /// A draft seeded by an edit does not carry over; a typed draft does.
    fn leave_mode(&mut self) {
        if matches!(self.mode, ComposeMode::Editing(_)) {
            self.draft.clear();
        }
        self.mode = ComposeMode::Idle;
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(Duration::seconds(1))
    }
}
