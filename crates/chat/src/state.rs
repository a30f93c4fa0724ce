//! Chat state coordinator
//!
//! Owns the session, the sync engine and the composer, and is the only
//! surface presentation code mutates. Nothing here performs I/O: commands
//! hand out tickets that the [`crate::ActionHandler`] executes.

use chrono::{Duration, Utc};
use log::debug;

use crate::compose::{Composer, Submission};
use crate::config::ChatConfig;
use crate::error::{CommandResult, ValidationError};
use crate::models::{
    Attachment, ConversationId, ConversationRef, Identity, LocalId, Message, MessageId,
};
use crate::session::{Scope, Session};
use crate::sync::{
    ForwardTicket, ListTicket, LoadState, OpTicket, PollOutcome, PollTicket, SendTicket,
    SyncEngine,
};

/// Network request behind a submitted draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitTicket {
    Send(SendTicket),
    Edit(OpTicket),
}

/// Read receipt to report for the active direct conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub username: String,
    pub peer: String,
}

/// Everything the client knows, behind one mutation surface
#[derive(Debug)]
pub struct ChatState {
    session: Session,
    engine: SyncEngine,
    /// Exists only while a conversation is selected
    composer: Option<Composer>,
    typing_timeout: Duration,
}

impl ChatState {
    pub fn new(max_in_flight_polls: usize, typing_timeout: Duration) -> Self {
        Self {
            session: Session::new(),
            engine: SyncEngine::new(max_in_flight_polls),
            composer: None,
            typing_timeout,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.max_in_flight_polls, config.typing_timeout())
    }

    // Session

    /// Install a freshly logged-in identity, tearing down any previous one
    pub fn sign_in(&mut self, identity: Identity) {
        if self.session.is_signed_in() {
            self.logout();
        }
        self.session.sign_in(identity);
    }

    /// Make `conversation` active
    ///
    /// The composer is Idle afterwards even when the conversation was already
    /// active; only then is nothing else touched and `false` returned.
    pub fn select_conversation(&mut self, conversation: ConversationRef) -> bool {
        let target = conversation.target();
        match self.session.select(conversation) {
            Some(scope) => {
                self.engine.start(scope, target);
                self.composer = Some(Composer::new(self.typing_timeout));
                true
            }
            None => {
                if let Some(composer) = self.composer.as_mut() {
                    composer.reset();
                }
                false
            }
        }
    }

    /// Select a conversation from the current list by id
    pub fn select_by_id(&mut self, id: &ConversationId) -> Option<bool> {
        let conversation = self.engine.conversation(id)?.clone();
        Some(self.select_conversation(conversation))
    }

    pub fn clear_selection(&mut self) -> bool {
        self.engine.stop();
        self.composer = None;
        self.session.clear_selection()
    }

    /// Single teardown point: identity, selection, list, engine and composer
    pub fn logout(&mut self) -> Option<Identity> {
        self.engine.reset();
        self.composer = None;
        self.session.logout()
    }

    fn username(&self) -> Result<String, ValidationError> {
        self.session
            .username()
            .map(str::to_string)
            .ok_or(ValidationError::NotSignedIn)
    }

    fn composer_mut(&mut self) -> Result<&mut Composer, ValidationError> {
        self.composer
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)
    }

    // Observable state

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn conversations(&self) -> &[ConversationRef] {
        self.engine.conversations()
    }

    pub fn active_conversation(&self) -> Option<&ConversationRef> {
        self.session.active()
    }

    pub fn scope(&self) -> Option<Scope> {
        self.session.scope()
    }

    pub fn messages(&self) -> &[Message] {
        self.engine.messages()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.engine.message(id)
    }

    pub fn load_state(&self) -> Option<&LoadState> {
        self.engine.load_state()
    }

    pub fn composer(&self) -> Option<&Composer> {
        self.composer.as_ref()
    }

    pub fn is_typing(&self) -> bool {
        self.composer
            .as_ref()
            .is_some_and(|c| c.is_typing(Utc::now()))
    }

    // Composition

    pub fn set_draft(&mut self, text: &str) -> Result<(), ValidationError> {
        self.composer_mut()?.set_draft(text, Utc::now());
        Ok(())
    }

    pub fn start_reply(&mut self, id: &MessageId) -> Result<(), ValidationError> {
        let composer = self
            .composer
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        let target = self.engine.lookup(id)?;
        if target.is_deleted {
            return Err(ValidationError::MessageDeleted(id.clone()));
        }
        composer.start_reply(target);
        Ok(())
    }

    pub fn start_edit(&mut self, id: &MessageId) -> Result<(), ValidationError> {
        let composer = self
            .composer
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        composer.start_edit(self.engine.lookup(id)?)
    }

    pub fn toggle_forward(&mut self, id: &MessageId) -> Result<(), ValidationError> {
        let composer = self
            .composer
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        self.engine.lookup(id)?;
        composer.toggle_forward(id.clone());
        Ok(())
    }

    pub fn cancel_compose(&mut self) {
        if let Some(composer) = self.composer.as_mut() {
            composer.cancel();
        }
    }

    // Read path

    pub fn begin_poll(&mut self) -> Option<PollTicket> {
        let username = self.session.username()?.to_string();
        self.engine.begin_poll(&username)
    }

    pub fn complete_poll(
        &mut self,
        ticket: &PollTicket,
        result: CommandResult<Vec<Message>>,
    ) -> PollOutcome {
        self.engine.complete_poll(ticket, result)
    }

    pub fn begin_list_refresh(&mut self) -> Option<ListTicket> {
        let username = self.session.username()?.to_string();
        Some(self.engine.begin_list_refresh(&username, self.session.epoch()))
    }

    pub fn list_refresh_due(&self, cooldown_secs: u64) -> bool {
        self.engine.list_refresh_due(cooldown_secs)
    }

    pub fn complete_list_refresh(
        &mut self,
        ticket: &ListTicket,
        result: CommandResult<Vec<ConversationRef>>,
    ) -> bool {
        let applied = self
            .engine
            .complete_list_refresh(ticket, self.session.epoch(), result);
        if applied
            && let Some(active_id) = self.session.active().map(|a| a.id.clone())
            && let Some(conversation) = self.engine.conversation(&active_id)
        {
            self.session.update_active(conversation);
        }
        applied
    }

    /// Mark the active direct conversation read locally
    pub fn mark_active_read(&mut self) -> Option<ReadReceipt> {
        let username = self.session.username()?.to_string();
        let peer = self.engine.mark_active_read()?;
        Some(ReadReceipt { username, peer })
    }

    // Write path

    pub fn begin_send(
        &mut self,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<SendTicket, ValidationError> {
        let username = self.username()?;
        self.engine.begin_send(&username, text, reply_to)
    }

    /// Submit the draft as a send, reply or edit
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, ValidationError> {
        let username = self.username()?;
        let submission = self
            .composer
            .as_ref()
            .ok_or(ValidationError::NoActiveConversation)?
            .submission()?;

        let ticket = match submission {
            Submission::Send { text, reply_to } => {
                SubmitTicket::Send(self.engine.begin_send(&username, &text, reply_to.as_ref())?)
            }
            Submission::Edit { id, text } => {
                SubmitTicket::Edit(self.engine.begin_edit(&username, &id, &text)?)
            }
        };
        self.composer_mut()?.complete_submission();
        Ok(ticket)
    }

    /// Stage an attachment and append it optimistically
    pub fn begin_upload(&mut self, attachment: Attachment) -> Result<SendTicket, ValidationError> {
        let username = self.username()?;
        self.composer_mut()?.stage_attachment(attachment.clone());
        let ticket = self.engine.begin_upload(&username, attachment);
        if ticket.is_err() {
            self.composer_mut()?.clear_attachment();
        }
        ticket
    }

    pub fn retry_send(&mut self, local_id: LocalId) -> Result<SendTicket, ValidationError> {
        self.engine.retry_send(local_id)
    }

    pub fn complete_send(&mut self, ticket: &SendTicket, result: CommandResult<Message>) -> bool {
        let settled = !matches!(&result, Err(err) if err.is_retryable());
        let applied = self.engine.complete_send(ticket, result);
        // A newer file may have been staged while this one uploaded
        if applied
            && settled
            && ticket.attachment.is_some()
            && let Some(composer) = self.composer.as_mut()
            && composer.pending_attachment() == ticket.attachment.as_ref()
        {
            composer.clear_attachment();
        }
        applied
    }

    /// Re-issue an edit, delete or reaction that failed in transit
    pub fn retry_op(&mut self, op_seq: u64) -> Result<OpTicket, ValidationError> {
        self.engine.retry_op(op_seq)
    }

    pub fn discard_op(&mut self, op_seq: u64) -> Result<(), ValidationError> {
        self.engine.discard_op(op_seq)
    }

    pub fn failed_op(&self, id: &MessageId) -> Option<u64> {
        self.engine.failed_op(id)
    }

    pub fn begin_edit(&mut self, id: &MessageId, text: &str) -> Result<OpTicket, ValidationError> {
        let username = self.username()?;
        self.engine.begin_edit(&username, id, text)
    }

    pub fn begin_delete(
        &mut self,
        id: &MessageId,
        for_everyone: bool,
    ) -> Result<OpTicket, ValidationError> {
        let username = self.username()?;
        self.engine.begin_delete(&username, id, for_everyone)
    }

    pub fn begin_react(&mut self, id: &MessageId, kind: &str) -> Result<OpTicket, ValidationError> {
        let username = self.username()?;
        self.engine.begin_react(&username, id, kind)
    }

    pub fn complete_op(&mut self, ticket: &OpTicket, result: CommandResult<()>) -> bool {
        self.engine.complete_op(ticket, result)
    }

    /// Forward the composer's selection to `targets`
    pub fn begin_forward(&mut self, targets: &[String]) -> Result<ForwardTicket, ValidationError> {
        let username = self.username()?;
        let ids: Vec<MessageId> = self
            .composer
            .as_ref()
            .ok_or(ValidationError::NoActiveConversation)?
            .forward_selection()
            .ok_or(ValidationError::EmptySelection)?
            .iter()
            .cloned()
            .collect();

        let ticket = self.engine.begin_forward(&username, &ids, targets)?;
        debug!("Forwarding {} messages to {:?}", ids.len(), ticket.targets);
        self.composer_mut()?.complete_forward();
        Ok(ticket)
    }

    /// Forward explicit messages without going through the composer
    pub fn begin_forward_messages(
        &self,
        ids: &[MessageId],
        targets: &[String],
    ) -> Result<ForwardTicket, ValidationError> {
        let username = self.username()?;
        self.engine.begin_forward(&username, ids, targets)
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}
