//! Action handler for chat commands
//!
//! Coordinates between the backend and the shared chat state.

use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::ChatBackend;
use crate::error::{CommandError, CommandResult, ValidationError};
use crate::models::{Attachment, ConversationRef, Identity, LocalId, MessageId};
use crate::state::{ChatState, SubmitTicket};
use crate::sync::{ForwardReport, ForwardTicket, OpCommand, OpTicket, PollOutcome, SendTicket};

/// Handler for chat actions
///
/// Every command runs in three steps:
/// 1. Validate and apply the optimistic change under the state lock
/// 2. Call the backend with the lock released
/// 3. Confirm or roll back under the lock
///
/// Results may arrive in any order; the state decides whether each one
/// still applies.
pub struct ActionHandler {
    backend: Arc<dyn ChatBackend>,
    state: Arc<Mutex<ChatState>>,
}

impl ActionHandler {
    /// Create a new action handler
    pub fn new(backend: Arc<dyn ChatBackend>, state: Arc<Mutex<ChatState>>) -> Self {
        Self { backend, state }
    }

    pub fn state(&self) -> &Arc<Mutex<ChatState>> {
        &self.state
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state under the lock
    ///
    /// For local-only changes such as composer edits and for reads.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Log in and load the conversation list
    pub fn login(&self, username: &str, password: &str) -> CommandResult<Identity> {
        let identity = self
            .backend
            .login(username, password)
            .map_err(CommandError::from_backend)?;
        self.lock().sign_in(identity.clone());

        if let Err(err) = self.refresh_conversations() {
            warn!("Initial conversation list failed: {err}");
        }
        Ok(identity)
    }

    pub fn logout(&self) -> Option<Identity> {
        self.lock().logout()
    }

    /// Select a conversation; returns whether the scope changed
    pub fn select(&self, conversation: ConversationRef) -> bool {
        self.lock().select_conversation(conversation)
    }

    pub fn clear_selection(&self) -> bool {
        self.lock().clear_selection()
    }

    /// Fetch the conversation list; returns whether it was applied
    pub fn refresh_conversations(&self) -> CommandResult<bool> {
        let Some(ticket) = self.lock().begin_list_refresh() else {
            return Err(ValidationError::NotSignedIn.into());
        };
        let result = self
            .backend
            .list_conversations(&ticket.username)
            .map_err(CommandError::from_backend);
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);

        let applied = self.lock().complete_list_refresh(&ticket, result);
        outcome.map(|()| applied)
    }

    /// Poll the active conversation once
    ///
    /// Returns `None` when nothing is selected or the in-flight limit is hit.
    pub fn poll(&self) -> Option<PollOutcome> {
        let ticket = self.lock().begin_poll()?;
        let result = self
            .backend
            .fetch_messages(&ticket.username, &ticket.target)
            .map_err(CommandError::from_backend);

        let (outcome, receipt) = {
            let mut state = self.lock();
            let outcome = state.complete_poll(&ticket, result);
            let receipt = if matches!(outcome, PollOutcome::Applied(_)) {
                state.mark_active_read()
            } else {
                None
            };
            (outcome, receipt)
        };

        if let Some(receipt) = receipt
            && let Err(err) = self.backend.mark_read(&receipt.username, &receipt.peer)
        {
            warn!("Failed to mark conversation with {} read: {err:#}", receipt.peer);
        }
        Some(outcome)
    }

    /// One refresh cycle: the active conversation, then the list when due
    pub fn tick(&self, list_cooldown_secs: u64) -> Option<PollOutcome> {
        let outcome = self.poll();
        let due = self.lock().list_refresh_due(list_cooldown_secs);
        if due && let Err(err) = self.refresh_conversations() {
            warn!("Conversation list refresh failed: {err}");
        }
        outcome
    }

    /// Send a text message to the active conversation
    pub fn send(&self, text: &str, reply_to: Option<&MessageId>) -> CommandResult<()> {
        let ticket = self.lock().begin_send(text, reply_to)?;
        self.run_send(ticket)
    }

    /// Submit the composer's draft as a send, reply or edit
    pub fn submit_draft(&self) -> CommandResult<()> {
        let ticket = self.lock().begin_submit()?;
        match ticket {
            SubmitTicket::Send(ticket) => self.run_send(ticket),
            SubmitTicket::Edit(ticket) => self.run_op(ticket),
        }
    }

    pub fn upload_media(&self, attachment: Attachment) -> CommandResult<()> {
        let ticket = self.lock().begin_upload(attachment)?;
        self.run_send(ticket)
    }

    /// Re-send a message that failed with a transient error
    pub fn retry_send(&self, local_id: LocalId) -> CommandResult<()> {
        let ticket = self.lock().retry_send(local_id)?;
        self.run_send(ticket)
    }

    /// Re-issue an edit, delete or reaction that failed with a transient error
    pub fn retry_op(&self, op_seq: u64) -> CommandResult<()> {
        let ticket = self.lock().retry_op(op_seq)?;
        self.run_op(ticket)
    }

    pub fn edit(&self, id: &MessageId, text: &str) -> CommandResult<()> {
        let ticket = self.lock().begin_edit(id, text)?;
        self.run_op(ticket)
    }

    pub fn delete(&self, id: &MessageId, for_everyone: bool) -> CommandResult<()> {
        let ticket = self.lock().begin_delete(id, for_everyone)?;
        self.run_op(ticket)
    }

    pub fn react(&self, id: &MessageId, kind: &str) -> CommandResult<()> {
        let ticket = self.lock().begin_react(id, kind)?;
        self.run_op(ticket)
    }

    /// Forward the composer's selection to each target
    pub fn forward_selected(&self, targets: &[String]) -> CommandResult<ForwardReport> {
        let ticket = self.lock().begin_forward(targets)?;
        Ok(self.run_forward(ticket))
    }

    /// Forward explicit messages to each target
    pub fn forward(&self, ids: &[MessageId], targets: &[String]) -> CommandResult<ForwardReport> {
        let ticket = self.lock().begin_forward_messages(ids, targets)?;
        Ok(self.run_forward(ticket))
    }

    fn run_send(&self, ticket: SendTicket) -> CommandResult<()> {
        let result = match &ticket.attachment {
            Some(attachment) => self.backend.upload_media(&ticket.request, attachment),
            None => self.backend.send_message(&ticket.request),
        }
        .map_err(CommandError::from_backend);
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);

        self.lock().complete_send(&ticket, result);
        outcome
    }

    fn run_op(&self, ticket: OpTicket) -> CommandResult<()> {
        let id = &ticket.message_id;
        let username = &ticket.username;
        let result = match &ticket.command {
            OpCommand::Edit { new_content } => {
                self.backend.edit_message(id, username, new_content)
            }
            OpCommand::Delete { for_everyone } => {
                self.backend.delete_message(id, username, *for_everyone)
            }
            OpCommand::React { kind } => self.backend.react_message(id, username, kind),
        }
        .map_err(CommandError::from_backend);

        self.lock().complete_op(&ticket, result.clone());
        result
    }

    /// One backend call per (message, target)
    ///
    /// A target succeeds only when every message reached it; failures for
    /// one target never affect another.
    fn run_forward(&self, ticket: ForwardTicket) -> ForwardReport {
        let mut report = ForwardReport::default();

        for target in &ticket.targets {
            let recipients = [target.clone()];
            let mut outcome: CommandResult<()> = Ok(());
            for id in &ticket.message_ids {
                if let Err(err) = self
                    .backend
                    .forward_message(id, &ticket.sender, &recipients)
                {
                    let err = CommandError::from_backend(err);
                    warn!("Forwarding {id} to {target} failed: {err}");
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
            }
            report.record(target.clone(), outcome);
        }

        info!(
            "Forwarded {} messages: {} of {} targets succeeded",
            ticket.message_ids.len(),
            report.succeeded().len(),
            ticket.targets.len()
        );
        report
    }
}
