//! Conversation sync engine
//!
//! Keeps the conversation list and the active conversation's messages.
//! The visible message sequence is rebuilt from three layers:
//!
//! 1. `base`: the last applied server snapshot, plus carried tombstones and
//!    folded confirmations
//! 2. `sends`: optimistic sends and uploads not yet seen in a snapshot
//! 3. `ops`: in-flight edits, deletes and reactions
//!
//! Confirming a command folds its effect into `base` so nothing flickers
//! before the next snapshot. A rejected command drops its overlay; one that
//! failed in transit keeps it, marked failed, until it is retried or
//! discarded.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use super::tickets::{
    ForwardTicket, ListTicket, LoadState, OpCommand, OpTicket, PollOutcome, PollTicket,
    SendTicket, SnapshotStats,
};
use super::timing::cooldown_elapsed;
use crate::api::SendRequest;
use crate::error::{CommandResult, ValidationError};
use crate::models::{
    Attachment, ConversationId, ConversationRef, ConversationTarget, Delivery, LocalId, Message,
    MessageId, MessageKind, ReplyPreview, SyncCursor,
};
use crate::session::Scope;

/// Local effect of a pending mutation
///
/// Effects are absolute so applying one twice, or on top of a snapshot that
/// already contains it, changes nothing.
#[derive(Debug, Clone)]
enum Effect {
    Edit { content: String, at: DateTime<Utc> },
    Delete { for_everyone: bool },
    SetReaction { user: String, kind: Option<String> },
}

impl Effect {
    fn apply(&self, msg: &mut Message) {
        match self {
            Self::Edit { content, at } => msg.apply_edit(content, *at),
            Self::Delete { for_everyone } => msg.tombstone(*for_everyone),
            Self::SetReaction { user, kind } => msg.set_reaction(user, kind.clone()),
        }
    }
}

#[derive(Debug)]
struct PendingOp {
    op_seq: u64,
    message_id: MessageId,
    effect: Effect,
    username: String,
    command: OpCommand,
    /// Reason of the last transient failure; cleared on retry
    failure: Option<String>,
}

#[derive(Debug)]
struct PendingSend {
    local_id: LocalId,
    request: SendRequest,
    attachment: Option<Attachment>,
    /// The placeholder until confirmed, then the server's message
    message: Message,
    server_id: Option<MessageId>,
}

#[derive(Debug)]
struct ActiveConversation {
    scope: Scope,
    target: ConversationTarget,
    cursor: SyncCursor,
    load_state: LoadState,
    base: Vec<Message>,
    /// Every message seen deleted in this scope, by id
    ///
    /// Never pruned while the scope lives: a message deleted for the user
    /// alone disappears from later snapshots and is only kept visible from
    /// here. The map is dropped with the scope on the next selection.
    tombstones: HashMap<MessageId, Message>,
    sends: Vec<PendingSend>,
    ops: Vec<PendingOp>,
    in_flight_polls: HashSet<u64>,
    view: Vec<Message>,
}

impl ActiveConversation {
    fn new(scope: Scope, target: ConversationTarget) -> Self {
        Self {
            cursor: SyncCursor::new(scope.conversation_id.clone()),
            scope,
            target,
            load_state: LoadState::Loading,
            base: Vec::new(),
            tombstones: HashMap::new(),
            sends: Vec::new(),
            ops: Vec::new(),
            in_flight_polls: HashSet::new(),
            view: Vec::new(),
        }
    }

    /// A message commands may target
    fn lookup(&self, id: &MessageId) -> Result<&Message, ValidationError> {
        if self
            .sends
            .iter()
            .any(|s| s.server_id.is_none() && &s.message.id == id)
        {
            return Err(ValidationError::Unconfirmed(id.clone()));
        }
        self.view
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))
    }

    fn apply_snapshot(&mut self, seq: u64, snapshot: Vec<Message>) -> SnapshotStats {
        let mut base = snapshot;
        base.sort_by_key(|m| m.created_at);
        let mut stats = SnapshotStats {
            received: base.len(),
            ..Default::default()
        };

        for msg in base.iter().filter(|m| m.is_deleted) {
            self.tombstones.insert(msg.id.clone(), msg.clone());
        }

        let mut tombstones: Vec<&Message> = self.tombstones.values().collect();
        tombstones.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        for tomb in tombstones {
            match base.iter_mut().find(|m| m.id == tomb.id) {
                Some(msg) => {
                    if !msg.is_deleted {
                        msg.tombstone(tomb.deleted_for_everyone);
                    }
                }
                None => {
                    let pos = base.partition_point(|m| m.created_at <= tomb.created_at);
                    base.insert(pos, tomb.clone());
                    stats.tombstones_carried += 1;
                }
            }
        }

        let ids: HashSet<&MessageId> = base.iter().map(|m| &m.id).collect();
        let before = self.sends.len();
        self.sends
            .retain(|s| !s.server_id.as_ref().is_some_and(|id| ids.contains(id)));
        stats.sends_reconciled = before - self.sends.len();

        self.base = base;
        self.cursor.advance(seq);
        self.load_state = LoadState::Ready;
        self.rebuild_view();
        stats
    }

    /// Make a confirmed effect part of the base state
    fn fold(&mut self, message_id: &MessageId, effect: &Effect) {
        let target = self
            .base
            .iter_mut()
            .chain(
                self.sends
                    .iter_mut()
                    .filter(|s| s.server_id.is_some())
                    .map(|s| &mut s.message),
            )
            .find(|m| &m.id == message_id);

        if let Some(msg) = target {
            effect.apply(msg);
            if msg.is_deleted {
                self.tombstones.insert(msg.id.clone(), msg.clone());
            }
        }
    }

    /// Base, then sends by creation time, then op overlays
    ///
    /// Sends created at the same instant as a base message go after it, and
    /// keep their issue order among themselves.
    fn rebuild_view(&mut self) {
        let mut view = self.base.clone();
        for send in &self.sends {
            let pos = view.partition_point(|m| m.created_at <= send.message.created_at);
            view.insert(pos, send.message.clone());
        }

        for op in &self.ops {
            if let Some(msg) = view.iter_mut().find(|m| m.id == op.message_id) {
                op.effect.apply(msg);
                msg.delivery = match &op.failure {
                    Some(reason) => Delivery::Failed(reason.clone()),
                    None => Delivery::Pending,
                };
            }
        }
        self.view = view;
    }
}

/// The active conversation, if `scope` is still current
fn current<'a>(
    active: &'a mut Option<ActiveConversation>,
    scope: &Scope,
) -> Option<&'a mut ActiveConversation> {
    active.as_mut().filter(|a| &a.scope == scope)
}

/// Authoritative local state of the conversation list and the active conversation
///
/// Pure state: every network interaction is split into a `begin_*` call that
/// returns a ticket and a `complete_*` call that applies the result.
#[derive(Debug)]
pub struct SyncEngine {
    /// Shared by poll requests and local mutations
    seq: u64,
    next_local: u64,
    max_in_flight_polls: usize,
    conversations: Vec<ConversationRef>,
    list_applied_seq: u64,
    list_refreshed_at: Option<DateTime<Utc>>,
    active: Option<ActiveConversation>,
}

impl SyncEngine {
    pub fn new(max_in_flight_polls: usize) -> Self {
        Self {
            seq: 0,
            next_local: 0,
            max_in_flight_polls: max_in_flight_polls.max(1),
            conversations: Vec::new(),
            list_applied_seq: 0,
            list_refreshed_at: None,
            active: None,
        }
    }

    /// Start the scoped cycle for a newly selected conversation
    pub fn start(&mut self, scope: Scope, target: ConversationTarget) {
        info!(
            "Starting sync for {} (generation {})",
            scope.conversation_id, scope.generation
        );
        self.active = Some(ActiveConversation::new(scope, target));
    }

    /// Stop the scoped cycle; late results are dropped
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Stopped sync for {}", active.scope.conversation_id);
        }
    }

    /// Drop everything, including the conversation list
    pub fn reset(&mut self) {
        self.stop();
        self.conversations.clear();
        self.list_refreshed_at = None;
    }

    pub fn conversations(&self) -> &[ConversationRef] {
        &self.conversations
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&ConversationRef> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn active_scope(&self) -> Option<&Scope> {
        self.active.as_ref().map(|a| &a.scope)
    }

    /// Ordered messages of the active conversation, overlays applied
    pub fn messages(&self) -> &[Message] {
        self.active.as_ref().map_or(&[], |a| a.view.as_slice())
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages().iter().find(|m| &m.id == id)
    }

    /// A message of the active conversation that commands may target
    pub fn lookup(&self, id: &MessageId) -> Result<&Message, ValidationError> {
        self.active
            .as_ref()
            .ok_or(ValidationError::NoActiveConversation)?
            .lookup(id)
    }

    pub fn load_state(&self) -> Option<&LoadState> {
        self.active.as_ref().map(|a| &a.load_state)
    }

    pub fn cursor(&self) -> Option<&SyncCursor> {
        self.active.as_ref().map(|a| &a.cursor)
    }

    pub fn in_flight_polls(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.in_flight_polls.len())
    }

    /// Whether the conversation list is older than `cooldown_secs`
    pub fn list_refresh_due(&self, cooldown_secs: u64) -> bool {
        cooldown_elapsed(self.list_refreshed_at, cooldown_secs, Utc::now())
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn next_local_id(&mut self) -> LocalId {
        self.next_local += 1;
        LocalId(self.next_local)
    }

    // Read path

    /// Issue a snapshot request for the active conversation
    ///
    /// Returns `None` when nothing is selected or too many polls are in flight.
    pub fn begin_poll(&mut self, username: &str) -> Option<PollTicket> {
        let in_flight = self.active.as_ref()?.in_flight_polls.len();
        if in_flight >= self.max_in_flight_polls {
            debug!("Skipping poll, {in_flight} already in flight");
            return None;
        }

        let seq = self.next_seq();
        let active = self.active.as_mut()?;
        active.in_flight_polls.insert(seq);
        Some(PollTicket {
            scope: active.scope.clone(),
            seq,
            username: username.to_string(),
            target: active.target.clone(),
        })
    }

    /// Apply a snapshot if it is still in scope and newer than local state
    pub fn complete_poll(
        &mut self,
        ticket: &PollTicket,
        result: CommandResult<Vec<Message>>,
    ) -> PollOutcome {
        let Some(active) = current(&mut self.active, &ticket.scope) else {
            debug!(
                "Dropping poll {} for {}: selection changed",
                ticket.seq, ticket.scope.conversation_id
            );
            return PollOutcome::OutOfScope;
        };
        active.in_flight_polls.remove(&ticket.seq);

        match result {
            Err(err) => {
                warn!(
                    "Poll of {} failed: {}",
                    active.scope.conversation_id, err
                );
                if !active.cursor.has_snapshot() {
                    active.load_state = LoadState::Failed(err.to_string());
                }
                PollOutcome::Failed
            }
            Ok(_) if !active.cursor.accepts(ticket.seq) => {
                debug!(
                    "Discarding stale snapshot {} (applied {}, floor {})",
                    ticket.seq, active.cursor.applied_seq, active.cursor.floor_seq
                );
                PollOutcome::Stale
            }
            Ok(snapshot) => {
                let stats = active.apply_snapshot(ticket.seq, snapshot);
                debug!(
                    "Applied snapshot {} for {}: {:?}",
                    ticket.seq, active.scope.conversation_id, stats
                );
                PollOutcome::Applied(stats)
            }
        }
    }

    pub fn begin_list_refresh(&mut self, username: &str, epoch: u64) -> ListTicket {
        ListTicket {
            epoch,
            seq: self.next_seq(),
            username: username.to_string(),
        }
    }

    /// Replace the conversation list; returns whether it was applied
    pub fn complete_list_refresh(
        &mut self,
        ticket: &ListTicket,
        current_epoch: u64,
        result: CommandResult<Vec<ConversationRef>>,
    ) -> bool {
        if ticket.epoch != current_epoch {
            debug!("Dropping conversation list from epoch {}", ticket.epoch);
            return false;
        }
        let mut list = match result {
            Ok(list) => list,
            Err(err) => {
                warn!("Conversation list refresh failed: {err}");
                return false;
            }
        };
        if ticket.seq <= self.list_applied_seq {
            debug!("Discarding stale conversation list {}", ticket.seq);
            return false;
        }

        let mut seen = HashSet::new();
        list.retain(|c| seen.insert(c.id.clone()));

        self.list_applied_seq = ticket.seq;
        self.list_refreshed_at = Some(Utc::now());
        self.conversations = list;
        true
    }

    /// Mark incoming messages of the active direct conversation read
    ///
    /// Returns the peer to report to the server when anything was unread.
    pub fn mark_active_read(&mut self) -> Option<String> {
        let active = self.active.as_mut()?;
        let ConversationTarget::Direct(peer) = &active.target else {
            return None;
        };
        let peer = peer.clone();

        let mut changed = false;
        for msg in active.base.iter_mut().filter(|m| !m.is_mine && !m.is_read) {
            msg.is_read = true;
            changed = true;
        }
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == active.scope.conversation_id)
            && conv.unread_count > 0
        {
            conv.unread_count = 0;
            changed = true;
        }

        if changed {
            active.rebuild_view();
        }
        changed.then_some(peer)
    }

    // Write path

    /// Append an optimistic text message
    pub fn begin_send(
        &mut self,
        username: &str,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<SendTicket, ValidationError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let active = self
            .active
            .as_ref()
            .ok_or(ValidationError::NoActiveConversation)?;

        let reply_preview = match reply_to {
            Some(id) => {
                let target = active.lookup(id)?;
                if target.is_deleted {
                    return Err(ValidationError::MessageDeleted(id.clone()));
                }
                Some(ReplyPreview {
                    sender: target.sender.clone(),
                    content: target.content.clone(),
                })
            }
            None => None,
        };

        let request = SendRequest {
            sender: username.to_string(),
            target: active.target.clone(),
            content: content.to_string(),
            kind: MessageKind::Text,
            reply_to: reply_to.cloned(),
        };
        self.push_send(request, None, None, reply_preview)
    }

    /// Append an optimistic media message pointing at a local reference
    pub fn begin_upload(
        &mut self,
        username: &str,
        attachment: Attachment,
    ) -> Result<SendTicket, ValidationError> {
        if attachment.bytes.is_empty() {
            return Err(ValidationError::EmptyAttachment(attachment.file_name));
        }
        let target = self
            .active
            .as_ref()
            .ok_or(ValidationError::NoActiveConversation)?
            .target
            .clone();

        let request = SendRequest {
            sender: username.to_string(),
            target,
            content: String::new(),
            kind: attachment.kind,
            reply_to: None,
        };
        self.push_send(request, Some(attachment), None, None)
    }

    fn push_send(
        &mut self,
        request: SendRequest,
        attachment: Option<Attachment>,
        created_at: Option<DateTime<Utc>>,
        reply_preview: Option<ReplyPreview>,
    ) -> Result<SendTicket, ValidationError> {
        let local_id = self.next_local_id();
        let active = self
            .active
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;

        let mut message = Message::builder(local_id.message_id(), active.scope.conversation_id.clone())
            .sender(request.sender.clone())
            .content(request.content.clone())
            .kind(request.kind)
            .media_url(attachment.as_ref().map(|a| a.local_url(local_id)))
            .created_at(created_at.unwrap_or_else(Utc::now))
            .reply_to(request.reply_to.clone())
            .reply_preview(reply_preview)
            .mine(true)
            .build();
        message.delivery = Delivery::Pending;
        message.local_id = Some(local_id);

        debug!("Optimistic message {} in {}", local_id, active.scope.conversation_id);
        active.sends.push(PendingSend {
            local_id,
            request: request.clone(),
            attachment: attachment.clone(),
            message,
            server_id: None,
        });
        active.rebuild_view();

        Ok(SendTicket {
            scope: active.scope.clone(),
            local_id,
            request,
            attachment,
        })
    }

    /// Re-issue a send that failed with a transient error
    pub fn retry_send(&mut self, local_id: LocalId) -> Result<SendTicket, ValidationError> {
        let active = self
            .active
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        let send = active
            .sends
            .iter_mut()
            .find(|s| s.local_id == local_id && matches!(s.message.delivery, Delivery::Failed(_)))
            .ok_or_else(|| ValidationError::NothingToRetry(local_id.to_string()))?;

        info!("Retrying message {local_id}");
        send.message.delivery = Delivery::Pending;
        let ticket = SendTicket {
            scope: active.scope.clone(),
            local_id,
            request: send.request.clone(),
            attachment: send.attachment.clone(),
        };
        active.rebuild_view();
        Ok(ticket)
    }

    /// Record the outcome of a send or upload; returns whether it applied
    ///
    /// Transient failures leave the entry marked failed for a retry. A
    /// rejection removes it.
    pub fn complete_send(&mut self, ticket: &SendTicket, result: CommandResult<Message>) -> bool {
        let Some(active) = current(&mut self.active, &ticket.scope) else {
            debug!(
                "Dropping result of {} for {}: selection changed",
                ticket.local_id, ticket.scope.conversation_id
            );
            return false;
        };
        let Some(idx) = active.sends.iter().position(|s| s.local_id == ticket.local_id) else {
            return false;
        };

        match result {
            Ok(mut message) => {
                info!("Message {} confirmed as {}", ticket.local_id, message.id);
                message.conversation_id = active.scope.conversation_id.clone();
                message.local_id = Some(ticket.local_id);
                message.delivery = Delivery::Confirmed;
                if active.base.iter().any(|m| m.id == message.id) {
                    active.sends.remove(idx);
                } else {
                    let send = &mut active.sends[idx];
                    send.server_id = Some(message.id.clone());
                    send.message = message;
                }
            }
            Err(err) if err.is_retryable() => {
                warn!("Message {} failed to send: {}", ticket.local_id, err);
                active.sends[idx].message.delivery = Delivery::Failed(err.to_string());
            }
            Err(err) => {
                warn!("Message {} rejected: {}", ticket.local_id, err);
                active.sends.remove(idx);
            }
        }
        active.rebuild_view();
        true
    }

    /// Optimistically replace the content of one of the user's messages
    pub fn begin_edit(
        &mut self,
        username: &str,
        id: &MessageId,
        text: &str,
    ) -> Result<OpTicket, ValidationError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let msg = self.lookup(id)?;
        if !msg.is_mine {
            return Err(ValidationError::NotOwner(id.clone()));
        }
        if msg.is_deleted {
            return Err(ValidationError::MessageDeleted(id.clone()));
        }

        self.push_op(
            username,
            id,
            Effect::Edit {
                content: content.to_string(),
                at: Utc::now(),
            },
            OpCommand::Edit {
                new_content: content.to_string(),
            },
        )
    }

    /// Optimistically tombstone a message
    pub fn begin_delete(
        &mut self,
        username: &str,
        id: &MessageId,
        for_everyone: bool,
    ) -> Result<OpTicket, ValidationError> {
        let msg = self.lookup(id)?;
        if msg.is_deleted {
            return Err(ValidationError::MessageDeleted(id.clone()));
        }
        if for_everyone && !msg.is_mine {
            return Err(ValidationError::NotOwner(id.clone()));
        }

        self.push_op(
            username,
            id,
            Effect::Delete { for_everyone },
            OpCommand::Delete { for_everyone },
        )
    }

    /// Optimistically set the user's single reaction on a message
    ///
    /// Reacting with the kind already held removes it.
    pub fn begin_react(
        &mut self,
        username: &str,
        id: &MessageId,
        kind: &str,
    ) -> Result<OpTicket, ValidationError> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(ValidationError::EmptyReaction);
        }
        let msg = self.lookup(id)?;
        if msg.is_deleted {
            return Err(ValidationError::MessageDeleted(id.clone()));
        }
        let next = (msg.reaction_of(username) != Some(kind)).then(|| kind.to_string());

        self.push_op(
            username,
            id,
            Effect::SetReaction {
                user: username.to_string(),
                kind: next,
            },
            OpCommand::React {
                kind: kind.to_string(),
            },
        )
    }

    fn push_op(
        &mut self,
        username: &str,
        message_id: &MessageId,
        effect: Effect,
        command: OpCommand,
    ) -> Result<OpTicket, ValidationError> {
        let op_seq = self.next_seq();
        let active = self
            .active
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;

        // Snapshots requested before this point cannot contain the change
        active.cursor.raise_floor(op_seq);
        active.ops.push(PendingOp {
            op_seq,
            message_id: message_id.clone(),
            effect,
            username: username.to_string(),
            command: command.clone(),
            failure: None,
        });
        active.rebuild_view();

        Ok(OpTicket {
            scope: active.scope.clone(),
            op_seq,
            message_id: message_id.clone(),
            username: username.to_string(),
            command,
        })
    }

    /// Settle a mutation; returns whether it applied
    ///
    /// Success folds the effect into the base and a rejection rolls it back.
    /// A transient failure keeps the overlay, marked failed, for
    /// [`Self::retry_op`] or [`Self::discard_op`].
    pub fn complete_op(&mut self, ticket: &OpTicket, result: CommandResult<()>) -> bool {
        let latest = self.seq;
        let Some(active) = current(&mut self.active, &ticket.scope) else {
            debug!(
                "Dropping result of op {} on {}: selection changed",
                ticket.op_seq, ticket.message_id
            );
            return false;
        };
        let Some(idx) = active.ops.iter().position(|op| op.op_seq == ticket.op_seq) else {
            return false;
        };

        match result {
            Ok(()) => {
                debug!("Confirmed {:?} on {}", ticket.command, ticket.message_id);
                let op = active.ops.remove(idx);
                active.fold(&op.message_id, &op.effect);
                // Polls issued while the op was in flight may predate it on the server
                active.cursor.raise_floor(latest);
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    "{:?} on {} failed, kept for retry: {}",
                    ticket.command, ticket.message_id, err
                );
                active.ops[idx].failure = Some(err.to_string());
            }
            Err(err) => {
                warn!(
                    "Rolled back {:?} on {}: {}",
                    ticket.command, ticket.message_id, err
                );
                active.ops.remove(idx);
            }
        }
        active.rebuild_view();
        true
    }

    /// The most recent failed mutation on `id`, by op sequence
    pub fn failed_op(&self, id: &MessageId) -> Option<u64> {
        self.active
            .as_ref()?
            .ops
            .iter()
            .rev()
            .find(|op| &op.message_id == id && op.failure.is_some())
            .map(|op| op.op_seq)
    }

    /// Re-issue a mutation that failed with a transient error
    pub fn retry_op(&mut self, op_seq: u64) -> Result<OpTicket, ValidationError> {
        let attempt = self.next_seq();
        let active = self
            .active
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        let op = active
            .ops
            .iter_mut()
            .find(|op| op.op_seq == op_seq && op.failure.is_some())
            .ok_or(ValidationError::NoFailedChange(op_seq))?;

        info!("Retrying {:?} on {}", op.command, op.message_id);
        op.failure = None;
        let ticket = OpTicket {
            scope: active.scope.clone(),
            op_seq,
            message_id: op.message_id.clone(),
            username: op.username.clone(),
            command: op.command.clone(),
        };
        active.cursor.raise_floor(attempt);
        active.rebuild_view();
        Ok(ticket)
    }

    /// Give up on a failed mutation and roll its overlay back
    pub fn discard_op(&mut self, op_seq: u64) -> Result<(), ValidationError> {
        let active = self
            .active
            .as_mut()
            .ok_or(ValidationError::NoActiveConversation)?;
        let idx = active
            .ops
            .iter()
            .position(|op| op.op_seq == op_seq && op.failure.is_some())
            .ok_or(ValidationError::NoFailedChange(op_seq))?;

        let op = active.ops.remove(idx);
        info!("Discarded {:?} on {}", op.command, op.message_id);
        active.rebuild_view();
        Ok(())
    }

    /// Validate a forward of messages from the active conversation
    pub fn begin_forward(
        &self,
        sender: &str,
        message_ids: &[MessageId],
        targets: &[String],
    ) -> Result<ForwardTicket, ValidationError> {
        if message_ids.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        let mut seen = HashSet::new();
        let targets: Vec<String> = targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        if targets.is_empty() {
            return Err(ValidationError::NoTargets);
        }

        for id in message_ids {
            if self.lookup(id)?.is_deleted {
                return Err(ValidationError::MessageDeleted(id.clone()));
            }
        }

        Ok(ForwardTicket {
            sender: sender.to_string(),
            message_ids: message_ids.to_vec(),
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use chrono::Duration;

    fn scope(generation: u64, conv: &str) -> Scope {
        Scope {
            generation,
            conversation_id: ConversationId::direct(conv),
        }
    }

    fn engine_with_bob() -> SyncEngine {
        let mut engine = SyncEngine::new(2);
        engine.start(scope(1, "bob"), ConversationTarget::Direct("bob".to_string()));
        engine
    }

    fn msg(id: &str, sender: &str, minutes: i64) -> Message {
        let base = DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000);
        Message::builder(MessageId::new(id), ConversationId::direct("bob"))
            .sender(sender)
            .content(format!("text {id}"))
            .created_at(base + Duration::minutes(minutes))
            .mine(sender == "alice")
            .build()
    }

    fn snapshot() -> Vec<Message> {
        vec![msg("1", "bob", 0), msg("2", "alice", 1), msg("3", "bob", 2)]
    }

    fn load(engine: &mut SyncEngine, messages: Vec<Message>) -> PollOutcome {
        let ticket = engine.begin_poll("alice").unwrap();
        engine.complete_poll(&ticket, Ok(messages))
    }

    fn ids(engine: &SyncEngine) -> Vec<&str> {
        engine.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_snapshot_discarded() {
        let mut engine = engine_with_bob();
        let older = engine.begin_poll("alice").unwrap();
        let newer = engine.begin_poll("alice").unwrap();

        let mut fresh = snapshot();
        fresh.push(msg("4", "bob", 3));
        assert!(matches!(engine.complete_poll(&newer, Ok(fresh)), PollOutcome::Applied(_)));
        assert_eq!(engine.complete_poll(&older, Ok(snapshot())), PollOutcome::Stale);

        assert_eq!(ids(&engine), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_in_flight_poll_limit() {
        let mut engine = engine_with_bob();
        let first = engine.begin_poll("alice").unwrap();
        let _second = engine.begin_poll("alice").unwrap();
        assert!(engine.begin_poll("alice").is_none());

        engine.complete_poll(&first, Err(CommandError::Network("timeout".to_string())));
        assert!(engine.begin_poll("alice").is_some());
    }

    #[test]
    fn test_initial_load_failure_exposes_error() {
        let mut engine = engine_with_bob();
        let ticket = engine.begin_poll("alice").unwrap();
        let outcome =
            engine.complete_poll(&ticket, Err(CommandError::Network("refused".to_string())));

        assert_eq!(outcome, PollOutcome::Failed);
        assert!(matches!(engine.load_state(), Some(LoadState::Failed(_))));
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_later_failure_keeps_last_good_snapshot() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let ticket = engine.begin_poll("alice").unwrap();
        engine.complete_poll(&ticket, Err(CommandError::Network("refused".to_string())));

        assert_eq!(engine.load_state(), Some(&LoadState::Ready));
        assert_eq!(engine.messages().len(), 3);
    }

    #[test]
    fn test_results_from_old_scope_dropped() {
        let mut engine = engine_with_bob();
        let ticket = engine.begin_poll("alice").unwrap();
        engine.start(scope(2, "carol"), ConversationTarget::Direct("carol".to_string()));

        assert_eq!(engine.complete_poll(&ticket, Ok(snapshot())), PollOutcome::OutOfScope);
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_blank_send_rejected() {
        let mut engine = engine_with_bob();
        assert_eq!(
            engine.begin_send("alice", "   ", None),
            Err(ValidationError::EmptyContent)
        );
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_send_reconciled_by_server_id() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());

        let ticket = engine.begin_send("alice", " hello ", None).unwrap();
        let optimistic = engine.messages().last().unwrap();
        assert_eq!(optimistic.delivery, Delivery::Pending);
        assert_eq!(optimistic.content, "hello");
        assert!(optimistic.is_mine);

        let server = msg("10", "alice", 5);
        assert!(engine.complete_send(&ticket, Ok(server.clone())));
        let confirmed = engine.messages().last().unwrap();
        assert_eq!(confirmed.id.as_str(), "10");
        assert_eq!(confirmed.local_id, Some(ticket.local_id));

        let mut next = snapshot();
        next.push(server);
        load(&mut engine, next);
        assert_eq!(ids(&engine), vec!["1", "2", "3", "10"]);
        assert!(engine.messages().iter().all(|m| !m.is_optimistic()));
    }

    #[test]
    fn test_duplicate_text_not_merged() {
        let mut engine = engine_with_bob();
        let mut existing = snapshot();
        existing.push(msg("4", "alice", 3));
        existing[3].content = "hello".to_string();
        load(&mut engine, existing.clone());

        engine.begin_send("alice", "hello", None).unwrap();
        load(&mut engine, existing);
        assert_eq!(
            engine.messages().iter().filter(|m| m.content == "hello").count(),
            2
        );
    }

    #[test]
    fn test_failed_send_kept_and_retried() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let ticket = engine.begin_send("alice", "hello", None).unwrap();
        engine.complete_send(&ticket, Err(CommandError::Network("timeout".to_string())));

        let failed = engine.messages().last().unwrap();
        assert!(matches!(failed.delivery, Delivery::Failed(_)));

        // a snapshot without it keeps the failed entry visible
        load(&mut engine, snapshot());
        assert_eq!(engine.messages().len(), 4);

        let retry = engine.retry_send(ticket.local_id).unwrap();
        assert_eq!(retry.request.content, "hello");
        assert_eq!(engine.messages().last().unwrap().delivery, Delivery::Pending);
        assert!(engine.retry_send(ticket.local_id).is_err());
    }

    #[test]
    fn test_rejected_send_reverted() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let ticket = engine.begin_send("alice", "hello", None).unwrap();
        engine.complete_send(
            &ticket,
            Err(CommandError::ServerRejected {
                status: 403,
                message: "Blocked".to_string(),
            }),
        );
        assert_eq!(ids(&engine), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_edit_requires_ownership_and_confirmation() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());

        assert_eq!(
            engine.begin_edit("alice", &MessageId::new("1"), "mine now"),
            Err(ValidationError::NotOwner(MessageId::new("1")))
        );

        let ticket = engine.begin_send("alice", "draft", None).unwrap();
        let local = ticket.local_id.message_id();
        assert_eq!(
            engine.begin_edit("alice", &local, "changed"),
            Err(ValidationError::Unconfirmed(local.clone()))
        );
    }

    #[test]
    fn test_edit_confirmed_without_flicker() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("2");

        let before_edit = engine.begin_poll("alice").unwrap();
        let ticket = engine.begin_edit("alice", &id, "fixed").unwrap();
        assert_eq!(engine.message(&id).unwrap().content, "fixed");
        assert_eq!(engine.message(&id).unwrap().delivery, Delivery::Pending);

        // a snapshot requested before the edit cannot clobber it
        assert_eq!(engine.complete_poll(&before_edit, Ok(snapshot())), PollOutcome::Stale);

        let during = engine.begin_poll("alice").unwrap();
        engine.complete_op(&ticket, Ok(()));
        assert_eq!(engine.message(&id).unwrap().content, "fixed");
        assert_eq!(engine.message(&id).unwrap().delivery, Delivery::Confirmed);
        assert_eq!(engine.complete_poll(&during, Ok(snapshot())), PollOutcome::Stale);
        assert_eq!(engine.message(&id).unwrap().content, "fixed");
    }

    #[test]
    fn test_failed_edit_rolls_back() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("2");

        let ticket = engine.begin_edit("alice", &id, "fixed").unwrap();
        engine.complete_op(
            &ticket,
            Err(CommandError::ServerRejected {
                status: 403,
                message: "Edit window closed".to_string(),
            }),
        );
        assert_eq!(engine.message(&id).unwrap().content, "text 2");
        assert!(engine.message(&id).unwrap().edited_at.is_none());
    }

    #[test]
    fn test_edit_lost_in_transit_kept_for_retry() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("2");

        let ticket = engine.begin_edit("alice", &id, "fixed").unwrap();
        engine.complete_op(&ticket, Err(CommandError::Network("timeout".to_string())));
        let shown = engine.message(&id).unwrap();
        assert_eq!(shown.content, "fixed");
        assert!(matches!(shown.delivery, Delivery::Failed(_)));
        assert_eq!(engine.failed_op(&id), Some(ticket.op_seq));

        // a poll issued before the retry cannot clobber the overlay
        let stale = engine.begin_poll("alice").unwrap();
        let retry = engine.retry_op(ticket.op_seq).unwrap();
        assert_eq!(retry.op_seq, ticket.op_seq);
        assert_eq!(retry.command, ticket.command);
        assert_eq!(engine.message(&id).unwrap().delivery, Delivery::Pending);
        assert_eq!(engine.complete_poll(&stale, Ok(snapshot())), PollOutcome::Stale);

        engine.complete_op(&retry, Ok(()));
        assert_eq!(engine.message(&id).unwrap().content, "fixed");
        assert_eq!(engine.message(&id).unwrap().delivery, Delivery::Confirmed);
        assert_eq!(engine.failed_op(&id), None);
    }

    #[test]
    fn test_discard_failed_edit() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("2");

        let ticket = engine.begin_edit("alice", &id, "fixed").unwrap();
        assert_eq!(
            engine.discard_op(ticket.op_seq),
            Err(ValidationError::NoFailedChange(ticket.op_seq))
        );
        engine.complete_op(&ticket, Err(CommandError::Network("timeout".to_string())));

        engine.discard_op(ticket.op_seq).unwrap();
        assert_eq!(engine.message(&id).unwrap().content, "text 2");
        assert_eq!(engine.message(&id).unwrap().delivery, Delivery::Confirmed);
        assert!(engine.retry_op(ticket.op_seq).is_err());
    }

    #[test]
    fn test_pending_send_ordered_among_newer_server_messages() {
        let mut engine = engine_with_bob();
        let now = Utc::now();
        let earlier = Message::builder(MessageId::new("1"), ConversationId::direct("bob"))
            .sender("bob")
            .created_at(now - Duration::minutes(5))
            .build();
        load(&mut engine, vec![earlier.clone()]);

        let ticket = engine.begin_send("alice", "hello", None).unwrap();
        let later = Message::builder(MessageId::new("3"), ConversationId::direct("bob"))
            .sender("bob")
            .created_at(now + Duration::minutes(1))
            .build();
        load(&mut engine, vec![earlier, later]);

        let local = ticket.local_id.message_id();
        assert_eq!(ids(&engine), vec!["1", local.as_str(), "3"]);
    }

    #[test]
    fn test_delete_for_me_forgotten_with_scope() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("1");

        let ticket = engine.begin_delete("alice", &id, false).unwrap();
        engine.complete_op(&ticket, Ok(()));
        let mut hidden = snapshot();
        hidden.remove(0);
        load(&mut engine, hidden.clone());
        assert_eq!(ids(&engine), vec!["1", "2", "3"]);

        engine.start(scope(2, "carol"), ConversationTarget::Direct("carol".to_string()));
        engine.start(scope(3, "bob"), ConversationTarget::Direct("bob".to_string()));
        load(&mut engine, hidden);
        assert_eq!(ids(&engine), vec!["2", "3"]);
    }

    #[test]
    fn test_delete_tombstones_in_place() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("2");

        let ticket = engine.begin_delete("alice", &id, true).unwrap();
        engine.complete_op(&ticket, Ok(()));
        assert_eq!(ids(&engine), vec!["1", "2", "3"]);
        assert!(engine.message(&id).unwrap().is_deleted);

        // server hides it from the next snapshot; the tombstone stays put
        let mut next = snapshot();
        next.remove(1);
        load(&mut engine, next);
        assert_eq!(ids(&engine), vec!["1", "2", "3"]);
        assert!(engine.message(&id).unwrap().is_deleted);

        // and a snapshot still showing it undeleted does not resurrect it
        load(&mut engine, snapshot());
        assert!(engine.message(&id).unwrap().is_deleted);
    }

    #[test]
    fn test_delete_for_everyone_requires_ownership() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let theirs = MessageId::new("1");

        assert_eq!(
            engine.begin_delete("alice", &theirs, true),
            Err(ValidationError::NotOwner(theirs.clone()))
        );
        assert!(engine.begin_delete("alice", &theirs, false).is_ok());
    }

    #[test]
    fn test_reaction_replaced_not_stacked() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("1");

        let like = engine.begin_react("alice", &id, "like").unwrap();
        engine.complete_op(&like, Ok(()));
        let love = engine.begin_react("alice", &id, "love").unwrap();
        engine.complete_op(&love, Ok(()));

        let reactions = &engine.message(&id).unwrap().reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].kind, "love");
    }

    #[test]
    fn test_reaction_overlay_idempotent_over_snapshot() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let id = MessageId::new("1");

        engine.begin_react("alice", &id, "like").unwrap();
        // the server already applied it when this poll was served
        let mut served = snapshot();
        served[0].set_reaction("alice", Some("like".to_string()));
        load(&mut engine, served);

        assert_eq!(engine.message(&id).unwrap().reaction_of("alice"), Some("like"));
    }

    #[test]
    fn test_forward_validation() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());
        let ids = [MessageId::new("1"), MessageId::new("3")];

        assert_eq!(
            engine.begin_forward("alice", &[], &["carol".to_string()]),
            Err(ValidationError::EmptySelection)
        );
        assert_eq!(
            engine.begin_forward("alice", &ids, &[" ".to_string()]),
            Err(ValidationError::NoTargets)
        );

        let ticket = engine
            .begin_forward(
                "alice",
                &ids,
                &["carol".to_string(), "dave".to_string(), "carol".to_string()],
            )
            .unwrap();
        assert_eq!(ticket.targets, vec!["carol", "dave"]);
    }

    #[test]
    fn test_upload_uses_local_reference() {
        let mut engine = engine_with_bob();
        let attachment = Attachment::new("cat.png", MessageKind::Image, vec![1, 2, 3]);
        let ticket = engine.begin_upload("alice", attachment).unwrap();

        let optimistic = engine.messages().last().unwrap();
        assert_eq!(optimistic.kind, MessageKind::Image);
        assert_eq!(
            optimistic.media_url.as_deref(),
            Some(format!("local://{}/cat.png", ticket.local_id).as_str())
        );

        let mut server = msg("20", "alice", 10);
        server.kind = MessageKind::Image;
        server.media_url = Some("/media/chat/cat.png".to_string());
        engine.complete_send(&ticket, Ok(server));
        assert_eq!(
            engine.messages().last().unwrap().media_url.as_deref(),
            Some("/media/chat/cat.png")
        );

        let empty = Attachment::new("empty.png", MessageKind::Image, Vec::new());
        assert!(matches!(
            engine.begin_upload("alice", empty),
            Err(ValidationError::EmptyAttachment(_))
        ));
    }

    #[test]
    fn test_mark_active_read() {
        let mut engine = engine_with_bob();
        load(&mut engine, snapshot());

        assert_eq!(engine.mark_active_read(), Some("bob".to_string()));
        assert!(engine.messages().iter().all(|m| m.is_mine || m.is_read));
        assert_eq!(engine.mark_active_read(), None);
    }

    #[test]
    fn test_list_refresh_guards() {
        let mut engine = SyncEngine::new(2);
        let old = engine.begin_list_refresh("alice", 1);
        let new = engine.begin_list_refresh("alice", 1);

        let list = vec![
            ConversationRef::direct("bob", "Bob"),
            ConversationRef::direct("bob", "Bob again"),
        ];
        assert!(engine.complete_list_refresh(&new, 1, Ok(list)));
        assert_eq!(engine.conversations().len(), 1);
        assert!(!engine.complete_list_refresh(&old, 1, Ok(Vec::new())));

        let other_epoch = engine.begin_list_refresh("alice", 1);
        assert!(!engine.complete_list_refresh(&other_epoch, 2, Ok(Vec::new())));
        assert_eq!(engine.conversations().len(), 1);
    }
}
