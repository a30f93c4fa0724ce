//! Descriptions of in-flight requests
//!
//! A ticket is handed out when a poll or command begins and handed back with
//! the backend's result. It carries everything needed to decide whether the
//! result still applies.

use crate::api::SendRequest;
use crate::error::{CommandError, CommandResult};
use crate::models::{Attachment, ConversationTarget, LocalId, MessageId};
use crate::session::Scope;

/// A message snapshot request for the active conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub scope: Scope,
    /// Position in the shared request sequence
    pub seq: u64,
    pub username: String,
    pub target: ConversationTarget,
}

/// A conversation list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTicket {
    /// Identity epoch the request was issued under
    pub epoch: u64,
    pub seq: u64,
    pub username: String,
}

/// A send or media upload backed by an optimistic entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTicket {
    pub scope: Scope,
    pub local_id: LocalId,
    pub request: SendRequest,
    /// Present for media uploads
    pub attachment: Option<Attachment>,
}

/// Server call behind an edit, delete or reaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpCommand {
    Edit { new_content: String },
    Delete { for_everyone: bool },
    React { kind: String },
}

/// A mutation of an existing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTicket {
    pub scope: Scope,
    pub op_seq: u64,
    pub message_id: MessageId,
    pub username: String,
    pub command: OpCommand,
}

/// Fan-out of messages to other users
///
/// Not scoped: the targets are other conversations, so the result is
/// reported even after the selection changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTicket {
    pub sender: String,
    pub message_ids: Vec<MessageId>,
    pub targets: Vec<String>,
}

/// Result of forwarding to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: String,
    pub result: CommandResult<()>,
}

/// Per-target results of a forward
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl ForwardReport {
    pub fn record(&mut self, target: impl Into<String>, result: CommandResult<()>) {
        self.outcomes.push(TargetOutcome {
            target: target.into(),
            result,
        });
    }

    pub fn outcome(&self, target: &str) -> Option<&CommandResult<()>> {
        self.outcomes
            .iter()
            .find(|o| o.target == target)
            .map(|o| &o.result)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.target.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &CommandError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.target.as_str(), e)))
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Statistics from applying one snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Messages in the server snapshot
    pub received: usize,
    /// Local tombstones the snapshot no longer contained
    pub tombstones_carried: usize,
    /// Confirmed sends that showed up and were dropped from the overlay
    pub sends_reconciled: usize,
}

/// What happened to a poll result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Applied(SnapshotStats),
    /// Not newer than local state; discarded
    Stale,
    /// The selection changed while the request was in flight
    OutOfScope,
    /// The fetch failed; last good snapshot kept
    Failed,
}

/// Load status of the active conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Loading,
    Ready,
    /// The initial load failed; nothing to show
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_report_per_target() {
        let mut report = ForwardReport::default();
        report.record("carol", Ok(()));
        report.record("dave", Err(CommandError::Network("timed out".to_string())));

        assert_eq!(report.succeeded(), vec!["carol"]);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].0, "dave");
        assert!(!report.all_succeeded());
        assert_eq!(report.outcome("carol"), Some(&Ok(())));
        assert!(report.outcome("erin").is_none());
    }
}
