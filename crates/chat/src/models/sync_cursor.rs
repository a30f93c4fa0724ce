//! Snapshot ordering guard for one conversation

use chrono::{DateTime, Utc};

use super::ConversationId;

/// Tracks which snapshots of a conversation may still be applied
///
/// Every poll request and every local mutation draws a number from the same
/// monotonic sequence. A snapshot is applied only if its request was issued
/// after the last applied snapshot and after the last local mutation, so a
/// late response can never clobber newer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub conversation_id: ConversationId,
    /// Request sequence of the last applied snapshot (0 = none yet)
    pub applied_seq: u64,
    /// Sequence of the most recent local mutation or command confirmation
    pub floor_seq: u64,
    /// When the last snapshot was applied
    pub applied_at: Option<DateTime<Utc>>,
}

impl SyncCursor {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            applied_seq: 0,
            floor_seq: 0,
            applied_at: None,
        }
    }

    /// Whether a snapshot requested at `seq` is newer than local state
    pub fn accepts(&self, seq: u64) -> bool {
        seq > self.applied_seq && seq > self.floor_seq
    }

    /// Record an applied snapshot
    pub fn advance(&mut self, seq: u64) {
        self.applied_seq = seq;
        self.applied_at = Some(Utc::now());
    }

    /// Record a local mutation at `seq`; earlier requests become stale
    pub fn raise_floor(&mut self, seq: u64) {
        self.floor_seq = self.floor_seq.max(seq);
    }

    pub fn has_snapshot(&self) -> bool {
        self.applied_seq > 0
    }
}
