//! Conversation sync engine
//!
//! Snapshot polling with a monotonicity guard, and optimistic commands that
//! are confirmed or rolled back against the backend's answer.

mod engine;
mod tickets;
mod timing;

pub use engine::SyncEngine;
pub use tickets::{
    ForwardReport, ForwardTicket, ListTicket, LoadState, OpCommand, OpTicket, PollOutcome,
    PollTicket, SendTicket, SnapshotStats, TargetOutcome,
};
pub use timing::cooldown_elapsed;
