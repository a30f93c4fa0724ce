//! Chat crate - Conversation core for the White Beat messaging client
//!
//! This crate provides platform-independent chat functionality including:
//! - Domain models (ConversationRef, Message, SyncCursor)
//! - Backend trait with REST and in-memory implementations
//! - Session and selection management with scoped cancellation
//! - Snapshot sync engine with optimistic commands and rollback
//! - Composition state machine (reply, edit, forward selection)
//! - Query helpers for presentation
//! - Action handler that drives commands against a backend
//!
//! This crate has zero UI dependencies.

pub mod actions;
pub mod api;
pub mod compose;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod session;
pub mod state;
pub mod sync;

pub use actions::ActionHandler;
pub use api::{ChatBackend, HttpBackend, InMemoryBackend, SendRequest};
pub use compose::{ComposeMode, Composer, Submission};
pub use config::ChatConfig;
pub use error::{CommandError, CommandResult, ServerRejected, ValidationError};
pub use models::{
    Attachment, ConversationId, ConversationKind, ConversationRef, ConversationTarget, Delivery,
    Identity, LocalId, Message, MessageId, MessageKind, Reaction, ReplyPreview, SyncCursor,
};
pub use query::{
    filter_conversations, format_timestamp, message_preview, reaction_counts, reaction_emoji,
    sorted_by_recent, total_unread,
};
pub use session::{Scope, Session};
pub use state::{ChatState, ReadReceipt, SubmitTicket};
pub use sync::{
    // Sync execution
    ForwardReport, LoadState, PollOutcome, SnapshotStats, SyncEngine, TargetOutcome,
    // Sync timing (for refresh cooldowns)
    cooldown_elapsed,
};
