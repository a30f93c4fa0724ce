//! Message composition
//!
//! Tracks the draft and whether it is a plain send, a reply, an edit or a
//! forward selection. Reads and writes go through the sync engine's
//! commands; the composer itself never talks to the backend.

mod state;
mod typing;

pub use state::{ComposeMode, Composer, MessageRef, Submission};
pub use typing::TypingIndicator;
