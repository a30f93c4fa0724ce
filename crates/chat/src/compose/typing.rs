//! Local typing indicator

use chrono::{DateTime, Duration, Utc};

/// Tracks whether the user is currently typing
///
/// The user counts as typing until `timeout` passes without a keystroke.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    last_keystroke: Option<DateTime<Utc>>,
    timeout: Duration,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_keystroke: None,
            timeout,
        }
    }

    /// Record a keystroke; returns true if the user just started typing
    pub fn note_keystroke(&mut self, now: DateTime<Utc>) -> bool {
        let started = !self.is_typing(now);
        self.last_keystroke = Some(now);
        started
    }

    pub fn is_typing(&self, now: DateTime<Utc>) -> bool {
        self.last_keystroke
            .is_some_and(|last| now - last < self.timeout)
    }

    pub fn clear(&mut self) {
        self.last_keystroke = None;
    }
}
