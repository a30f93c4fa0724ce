//! Session state: identity, selection and scope counters

use log::{debug, info};

use crate::models::{ConversationId, ConversationRef, Identity};

/// The conversation and generation an in-flight request belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub generation: u64,
    pub conversation_id: ConversationId,
}

/// Signed-in identity plus the currently selected conversation
///
/// Local, synchronous state transitions only; nothing here retries.
#[derive(Debug, Default)]
pub struct Session {
    identity: Option<Identity>,
    active: Option<ConversationRef>,
    /// Bumped on every selection change and on logout
    generation: u64,
    /// Bumped on sign-in and logout; scopes conversation list refreshes
    epoch: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the identity returned by the backend's login
    ///
    /// Signing in as someone else drops any previous selection.
    pub fn sign_in(&mut self, identity: Identity) {
        info!("Signed in as {}", identity.username);
        self.identity = Some(identity);
        self.active = None;
        self.generation += 1;
        self.epoch += 1;
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn active(&self) -> Option<&ConversationRef> {
        self.active.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Scope of the active conversation, if any
    pub fn scope(&self) -> Option<Scope> {
        self.active.as_ref().map(|conv| Scope {
            generation: self.generation,
            conversation_id: conv.id.clone(),
        })
    }

    pub fn is_current(&self, scope: &Scope) -> bool {
        self.scope().as_ref() == Some(scope)
    }

    /// Make `conversation` active and open a new scope
    ///
    /// Returns `None` without touching anything when it is already active.
    pub fn select(&mut self, conversation: ConversationRef) -> Option<Scope> {
        if self.active.as_ref().is_some_and(|a| a.id == conversation.id) {
            debug!("Conversation {} already active", conversation.id);
            return None;
        }

        self.generation += 1;
        debug!(
            "Selected conversation {} (generation {})",
            conversation.id, self.generation
        );
        self.active = Some(conversation);
        self.scope()
    }

    /// Deselect; returns whether anything was selected
    pub fn clear_selection(&mut self) -> bool {
        if self.active.take().is_some() {
            self.generation += 1;
            true
        } else {
            false
        }
    }

    /// Refresh the active conversation's metadata without changing scope
    pub fn update_active(&mut self, conversation: &ConversationRef) {
        if let Some(active) = self.active.as_mut()
            && active.id == conversation.id
        {
            *active = conversation.clone();
        }
    }

    /// Clear identity and selection
    pub fn logout(&mut self) -> Option<Identity> {
        let identity = self.identity.take();
        if let Some(identity) = &identity {
            info!("Logged out {}", identity.username);
        }
        self.active = None;
        self.generation += 1;
        self.epoch += 1;
        identity
    }
}
