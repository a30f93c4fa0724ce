//! Command error taxonomy
//!
//! Backends report failures as `anyhow::Error`. An authoritative rejection
//! from the server is carried as a typed [`ServerRejected`] inside it; every
//! other failure is treated as transient.

use thiserror::Error;

use crate::models::MessageId;

/// The server refused a request (HTTP 4xx)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server rejected request ({status}): {message}")]
pub struct ServerRejected {
    pub status: u16,
    /// The server's reason, verbatim
    pub message: String,
}

/// A command was refused before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("no conversation selected")]
    NoActiveConversation,

    #[error("message content is empty")]
    EmptyContent,

    #[error("message {0} is not in the active conversation")]
    UnknownMessage(MessageId),

    #[error("message {0} was not sent by you")]
    NotOwner(MessageId),

    #[error("message {0} is deleted")]
    MessageDeleted(MessageId),

    #[error("message {0} has not been confirmed by the server yet")]
    Unconfirmed(MessageId),

    #[error("no messages selected")]
    EmptySelection,

    #[error("no forward targets given")]
    NoTargets,

    #[error("reaction kind is empty")]
    EmptyReaction,

    #[error("no failed message {0} to retry")]
    NothingToRetry(String),

    #[error("no failed change {0} to retry")]
    NoFailedChange(u64),

    #[error("attachment {0} is empty")]
    EmptyAttachment(String),
}

/// Failure of a chat command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Rejected locally, never retried automatically
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transient failure; the caller may retry
    #[error("network error: {0}")]
    Network(String),

    /// Authoritative negative response; optimistic state was rolled back
    #[error("{message}")]
    ServerRejected { status: u16, message: String },
}

impl CommandError {
    /// Classify a backend failure
    pub fn from_backend(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ServerRejected>() {
            Some(rejected) => Self::ServerRejected {
                status: rejected.status,
                message: rejected.message.clone(),
            },
            None => Self::Network(format!("{err:#}")),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Result type for chat commands
pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_rejection_survives_context() {
        let err: anyhow::Error = ServerRejected {
            status: 403,
            message: "Only the sender can edit".to_string(),
        }
        .into();
        let err = Err::<(), _>(err).context("edit-message").unwrap_err();

        assert_eq!(
            CommandError::from_backend(err),
            CommandError::ServerRejected {
                status: 403,
                message: "Only the sender can edit".to_string()
            }
        );
    }

    #[test]
    fn test_other_errors_are_network() {
        let err = anyhow::anyhow!("connection refused");
        let classified = CommandError::from_backend(err);
        assert!(classified.is_retryable());
        assert!(classified.to_string().contains("connection refused"));
    }

    #[test]
    fn test_server_message_surfaced_verbatim() {
        let err = CommandError::ServerRejected {
            status: 400,
            message: "Message too long".to_string(),
        };
        assert_eq!(err.to_string(), "Message too long");
    }
}
