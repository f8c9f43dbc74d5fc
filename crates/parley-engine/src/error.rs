//! Error types for the synchronization engine.

use parley_client::{ApiError, PushError};
use parley_core::{ConversationId, ConversationStatus};
use parley_store::StoreError;

/// Errors surfaced by engine operations.
///
/// Failures of the background safety nets (poll fallback, post-send
/// backfill) are logged and never returned.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Loading history or status failed.
    #[error("failed to load conversation: {0}")]
    Fetch(#[source] ApiError),

    /// The send call failed; the optimistic message was replaced by a notice.
    #[error("failed to send message: {0}")]
    Send(#[source] ApiError),

    /// Another agent already holds the conversation.
    #[error("conversation {conversation_id} is already claimed: {reason}")]
    ClaimConflict {
        /// The contested conversation.
        conversation_id: ConversationId,
        /// Server explanation.
        reason: String,
    },

    /// A user action other than send or fetch failed (claim, release, read, list).
    #[error("request failed: {0}")]
    Request(#[source] ApiError),

    /// The requested handoff transition is not allowed from the current status.
    #[error("invalid status transition for conversation {conversation_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Conversation the transition was attempted on.
        conversation_id: ConversationId,
        /// Current status.
        from: ConversationStatus,
        /// Requested status.
        to: ConversationStatus,
    },

    /// The operation needs an open conversation.
    #[error("no conversation is open")]
    NoConversation,

    /// The participant's role may not perform this operation.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// Reading or writing the persisted session failed.
    #[error("session storage error: {0}")]
    Store(#[from] StoreError),

    /// Subscribing to the push channel failed.
    #[error("push channel error: {0}")]
    Push(#[from] PushError),
}

impl SyncError {
    /// Text for the system notice that replaces a failed optimistic send.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Send(ApiError::Http(_)) => {
                "Message could not be sent: the server is unreachable.".to_string()
            }
            Self::Send(ApiError::Api { message, .. } | ApiError::Conflict(message)) => {
                format!("Message could not be sent: {message}")
            }
            Self::Send(ApiError::Parse(_)) => {
                "Message could not be sent: unexpected server response.".to_string()
            }
            Self::ClaimConflict { .. } => {
                "Another agent already picked up this conversation.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Returns true if the caller should reload the conversation list.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ClaimConflict { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failure_notice_uses_server_text() {
        let err = SyncError::Send(ApiError::Api {
            status: 503,
            message: "messaging unavailable".to_string(),
        });
        assert_eq!(
            err.user_message(),
            "Message could not be sent: messaging unavailable"
        );
    }

    #[test]
    fn network_failure_notice_is_generic() {
        let err = SyncError::Send(ApiError::Http("connection refused".to_string()));
        assert!(err.user_message().contains("unreachable"));
    }

    #[test]
    fn only_claim_conflict_is_conflict() {
        let conflict = SyncError::ClaimConflict {
            conversation_id: ConversationId::new(42),
            reason: "taken".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!SyncError::NoConversation.is_conflict());
    }
}
