//! Message and conversation model.
//!
//! These types are shared by the HTTP adapter (they are the wire shape of
//! server responses) and by the synchronization engine (they are the
//! timeline it maintains).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::{ConversationId, EmployeeId, MessageId};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderRole {
    /// The shopper asking for help.
    Customer,
    /// A human support agent.
    Employee,
    /// The support bot.
    Ai,
    /// Generated by the system (handoff notices, local error notes).
    System,
}

/// Delivery status of a message.
///
/// Moves only `Pending -> Sent` or `Pending -> Failed`; both targets are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Shown optimistically, not yet confirmed.
    Pending,
    /// Confirmed by the server, or resolved by the send timeout.
    Sent,
    /// Delivery failed.
    Failed,
}

impl MessageStatus {
    /// Check if moving from `self` to `to` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!((self, to), (Self::Pending, Self::Sent | Self::Failed))
    }

    const fn server_default() -> Self {
        Self::Sent
    }
}

/// Handoff status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    /// Served by the bot.
    #[default]
    Ai,
    /// The customer asked for a human; nobody has claimed it yet.
    WaitingAgent,
    /// A human agent has claimed the conversation.
    Agent,
}

impl ConversationStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "AI",
            Self::WaitingAgent => "WAITING_AGENT",
            Self::Agent => "AGENT",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id once assigned, a temporary id before that.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author role.
    pub sender_role: SenderRole,
    /// Display label; the server omits it for the local user at times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Text payload.
    pub content: String,
    /// Attached product references, opaque to the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<serde_json::Value>,
    /// Authoritative ordering key.
    pub created_at: DateTime<Utc>,
    /// Delivery status. Server payloads without one are confirmed messages.
    #[serde(default = "MessageStatus::server_default")]
    pub status: MessageStatus,
}

impl Message {
    /// Create a local, not yet confirmed message with a fresh temporary id.
    #[must_use]
    pub fn pending(
        conversation_id: ConversationId,
        sender_role: SenderRole,
        sender_name: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id,
            sender_role,
            sender_name,
            content: content.into(),
            products: Vec::new(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    /// Create a local system note, e.g. the description of a failed send.
    #[must_use]
    pub fn system_notice(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id,
            sender_role: SenderRole::System,
            sender_name: None,
            content: text.into(),
            products: Vec::new(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    /// Returns true if the message is still awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Returns true if the message only exists on this client so far.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        !self.id.is_server()
    }

    /// Move the message to a new status.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidStatusTransition` unless moving out of `Pending`.
    pub fn transition(&mut self, to: MessageStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Client-side view of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// Handoff status.
    pub status: ConversationStatus,
    /// Agent currently serving the conversation.
    #[serde(default)]
    pub assigned_agent_id: Option<EmployeeId>,
    /// False once a fetched page was marked last.
    pub has_more_older: bool,
    /// Highest page loaded so far (0-based).
    pub page_cursor: u32,
}

impl Conversation {
    /// A freshly opened conversation: bot-served, nothing loaded yet.
    #[must_use]
    pub const fn new(id: ConversationId) -> Self {
        Self {
            id,
            status: ConversationStatus::Ai,
            assigned_agent_id: None,
            has_more_older: true,
            page_cursor: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_only_leaves_pending() {
        use MessageStatus::{Failed, Pending, Sent};

        assert!(Pending.can_transition_to(Sent));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Sent.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Sent));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn transition_rejects_mutating_final_message() {
        let mut msg = Message::pending(ConversationId::new(1), SenderRole::Customer, None, "Hi");
        msg.transition(MessageStatus::Sent).unwrap();

        let err = msg.transition(MessageStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStatusTransition {
                from: MessageStatus::Sent,
                to: MessageStatus::Failed
            }
        ));
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[test]
    fn pending_message_is_local() {
        let msg = Message::pending(ConversationId::new(1), SenderRole::Customer, None, "Hi");
        assert!(msg.is_pending());
        assert!(msg.is_local());
    }

    #[test]
    fn server_message_deserializes_with_defaults() {
        let msg: Message = serde_json::from_value(json!({
            "id": 9001,
            "conversationId": 42,
            "senderRole": "AI",
            "content": "Today we have soup.",
            "createdAt": "2024-01-01T12:00:00Z"
        }))
        .unwrap();

        assert!(!msg.is_local());
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.sender_role, SenderRole::Ai);
        assert!(msg.sender_name.is_none());
        assert!(msg.products.is_empty());
    }

    #[test]
    fn conversation_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConversationStatus::WaitingAgent).unwrap(),
            "\"WAITING_AGENT\""
        );
        assert_eq!(ConversationStatus::Agent.as_str(), "AGENT");
        assert_eq!(ConversationStatus::default(), ConversationStatus::Ai);
    }

    #[test]
    fn new_conversation_starts_with_bot() {
        let conv = Conversation::new(ConversationId::new(42));
        assert_eq!(conv.status, ConversationStatus::Ai);
        assert!(conv.has_more_older);
        assert_eq!(conv.page_cursor, 0);
    }
}
