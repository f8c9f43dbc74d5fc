//! Wire types for the chat REST API and push frames.

use chrono::{DateTime, Utc};
use parley_core::{
    ConversationId, ConversationStatus, CustomerId, EmployeeId, Message, SenderRole,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// REST
// =============================================================================

/// One page of history, newest message first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages on this page, newest first.
    pub content: Vec<Message>,
    /// True if no older page exists.
    pub last: bool,
}

/// Body of a send-message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target conversation. `None` lets the server open a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Author role.
    pub sender_role: SenderRole,
    /// Text payload.
    pub content: String,
    /// Language tag of the client, e.g. `en`.
    pub lang: String,
    /// Key the server may use to discard duplicate submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Registered customer sending the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    /// Employee sending the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<EmployeeId>,
}

/// Response of the conversation status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Current handoff status.
    pub status: ConversationStatus,
}

/// Body of a claim request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    /// Agent claiming the conversation.
    pub agent_id: EmployeeId,
}

/// Body of a guest-conversation request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestRequest {
    /// Registered customer, if the shopper is signed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
}

/// Conversation as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: ConversationId,
    /// Current handoff status.
    #[serde(default)]
    pub status: ConversationStatus,
    /// Agent serving the conversation.
    #[serde(default)]
    pub assigned_agent_id: Option<EmployeeId>,
    /// Customer owning the conversation.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Time of the latest message.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(alias = "message")]
    pub error: String,
}

// =============================================================================
// Push frames
// =============================================================================

/// Frames the client sends over the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving events for a topic.
    Subscribe {
        /// Topic key.
        topic: String,
    },
    /// Stop receiving events for a topic.
    Unsubscribe {
        /// Topic key.
        topic: String,
    },
}

/// Frames the server sends over the push connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message was posted to a conversation.
    Message {
        /// Topic key.
        topic: String,
        /// The message.
        message: Message,
    },
    /// A conversation has unread activity for agents.
    #[serde(rename_all = "camelCase")]
    Activity {
        /// Topic key.
        topic: String,
        /// Conversation with new activity.
        conversation_id: ConversationId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_request_omits_absent_fields() {
        let req = SendMessageRequest {
            conversation_id: Some(ConversationId::new(42)),
            sender_role: SenderRole::Customer,
            content: "Hi".to_string(),
            lang: "en".to_string(),
            idempotency_key: None,
            customer_id: None,
            employee_id: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "conversationId": 42,
                "senderRole": "CUSTOMER",
                "content": "Hi",
                "lang": "en"
            })
        );
    }

    #[test]
    fn server_frames_parse() {
        let frame: ServerFrame = serde_json::from_value(json!({
            "type": "activity",
            "topic": "agents/queue",
            "conversationId": 42
        }))
        .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Activity {
                topic: "agents/queue".to_string(),
                conversation_id: ConversationId::new(42),
            }
        );
    }

    #[test]
    fn client_frame_shape() {
        let frame = ClientFrame::Subscribe {
            topic: "conversations/42".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "subscribe", "topic": "conversations/42"})
        );
    }

    #[test]
    fn error_body_accepts_message_field() {
        let body: ApiErrorResponse =
            serde_json::from_value(json!({"message": "already claimed"})).unwrap();
        assert_eq!(body.error, "already claimed");
    }
}
