//! Domain types stored in the database.

use chrono::{DateTime, Utc};
use parley_core::{ConversationId, CustomerId};
use serde::{Deserialize, Serialize};

/// The client-side session remembered across restarts.
///
/// Holds the conversation an anonymous shopper was last chatting in, so a
/// reload resumes the same thread instead of starting a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Conversation to resume.
    pub conversation_id: ConversationId,
    /// Registered customer owning the conversation, if known.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// When the session was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    /// Create a record for a conversation, stamped now.
    #[must_use]
    pub fn new(conversation_id: ConversationId, customer_id: Option<CustomerId>) -> Self {
        Self {
            conversation_id,
            customer_id,
            updated_at: Utc::now(),
        }
    }
}
