//! The chat server contract consumed by the synchronization engine.

use async_trait::async_trait;
use parley_core::{ConversationId, ConversationStatus, CustomerId, EmployeeId, Message};

use crate::error::Result;
use crate::types::{ConversationSummary, MessagePage, SendMessageRequest};

/// Trait for chat server communication.
///
/// This trait abstracts the REST surface of the chat server, allowing the
/// engine to run against the HTTP client or an in-memory server in tests.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch one page of history, newest message first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: u32,
    ) -> Result<MessagePage>;

    /// Submit a message and return the server's confirmed copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message>;

    /// Read the current handoff status of a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn fetch_status(&self, conversation_id: ConversationId) -> Result<ConversationStatus>;

    /// Claim a conversation for an agent.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Conflict` if another agent already holds it.
    async fn claim_conversation(
        &self,
        conversation_id: ConversationId,
        agent_id: EmployeeId,
    ) -> Result<()>;

    /// Hand a conversation back to the bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn release_to_bot(&self, conversation_id: ConversationId) -> Result<()>;

    /// Clear the unread marker of a conversation for agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn mark_read(&self, conversation_id: ConversationId) -> Result<()>;

    /// Open a new conversation for an anonymous or signed-in shopper.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn start_guest_conversation(
        &self,
        customer_id: Option<CustomerId>,
    ) -> Result<ConversationSummary>;

    /// List conversations, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>>;
}
