//! In-memory chat server.
//!
//! Implements both [`ChatApi`] and [`PushChannel`] over shared state so the
//! engine can be exercised end-to-end without a network. Knobs let tests
//! simulate dropped push events, failing or slow sends, and status changes
//! made by other clients.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_core::{
    ControlCommand, ConversationId, ConversationStatus, CustomerId, EmployeeId, Message,
    MessageId, MessageStatus, SenderRole, ServerMessageId,
};

use crate::api::ChatApi;
use crate::error::{ApiError, PushError, Result};
use crate::push::{PushChannel, PushEvent, SubscriberRegistry, Subscription, Topic};
use crate::types::{ConversationSummary, MessagePage, SendMessageRequest};

#[derive(Debug, Default)]
struct ConversationRecord {
    status: ConversationStatus,
    assigned_agent_id: Option<EmployeeId>,
    customer_id: Option<CustomerId>,
    /// Ascending by creation time.
    messages: Vec<Message>,
    unread: bool,
}

#[derive(Debug, Default)]
struct ServerState {
    conversations: HashMap<ConversationId, ConversationRecord>,
    idempotency: HashMap<String, Message>,
    sent: Vec<SendMessageRequest>,
    next_conversation_id: u64,
    next_message_id: u64,
    fail_sends: bool,
    fail_fetches: bool,
    drop_push: bool,
    send_delay: Option<Duration>,
    fetch_count: usize,
    status_fetch_count: usize,
    subscribed: HashSet<Topic>,
}

/// A chat server held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryChatServer {
    state: Arc<Mutex<ServerState>>,
    registry: Arc<SubscriberRegistry>,
}

impl Default for InMemoryChatServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChatServer {
    /// Create an empty server. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_first_ids(1, 1)
    }

    /// Create an empty server with chosen starting ids.
    #[must_use]
    pub fn with_first_ids(conversation_id: u64, message_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                next_conversation_id: conversation_id,
                next_message_id: message_id,
                ..ServerState::default()
            })),
            registry: Arc::new(SubscriberRegistry::new()),
        }
    }

    // =========================================================================
    // Test knobs
    // =========================================================================

    /// Create a conversation with a given id and status.
    pub fn create_conversation(&self, id: ConversationId, status: ConversationStatus) {
        self.state.lock().conversations.insert(
            id,
            ConversationRecord {
                status,
                ..ConversationRecord::default()
            },
        );
    }

    /// Make subsequent sends fail with a server error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Make subsequent history and status fetches fail.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.state.lock().fail_fetches = fail;
    }

    /// Stop delivering push events (messages are still stored).
    pub fn set_drop_push(&self, drop: bool) {
        self.state.lock().drop_push = drop;
    }

    /// Delay every send acknowledgment.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state.lock().send_delay = delay;
    }

    /// Change a conversation's status as another client would.
    pub fn set_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        agent: Option<EmployeeId>,
    ) {
        let mut state = self.state.lock();
        let record = state.conversations.entry(id).or_default();
        record.status = status;
        record.assigned_agent_id = agent;
    }

    /// Store a message authored elsewhere and push it to subscribers.
    pub fn post(&self, id: ConversationId, role: SenderRole, content: &str) -> Message {
        self.post_at(id, role, content, Utc::now())
    }

    /// Store a message with an explicit timestamp and push it to subscribers.
    pub fn post_at(
        &self,
        id: ConversationId,
        role: SenderRole,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        let (message, deliver) = {
            let mut state = self.state.lock();
            let message = state.store(id, role, None, content, created_at);
            (message, !state.drop_push)
        };
        if deliver {
            self.publish(&message);
        }
        message
    }

    /// Store a fully built message (caller-chosen id) and push it to subscribers.
    pub fn deliver(&self, message: Message) {
        let deliver = {
            let mut state = self.state.lock();
            state.insert(message.clone());
            !state.drop_push
        };
        if deliver {
            self.publish(&message);
        }
    }

    /// Deliver an arbitrary message on its conversation topic without storing it.
    pub fn publish(&self, message: &Message) -> usize {
        let topic = Topic::Conversation(message.conversation_id);
        let reached = self
            .registry
            .dispatch(&topic, &PushEvent::Message(message.clone()));
        self.registry
            .dispatch(&Topic::AgentQueue, &PushEvent::Activity(message.conversation_id));
        reached
    }

    /// Every message stored for a conversation, ascending.
    #[must_use]
    pub fn messages(&self, id: ConversationId) -> Vec<Message> {
        self.state
            .lock()
            .conversations
            .get(&id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Current status of a conversation.
    #[must_use]
    pub fn status(&self, id: ConversationId) -> Option<ConversationStatus> {
        self.state.lock().conversations.get(&id).map(|c| c.status)
    }

    /// Whether agents have unread activity on a conversation.
    #[must_use]
    pub fn is_unread(&self, id: ConversationId) -> bool {
        self.state
            .lock()
            .conversations
            .get(&id)
            .is_some_and(|c| c.unread)
    }

    /// Every send request received, in order.
    #[must_use]
    pub fn sent_requests(&self) -> Vec<SendMessageRequest> {
        self.state.lock().sent.clone()
    }

    /// Number of history page fetches served.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetch_count
    }

    /// Number of status fetches served.
    #[must_use]
    pub fn status_fetch_count(&self) -> usize {
        self.state.lock().status_fetch_count
    }

    /// Number of live subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry.subscriber_count(topic)
    }

    /// Whether any client ever subscribed to a topic.
    #[must_use]
    pub fn was_subscribed(&self, topic: &Topic) -> bool {
        self.state.lock().subscribed.contains(topic)
    }
}

impl ServerState {
    fn allocate_message_id(&mut self) -> MessageId {
        let id = ServerMessageId::new(self.next_message_id);
        self.next_message_id += 1;
        MessageId::Server(id)
    }

    fn allocate_conversation(&mut self, customer_id: Option<CustomerId>) -> ConversationId {
        let id = ConversationId::new(self.next_conversation_id);
        self.next_conversation_id += 1;
        self.conversations.insert(
            id,
            ConversationRecord {
                customer_id,
                ..ConversationRecord::default()
            },
        );
        id
    }

    fn store(
        &mut self,
        conversation_id: ConversationId,
        role: SenderRole,
        sender_name: Option<String>,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: self.allocate_message_id(),
            conversation_id,
            sender_role: role,
            sender_name,
            content: content.to_string(),
            products: Vec::new(),
            created_at,
            status: MessageStatus::Sent,
        };
        self.insert(message.clone());
        message
    }

    fn insert(&mut self, message: Message) {
        let record = self.conversations.entry(message.conversation_id).or_default();
        let at = record
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        record.messages.insert(at, message);
        record.unread = true;
    }

    fn summary(&self, id: ConversationId) -> Option<ConversationSummary> {
        self.conversations.get(&id).map(|c| ConversationSummary {
            id,
            status: c.status,
            assigned_agent_id: c.assigned_agent_id,
            customer_id: c.customer_id,
            last_message_at: c.messages.last().map(|m| m.created_at),
        })
    }
}

fn unavailable(what: &str) -> ApiError {
    ApiError::Api {
        status: 503,
        message: format!("{what} unavailable"),
    }
}

fn not_found(id: ConversationId) -> ApiError {
    ApiError::Api {
        status: 404,
        message: format!("conversation {id} not found"),
    }
}

#[async_trait]
impl ChatApi for InMemoryChatServer {
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: u32,
    ) -> Result<MessagePage> {
        let mut state = self.state.lock();
        state.fetch_count += 1;
        if state.fail_fetches {
            return Err(unavailable("history"));
        }
        let record = state
            .conversations
            .get(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;

        let size = size.max(1) as usize;
        let skip = page as usize * size;
        let content: Vec<Message> = record
            .messages
            .iter()
            .rev()
            .skip(skip)
            .take(size)
            .cloned()
            .collect();
        let last = skip + size >= record.messages.len();

        Ok(MessagePage { content, last })
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (message, deliver) = {
            let mut state = self.state.lock();
            state.sent.push(request.clone());
            if state.fail_sends {
                return Err(unavailable("messaging"));
            }
            if let Some(existing) = request
                .idempotency_key
                .as_ref()
                .and_then(|key| state.idempotency.get(key))
            {
                return Ok(existing.clone());
            }

            let conversation_id = match request.conversation_id {
                Some(id) => id,
                None => state.allocate_conversation(request.customer_id),
            };
            let message = state.store(
                conversation_id,
                request.sender_role,
                None,
                &request.content,
                Utc::now(),
            );

            if request.sender_role == SenderRole::Customer {
                if let Some(command) = ControlCommand::from_content(&request.content) {
                    if let Some(record) = state.conversations.get_mut(&conversation_id) {
                        record.status = command.target_status();
                        if command == ControlCommand::ReturnToBot {
                            record.assigned_agent_id = None;
                        }
                    }
                }
            }
            if let Some(key) = &request.idempotency_key {
                state.idempotency.insert(key.clone(), message.clone());
            }
            (message, !state.drop_push)
        };

        if deliver {
            self.publish(&message);
        }
        Ok(message)
    }

    async fn fetch_status(&self, conversation_id: ConversationId) -> Result<ConversationStatus> {
        let mut state = self.state.lock();
        state.status_fetch_count += 1;
        if state.fail_fetches {
            return Err(unavailable("status"));
        }
        state
            .conversations
            .get(&conversation_id)
            .map(|c| c.status)
            .ok_or_else(|| not_found(conversation_id))
    }

    async fn claim_conversation(
        &self,
        conversation_id: ConversationId,
        agent_id: EmployeeId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;

        match record.assigned_agent_id {
            Some(holder) if holder != agent_id && record.status == ConversationStatus::Agent => {
                Err(ApiError::Conflict(format!(
                    "conversation {conversation_id} already claimed by {holder}"
                )))
            }
            _ => {
                record.status = ConversationStatus::Agent;
                record.assigned_agent_id = Some(agent_id);
                Ok(())
            }
        }
    }

    async fn release_to_bot(&self, conversation_id: ConversationId) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        record.status = ConversationStatus::Ai;
        record.assigned_agent_id = None;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        record.unread = false;
        Ok(())
    }

    async fn start_guest_conversation(
        &self,
        customer_id: Option<CustomerId>,
    ) -> Result<ConversationSummary> {
        let mut state = self.state.lock();
        let id = state.allocate_conversation(customer_id);
        state.summary(id).ok_or_else(|| not_found(id))
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state
            .conversations
            .iter()
            .filter(|(_, c)| status.is_none_or(|s| c.status == s))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids.into_iter().filter_map(|id| state.summary(id)).collect())
    }
}

#[async_trait]
impl PushChannel for InMemoryChatServer {
    async fn subscribe(&self, topic: Topic) -> std::result::Result<Subscription, PushError> {
        self.state.lock().subscribed.insert(topic);
        self.registry.register(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_are_newest_first() {
        let server = InMemoryChatServer::new();
        let conv = ConversationId::new(42);
        server.create_conversation(conv, ConversationStatus::Ai);
        for i in 0..5 {
            server.post(conv, SenderRole::Customer, &format!("m{i}"));
        }

        let page0 = server.fetch_messages(conv, 0, 2).await.unwrap();
        assert_eq!(page0.content[0].content, "m4");
        assert!(!page0.last);

        let page2 = server.fetch_messages(conv, 2, 2).await.unwrap();
        assert_eq!(page2.content.len(), 1);
        assert!(page2.last);
    }

    #[tokio::test]
    async fn control_command_changes_status() {
        let server = InMemoryChatServer::new();
        let conv = ConversationId::new(42);
        server.create_conversation(conv, ConversationStatus::Ai);

        server
            .send_message(&SendMessageRequest {
                conversation_id: Some(conv),
                sender_role: SenderRole::Customer,
                content: ControlCommand::RequestAgent.content().to_string(),
                lang: "en".to_string(),
                idempotency_key: None,
                customer_id: None,
                employee_id: None,
            })
            .await
            .unwrap();

        assert_eq!(server.status(conv), Some(ConversationStatus::WaitingAgent));
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates() {
        let server = InMemoryChatServer::new();
        let conv = ConversationId::new(42);
        server.create_conversation(conv, ConversationStatus::Ai);
        let request = SendMessageRequest {
            conversation_id: Some(conv),
            sender_role: SenderRole::Customer,
            content: "Hi".to_string(),
            lang: "en".to_string(),
            idempotency_key: Some("k".to_string()),
            customer_id: None,
            employee_id: None,
        };

        let a = server.send_message(&request).await.unwrap();
        let b = server.send_message(&request).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(server.messages(conv).len(), 1);
    }

    #[tokio::test]
    async fn second_agent_claim_conflicts() {
        let server = InMemoryChatServer::new();
        let conv = ConversationId::new(42);
        server.create_conversation(conv, ConversationStatus::WaitingAgent);

        server
            .claim_conversation(conv, EmployeeId::new(1))
            .await
            .unwrap();
        let err = server
            .claim_conversation(conv, EmployeeId::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn push_reaches_conversation_and_queue() {
        let server = InMemoryChatServer::new();
        let conv = ConversationId::new(42);
        server.create_conversation(conv, ConversationStatus::Ai);
        let mut messages = server.subscribe(Topic::Conversation(conv)).await.unwrap();
        let mut queue = server.subscribe(Topic::AgentQueue).await.unwrap();

        let posted = server.post(conv, SenderRole::Ai, "Hello");

        assert_eq!(messages.recv().await, Some(PushEvent::Message(posted)));
        assert_eq!(queue.recv().await, Some(PushEvent::Activity(conv)));
    }
}
