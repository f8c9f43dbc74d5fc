//! Engine-owned state and the snapshots published to observers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parley_core::{
    Conversation, ConversationId, ConversationStatus, CustomerId, EmployeeId, Message,
    SenderRole, TempId,
};
use tokio::task::JoinHandle;

use crate::merge::{self, MergeOutcome};
use crate::mode;

/// Who is using this engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    /// A shopper, anonymous or signed in.
    Customer {
        /// Registered customer id, if signed in.
        id: Option<CustomerId>,
        /// Display name used for the customer's own messages.
        name: Option<String>,
    },
    /// A support agent.
    Employee {
        /// Employee id.
        id: EmployeeId,
        /// Display name used for the agent's own messages.
        name: String,
    },
}

impl Participant {
    /// An anonymous shopper.
    #[must_use]
    pub const fn guest() -> Self {
        Self::Customer {
            id: None,
            name: None,
        }
    }

    /// Role of messages this participant writes.
    #[must_use]
    pub const fn role(&self) -> SenderRole {
        match self {
            Self::Customer { .. } => SenderRole::Customer,
            Self::Employee { .. } => SenderRole::Employee,
        }
    }

    /// Display name for this participant's messages.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Customer { name, .. } => name.as_deref(),
            Self::Employee { name, .. } => Some(name),
        }
    }

    /// Registered customer id, if any.
    #[must_use]
    pub const fn customer_id(&self) -> Option<CustomerId> {
        match self {
            Self::Customer { id, .. } => *id,
            Self::Employee { .. } => None,
        }
    }

    /// Employee id, if any.
    #[must_use]
    pub const fn employee_id(&self) -> Option<EmployeeId> {
        match self {
            Self::Employee { id, .. } => Some(*id),
            Self::Customer { .. } => None,
        }
    }

    /// Fill in a missing sender name.
    ///
    /// The participant's own messages get its display name; everything else
    /// gets the role's default label.
    pub fn backfill_sender_name(&self, message: &mut Message) {
        if message.sender_name.is_some() {
            return;
        }
        let own = message.sender_role == self.role();
        message.sender_name = Some(match self.display_name() {
            Some(name) if own => name.to_string(),
            _ => message.sender_role.default_label().to_string(),
        });
    }
}

/// Where an inbound batch of messages came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundSource {
    /// The realtime push channel.
    Push,
    /// The periodic poll fallback.
    Poll,
    /// The short-delay fetch after a send.
    Backfill,
    /// The server's acknowledgment of a send.
    SendAck,
}

impl fmt::Display for InboundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Poll => "poll",
            Self::Backfill => "backfill",
            Self::SendAck => "send_ack",
        })
    }
}

/// Book-keeping for one optimistic send.
///
/// A ticket lives in the engine's ticket map until its timeout fires, the
/// send call fails, or the send is finished. A send that expects an answer
/// (a customer's question) is finished once the server has confirmed it and
/// an answering message follows it; any other send is finished on
/// confirmation. While an answer-expecting ticket is open the customer is
/// awaiting a reply.
#[derive(Debug)]
pub struct PendingSendTicket {
    timeout: JoinHandle<()>,
    created_at: DateTime<Utc>,
    expects_answer: bool,
    confirmed: bool,
}

impl PendingSendTicket {
    pub(crate) fn new(timeout: JoinHandle<()>, expects_answer: bool) -> Self {
        Self {
            timeout,
            created_at: Utc::now(),
            expects_answer,
            confirmed: false,
        }
    }

    /// Whether the send waits for an answer before it is finished.
    #[must_use]
    pub const fn expects_answer(&self) -> bool {
        self.expects_answer
    }

    /// Whether the server has confirmed the send.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }

    /// Record that a server-confirmed copy of the send was merged.
    pub(crate) fn mark_confirmed(&mut self, temp_id: &TempId) {
        if !self.confirmed {
            tracing::debug!(temp_id = %temp_id, latency_ms = self.elapsed_ms(), "Optimistic send confirmed");
        }
        self.confirmed = true;
    }

    /// Retire a confirmed ticket whose question got its answer.
    pub(crate) fn answered(self, temp_id: &TempId) {
        tracing::debug!(temp_id = %temp_id, latency_ms = self.elapsed_ms(), "Reply received");
        self.cancel();
    }

    /// Stop the timeout; the ticket is finished.
    pub(crate) fn cancel(self) {
        self.timeout.abort();
    }
}

/// Read-only view of the engine, published after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSnapshot {
    /// The open conversation, if any.
    pub conversation: Option<Conversation>,
    /// Messages, ascending by creation time.
    pub messages: Vec<Message>,
    /// Whether the customer is waiting for an answer.
    pub awaiting_reply: bool,
    /// Whether a bot-directed send is in flight.
    pub waiting_on_bot: bool,
    /// Whether an older page is being fetched.
    pub loading_older: bool,
    /// Conversations with unread activity (agents only).
    pub unread: BTreeSet<ConversationId>,
}

impl TimelineSnapshot {
    /// Current handoff status, `AI` when no conversation is open.
    #[must_use]
    pub fn status(&self) -> ConversationStatus {
        self.conversation
            .as_ref()
            .map(|c| c.status)
            .unwrap_or_default()
    }

    /// Whether older history may still be loaded.
    #[must_use]
    pub fn has_more_older(&self) -> bool {
        self.conversation.as_ref().is_some_and(|c| c.has_more_older)
    }
}

/// Mutable engine state. Guarded by a mutex that is never held across an await.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub conversation: Option<Conversation>,
    pub messages: Vec<Message>,
    pub tickets: HashMap<TempId, PendingSendTicket>,
    pub loading_older: bool,
    pub waiting_on_bot: bool,
    pub unread: BTreeSet<ConversationId>,
    pub conversation_tasks: Vec<JoinHandle<()>>,
    pub queue_task: Option<JoinHandle<()>>,
}

impl EngineState {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation.as_ref().map(|c| c.id)
    }

    pub fn status(&self) -> ConversationStatus {
        self.conversation
            .as_ref()
            .map(|c| c.status)
            .unwrap_or_default()
    }

    pub fn is_current(&self, conversation_id: ConversationId) -> bool {
        self.conversation_id() == Some(conversation_id)
    }

    pub fn awaiting_reply(&self) -> bool {
        let open_question = self
            .tickets
            .values()
            .any(PendingSendTicket::expects_answer);
        mode::awaiting_reply(self.status(), &self.messages, open_question)
    }

    /// Merge a batch, then settle the tickets it confirmed or answered.
    pub fn merge_messages(&mut self, messages: Vec<Message>) -> Vec<MergeOutcome> {
        let outcomes = merge::merge_all(&mut self.messages, messages);
        for outcome in &outcomes {
            if let MergeOutcome::Confirmed(temp_id) = outcome {
                self.confirm_ticket(temp_id);
            }
        }
        self.retire_answered();
        outcomes
    }

    /// Mark the ticket of a confirmed send. Sends that expect no answer are
    /// finished right away.
    pub fn confirm_ticket(&mut self, temp_id: &TempId) {
        let Some(ticket) = self.tickets.get_mut(temp_id) else {
            return;
        };
        ticket.mark_confirmed(temp_id);
        if !ticket.expects_answer() {
            if let Some(ticket) = self.tickets.remove(temp_id) {
                ticket.cancel();
            }
        }
    }

    /// Finish confirmed questions once the timeline ends with an answer.
    pub fn retire_answered(&mut self) {
        if !mode::is_answered(&self.messages) {
            return;
        }
        let answered: Vec<TempId> = self
            .tickets
            .iter()
            .filter(|(_, ticket)| ticket.is_confirmed())
            .map(|(temp_id, _)| temp_id.clone())
            .collect();
        for temp_id in answered {
            if let Some(ticket) = self.tickets.remove(&temp_id) {
                ticket.answered(&temp_id);
            }
        }
    }

    /// Stop every background task tied to the open conversation and forget it.
    pub fn teardown_conversation(&mut self) {
        for task in self.conversation_tasks.drain(..) {
            task.abort();
        }
        for (_, ticket) in self.tickets.drain() {
            ticket.cancel();
        }
        self.conversation = None;
        self.messages.clear();
        self.loading_older = false;
        self.waiting_on_bot = false;
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            conversation: self.conversation.clone(),
            messages: self.messages.clone(),
            awaiting_reply: self.awaiting_reply(),
            waiting_on_bot: self.waiting_on_bot,
            loading_older: self.loading_older,
            unread: self.unread.clone(),
        }
    }
}

impl Drop for EngineState {
    fn drop(&mut self) {
        self.teardown_conversation();
        if let Some(task) = self.queue_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_names_own_messages() {
        let me = Participant::Customer {
            id: None,
            name: Some("Ada".to_string()),
        };
        let mut own = Message::pending(ConversationId::new(1), SenderRole::Customer, None, "Hi");
        me.backfill_sender_name(&mut own);
        assert_eq!(own.sender_name.as_deref(), Some("Ada"));

        let mut bot = Message::pending(ConversationId::new(1), SenderRole::Ai, None, "Hello");
        me.backfill_sender_name(&mut bot);
        assert_eq!(bot.sender_name.as_deref(), Some("Assistant"));
    }

    #[test]
    fn backfill_keeps_server_names() {
        let me = Participant::Employee {
            id: EmployeeId::new(7),
            name: "Sam".to_string(),
        };
        let mut msg = Message::pending(ConversationId::new(1), SenderRole::Employee, None, "Hi");
        msg.sender_name = Some("Alex".to_string());
        me.backfill_sender_name(&mut msg);
        assert_eq!(msg.sender_name.as_deref(), Some("Alex"));
    }

    #[test]
    fn anonymous_customer_gets_role_label() {
        let mut msg = Message::pending(ConversationId::new(1), SenderRole::Customer, None, "Hi");
        Participant::guest().backfill_sender_name(&mut msg);
        assert_eq!(msg.sender_name.as_deref(), Some("You"));
    }

    #[test]
    fn empty_snapshot_defaults() {
        let snapshot = EngineState::default().snapshot();
        assert_eq!(snapshot.status(), ConversationStatus::Ai);
        assert!(!snapshot.has_more_older());
        assert!(!snapshot.awaiting_reply);
    }
}
