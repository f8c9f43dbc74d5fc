//! Realtime push subscriptions.
//!
//! A [`PushChannel`] hands out [`Subscription`]s keyed by [`Topic`]. Dropping
//! a subscription detaches it; when the last subscriber of a topic goes away
//! the channel is told to stop delivering that topic.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::{ConversationId, Message};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::PushError;
use crate::types::ClientFrame;

/// Topic key of the agent-facing notification stream.
pub const AGENT_QUEUE_TOPIC: &str = "agents/queue";

const CONVERSATION_PREFIX: &str = "conversations/";

/// A push topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages of one conversation.
    Conversation(ConversationId),
    /// "Unread activity" signals for agents.
    AgentQueue,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "{CONVERSATION_PREFIX}{id}"),
            Self::AgentQueue => f.write_str(AGENT_QUEUE_TOPIC),
        }
    }
}

impl FromStr for Topic {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == AGENT_QUEUE_TOPIC {
            return Ok(Self::AgentQueue);
        }
        s.strip_prefix(CONVERSATION_PREFIX)
            .and_then(|rest| rest.parse().ok())
            .map(Self::Conversation)
            .ok_or_else(|| PushError::Connection(format!("unknown topic: {s}")))
    }
}

/// An event delivered on a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A message posted to the subscribed conversation.
    Message(Message),
    /// A conversation has unread activity.
    Activity(ConversationId),
}

/// Unique identifier of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for realtime push delivery.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Start receiving events for a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the subscribe frame
    /// cannot be sent.
    async fn subscribe(&self, topic: Topic) -> Result<Subscription, PushError>;
}

// =============================================================================
// Subscriber registry
// =============================================================================

/// Fan-out table from topics to live subscriptions.
///
/// Shared by the push channel implementations. When built with a control
/// sender, the first subscriber of a topic emits a subscribe frame and the
/// last one to leave emits an unsubscribe frame.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    topics: RwLock<HashMap<Topic, Vec<(SubscriptionId, mpsc::UnboundedSender<PushEvent>)>>>,
    control: Option<mpsc::UnboundedSender<ClientFrame>>,
}

impl SubscriberRegistry {
    /// Create a registry that only fans out locally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that reports topic membership changes on `control`.
    #[must_use]
    pub fn with_control(control: mpsc::UnboundedSender<ClientFrame>) -> Self {
        Self {
            topics: RwLock::default(),
            control: Some(control),
        }
    }

    /// Add a subscriber for `topic`.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Closed` if the control receiver is gone.
    pub fn register(self: &Arc<Self>, topic: Topic) -> Result<Subscription, PushError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::generate();

        let first = {
            let mut topics = self.topics.write();
            let entry = topics.entry(topic).or_default();
            entry.push((id, tx));
            entry.len() == 1
        };

        if first {
            if let Some(control) = &self.control {
                control
                    .send(ClientFrame::Subscribe {
                        topic: topic.to_string(),
                    })
                    .map_err(|_| PushError::Closed)?;
            }
        }

        tracing::debug!(topic = %topic, subscription_id = %id, "Subscribed");

        Ok(Subscription {
            id,
            topic,
            events: rx,
            registry: Arc::clone(self),
        })
    }

    /// Deliver an event to every subscriber of `topic`. Returns the number reached.
    pub fn dispatch(&self, topic: &Topic, event: &PushEvent) -> usize {
        let topics = self.topics.read();
        topics.get(topic).map_or(0, |subs| {
            subs.iter()
                .filter(|(_, tx)| tx.send(event.clone()).is_ok())
                .count()
        })
    }

    /// Number of live subscribers for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Drop every subscriber; their `recv` calls then return `None`.
    pub fn close(&self) {
        self.topics.write().clear();
    }

    fn remove(&self, topic: Topic, id: SubscriptionId) {
        let emptied = {
            let mut topics = self.topics.write();
            let Some(subs) = topics.get_mut(&topic) else {
                return;
            };
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                topics.remove(&topic);
                true
            } else {
                false
            }
        };

        if emptied {
            if let Some(control) = &self.control {
                // The connection may already be gone; nothing left to detach then.
                let _ = control.send(ClientFrame::Unsubscribe {
                    topic: topic.to_string(),
                });
            }
        }

        tracing::debug!(topic = %topic, subscription_id = %id, "Unsubscribed");
    }
}

/// A disposable subscription handle. Dropping it detaches the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    events: mpsc::UnboundedReceiver<PushEvent>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next event. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.topic, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_keys() {
        let topic = Topic::Conversation(ConversationId::new(42));
        assert_eq!(topic.to_string(), "conversations/42");
        assert_eq!("conversations/42".parse::<Topic>().unwrap(), topic);
        assert_eq!("agents/queue".parse::<Topic>().unwrap(), Topic::AgentQueue);
        assert!("rooms/1".parse::<Topic>().is_err());
    }

    #[tokio::test]
    async fn dispatch_reaches_only_matching_topic() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut a = registry
            .register(Topic::Conversation(ConversationId::new(1)))
            .unwrap();
        let _b = registry
            .register(Topic::Conversation(ConversationId::new(2)))
            .unwrap();

        let event = PushEvent::Activity(ConversationId::new(1));
        let reached = registry.dispatch(&Topic::Conversation(ConversationId::new(1)), &event);

        assert_eq!(reached, 1);
        assert_eq!(a.recv().await, Some(event));
    }

    #[test]
    fn control_frames_follow_first_and_last_subscriber() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriberRegistry::with_control(tx));
        let topic = Topic::Conversation(ConversationId::new(42));

        let first = registry.register(topic).unwrap();
        let second = registry.register(topic).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientFrame::Subscribe {
                topic: "conversations/42".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        drop(first);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscriber_count(&topic), 1);

        drop(second);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientFrame::Unsubscribe {
                topic: "conversations/42".to_string()
            }
        );
        assert_eq!(registry.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register(Topic::AgentQueue).unwrap();
        registry.close();
        assert_eq!(sub.recv().await, None);
    }
}
