//! The conversation synchronization engine.
//!
//! [`ConversationEngine`] owns one open conversation at a time: its message
//! timeline, handoff status, optimistic sends and the background tasks that
//! keep it fresh. Callers submit intents (open, send, load older, claim,
//! release) and observe [`TimelineSnapshot`]s.
//!
//! The state lock is only held for synchronous mutations; network calls
//! happen outside it. Results arriving for a conversation that is no longer
//! open are discarded.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use parley_client::{ApiError, ChatApi, ConversationSummary, PushChannel, Topic};
use parley_core::{Conversation, ConversationId, ConversationStatus, Message};
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::merge::MergeOutcome;
use crate::mode::{self, ModeAction};
use crate::realtime;
use crate::session::Session;
use crate::state::{EngineState, InboundSource, Participant, TimelineSnapshot};

pub(crate) struct Inner {
    pub api: Arc<dyn ChatApi>,
    pub push: Arc<dyn PushChannel>,
    pub session: Session,
    pub participant: Participant,
    pub config: SyncConfig,
    pub state: Mutex<EngineState>,
    pub snapshots: watch::Sender<TimelineSnapshot>,
}

/// Handle to a synchronization engine. Cloning shares the engine.
#[derive(Clone)]
pub struct ConversationEngine {
    pub(crate) inner: Arc<Inner>,
}

/// Non-owning handle held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<Inner>);

impl WeakEngine {
    pub fn upgrade(&self) -> Option<ConversationEngine> {
        self.0.upgrade().map(|inner| ConversationEngine { inner })
    }
}

impl ConversationEngine {
    /// Create an engine. No conversation is open yet.
    #[must_use]
    pub fn new(
        api: Arc<dyn ChatApi>,
        push: Arc<dyn PushChannel>,
        session: Session,
        participant: Participant,
        config: SyncConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(TimelineSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                api,
                push,
                session,
                participant,
                config,
                state: Mutex::new(EngineState::default()),
                snapshots,
            }),
        }
    }

    /// Who this engine acts for.
    #[must_use]
    pub fn participant(&self) -> &Participant {
        &self.inner.participant
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The persisted session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Receive a snapshot after every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<TimelineSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// The current state.
    #[must_use]
    pub fn snapshot(&self) -> TimelineSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Id of the open conversation.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.state.lock().conversation_id()
    }

    /// Whether `conversation_id` is the open conversation.
    #[must_use]
    pub fn is_current(&self, conversation_id: ConversationId) -> bool {
        self.inner.state.lock().is_current(conversation_id)
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    pub(crate) fn require_conversation(&self) -> Result<ConversationId> {
        self.conversation_id().ok_or(SyncError::NoConversation)
    }

    /// Mutate the state and publish a snapshot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.inner.state.lock();
            let result = f(&mut state);
            (result, state.snapshot())
        };
        self.inner.snapshots.send_replace(snapshot);
        result
    }

    /// Mutate the state of `conversation_id` if it is still open.
    ///
    /// Returns `None`, without publishing, when the conversation changed.
    pub(crate) fn update_current<R>(
        &self,
        conversation_id: ConversationId,
        f: impl FnOnce(&mut EngineState) -> R,
    ) -> Option<R> {
        let (result, snapshot) = {
            let mut state = self.inner.state.lock();
            if !state.is_current(conversation_id) {
                return None;
            }
            let result = f(&mut state);
            (result, state.snapshot())
        };
        self.inner.snapshots.send_replace(snapshot);
        Some(result)
    }

    /// Keep messages of `conversation_id` and fill in missing sender names.
    pub(crate) fn prepare(
        &self,
        conversation_id: ConversationId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Vec<Message> {
        messages
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|mut m| {
                self.inner.participant.backfill_sender_name(&mut m);
                m
            })
            .collect()
    }

    /// Route inbound messages through the merge path.
    ///
    /// This is the only way push events, poll results and backfills reach the
    /// timeline. Returns the number of entries added or confirmed.
    pub(crate) fn ingest(
        &self,
        conversation_id: ConversationId,
        source: InboundSource,
        messages: Vec<Message>,
    ) -> usize {
        let messages = self.prepare(conversation_id, messages);
        let received = messages.len();

        let Some(outcomes) =
            self.update_current(conversation_id, |state| state.merge_messages(messages))
        else {
            tracing::debug!(
                conversation_id = %conversation_id,
                source = %source,
                "Discarding messages for a conversation that is no longer open"
            );
            return 0;
        };

        let changed = outcomes
            .iter()
            .filter(|o| !matches!(o, MergeOutcome::Upserted))
            .count();
        tracing::debug!(
            conversation_id = %conversation_id,
            source = %source,
            received,
            changed,
            "Merged inbound messages"
        );
        changed
    }

    // =========================================================================
    // Conversation lifecycle
    // =========================================================================

    /// Open the stored guest conversation, or start one.
    ///
    /// A stored id the server no longer knows is forgotten and replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation cannot be started or loaded, or
    /// if the session cannot be written.
    pub async fn resume_guest(&self) -> Result<ConversationId> {
        if let Some(id) = self.inner.session.conversation_id() {
            match self.open(id).await {
                Ok(()) => return Ok(id),
                Err(SyncError::Fetch(ApiError::Api { status: 404, .. })) => {
                    tracing::warn!(conversation_id = %id, "Stored conversation is gone, starting a new one");
                    self.inner.session.forget()?;
                }
                Err(e) => return Err(e),
            }
        }

        let summary = self
            .inner
            .api
            .start_guest_conversation(self.inner.participant.customer_id())
            .await
            .map_err(SyncError::Fetch)?;
        self.inner
            .session
            .remember(summary.id, self.inner.participant.customer_id())?;
        tracing::info!(conversation_id = %summary.id, "Started guest conversation");

        self.open(summary.id).await?;
        Ok(summary.id)
    }

    /// Open a conversation: load its status and newest page, then attach the
    /// realtime subscription and the poll fallback.
    ///
    /// On failure the previously open conversation stays as it was.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if the initial load fails, or
    /// `SyncError::Push` if the subscription cannot be established.
    pub async fn open(&self, conversation_id: ConversationId) -> Result<()> {
        let api = &self.inner.api;
        let status = api
            .fetch_status(conversation_id)
            .await
            .map_err(SyncError::Fetch)?;
        let page = api
            .fetch_messages(conversation_id, 0, self.inner.config.page_size)
            .await
            .map_err(SyncError::Fetch)?;
        let subscription = self
            .inner
            .push
            .subscribe(Topic::Conversation(conversation_id))
            .await?;

        let messages = self.prepare(conversation_id, page.content);
        let last = page.last;
        self.update(|state| {
            state.teardown_conversation();
            state.conversation = Some(Conversation {
                status,
                ..Conversation::new(conversation_id)
            });
            state.apply_first_page(messages, last);
            state.unread.remove(&conversation_id);
        });

        let mut tasks = vec![realtime::spawn_conversation_listener(
            self.downgrade(),
            conversation_id,
            subscription,
        )];
        if self.inner.config.poll_enabled {
            tasks.push(realtime::spawn_poll_fallback(
                self.downgrade(),
                conversation_id,
                self.inner.config.poll_interval(),
            ));
        }
        let attached = self
            .update_current(conversation_id, |state| {
                state.conversation_tasks.append(&mut tasks);
            })
            .is_some();
        if !attached {
            for task in tasks {
                task.abort();
            }
        }

        if let Participant::Customer { id, .. } = &self.inner.participant {
            self.inner.session.remember(conversation_id, *id)?;
        } else {
            self.watch_agent_queue().await?;
        }

        tracing::info!(conversation_id = %conversation_id, status = %status.as_str(), "Opened conversation");
        Ok(())
    }

    /// Close the open conversation and stop its background work.
    pub fn close(&self) {
        let closed = self.update(|state| {
            let id = state.conversation_id();
            state.teardown_conversation();
            id
        });
        if let Some(id) = closed {
            tracing::debug!(conversation_id = %id, "Closed conversation");
        }
    }

    /// Re-read the status and reload the newest page, resetting the cursor.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if either request fails.
    pub async fn refresh(&self) -> Result<()> {
        let conversation_id = self.require_conversation()?;
        let status = self
            .inner
            .api
            .fetch_status(conversation_id)
            .await
            .map_err(SyncError::Fetch)?;
        self.update_current(conversation_id, |state| {
            mode::apply_action(state, ModeAction::Observed(status));
        });
        self.load_initial().await
    }

    // =========================================================================
    // Agent actions
    // =========================================================================

    /// Claim the open conversation for the current agent.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ClaimConflict` if another agent holds it; the
    /// caller should reload the conversation list.
    pub async fn claim(&self) -> Result<()> {
        let Some(agent_id) = self.inner.participant.employee_id() else {
            return Err(SyncError::NotPermitted(
                "only employees can claim conversations".to_string(),
            ));
        };
        let conversation_id = self.require_conversation()?;
        let from = self.inner.state.lock().status();
        mode::validate_transition(conversation_id, from, ConversationStatus::Agent)?;

        self.inner
            .api
            .claim_conversation(conversation_id, agent_id)
            .await
            .map_err(|e| match e {
                ApiError::Conflict(reason) => SyncError::ClaimConflict {
                    conversation_id,
                    reason,
                },
                other => SyncError::Request(other),
            })?;

        self.update_current(conversation_id, |state| {
            mode::apply_action(state, ModeAction::Claim(agent_id));
        });
        tracing::info!(conversation_id = %conversation_id, agent_id = %agent_id, "Claimed conversation");
        self.refresh_after_action(conversation_id).await;
        Ok(())
    }

    /// Hand the open conversation back to the bot.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Request` if the server rejects the release.
    pub async fn release(&self) -> Result<()> {
        if self.inner.participant.employee_id().is_none() {
            return Err(SyncError::NotPermitted(
                "only employees can release conversations".to_string(),
            ));
        }
        let conversation_id = self.require_conversation()?;
        let from = self.inner.state.lock().status();
        mode::validate_transition(conversation_id, from, ConversationStatus::Ai)?;

        self.inner
            .api
            .release_to_bot(conversation_id)
            .await
            .map_err(SyncError::Request)?;

        self.update_current(conversation_id, |state| {
            mode::apply_action(state, ModeAction::Release);
        });
        tracing::info!(conversation_id = %conversation_id, "Released conversation to bot");
        self.refresh_after_action(conversation_id).await;
        Ok(())
    }

    /// Clear the unread marker of a conversation.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Request` if the server call fails.
    pub async fn mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        self.inner
            .api
            .mark_read(conversation_id)
            .await
            .map_err(SyncError::Request)?;
        self.update(|state| {
            state.unread.remove(&conversation_id);
        });
        Ok(())
    }

    /// List conversations, e.g. to reload the queue after a claim conflict.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Request` if the server call fails.
    pub async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>> {
        self.inner
            .api
            .list_conversations(status)
            .await
            .map_err(SyncError::Request)
    }

    /// Start listening for unread-activity signals. Does nothing if already listening.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Push` if the subscription fails.
    pub async fn watch_agent_queue(&self) -> Result<()> {
        if self.inner.state.lock().queue_task.is_some() {
            return Ok(());
        }
        let subscription = self.inner.push.subscribe(Topic::AgentQueue).await?;
        let task = realtime::spawn_queue_listener(self.downgrade(), subscription);

        let mut state = self.inner.state.lock();
        if state.queue_task.is_some() {
            task.abort();
        } else {
            state.queue_task = Some(task);
        }
        Ok(())
    }

    pub(crate) fn note_activity(&self, conversation_id: ConversationId) {
        self.update(|state| {
            if !state.is_current(conversation_id) {
                state.unread.insert(conversation_id);
            }
        });
    }

    /// Mode refresh after a successful agent action. The action already
    /// succeeded, so a failed reload is only logged.
    async fn refresh_after_action(&self, conversation_id: ConversationId) {
        if let Err(e) = self.load_initial().await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Reload after agent action failed");
        }
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("participant", &self.inner.participant)
            .field("conversation_id", &self.conversation_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_client::InMemoryChatServer;
    use parley_core::{MessageId, MessageStatus, SenderRole, ServerMessageId};

    fn engine(server: &InMemoryChatServer) -> ConversationEngine {
        ConversationEngine::new(
            Arc::new(server.clone()),
            Arc::new(server.clone()),
            Session::ephemeral(),
            Participant::guest(),
            SyncConfig {
                poll_enabled: false,
                ..SyncConfig::default()
            },
        )
    }

    fn message(conversation_id: ConversationId) -> Message {
        Message {
            id: MessageId::Server(ServerMessageId::new(7)),
            conversation_id,
            sender_role: SenderRole::Ai,
            sender_name: None,
            content: "late".to_string(),
            products: Vec::new(),
            created_at: chrono::Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    #[tokio::test]
    async fn results_for_previous_conversation_are_discarded() {
        let server = InMemoryChatServer::new();
        let (old, new) = (ConversationId::new(42), ConversationId::new(43));
        server.create_conversation(old, ConversationStatus::Ai);
        server.create_conversation(new, ConversationStatus::Ai);
        let engine = engine(&server);

        engine.open(old).await.unwrap();
        engine.open(new).await.unwrap();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.ingest(old, InboundSource::Poll, vec![message(old)]), 0);
        assert!(engine.snapshot().messages.is_empty());
        assert_eq!(server.subscriber_count(&Topic::Conversation(old)), 0);
    }

    #[tokio::test]
    async fn messages_of_other_conversations_are_filtered() {
        let server = InMemoryChatServer::new();
        let id = ConversationId::new(42);
        server.create_conversation(id, ConversationStatus::Ai);
        let engine = engine(&server);
        engine.open(id).await.unwrap();

        let stray = message(ConversationId::new(99));
        assert_eq!(engine.ingest(id, InboundSource::Push, vec![stray]), 0);
        assert_eq!(engine.ingest(id, InboundSource::Push, vec![message(id)]), 1);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].sender_name.as_deref(), Some("Assistant"));
    }

    #[tokio::test]
    async fn failed_open_keeps_previous_conversation() {
        let server = InMemoryChatServer::new();
        let id = ConversationId::new(42);
        server.create_conversation(id, ConversationStatus::Ai);
        let engine = engine(&server);
        engine.open(id).await.unwrap();

        let err = engine.open(ConversationId::new(404)).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(ApiError::Api { status: 404, .. })));
        assert_eq!(engine.conversation_id(), Some(id));
    }
}
