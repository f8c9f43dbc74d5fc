//! Realtime subscriber and poll fallback.
//!
//! Both are inbound sources feeding [`ConversationEngine::ingest`]. Tasks
//! hold a weak engine handle and capture the conversation id they were
//! started for; the engine aborts them when the conversation changes, and
//! anything they deliver late is discarded by the id check in `ingest`.

use std::time::Duration;

use parley_client::{PushEvent, Subscription};
use parley_core::ConversationId;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::{ConversationEngine, WeakEngine};
use crate::mode::{self, ModeAction};
use crate::state::InboundSource;

/// Forward messages from a conversation topic into the merge path.
pub(crate) fn spawn_conversation_listener(
    engine: WeakEngine,
    conversation_id: ConversationId,
    mut subscription: Subscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            match event {
                PushEvent::Message(message) => {
                    engine.ingest(conversation_id, InboundSource::Push, vec![message]);
                }
                PushEvent::Activity(_) => {}
            }
        }
        tracing::debug!(conversation_id = %conversation_id, "Conversation listener stopped");
    })
}

/// Record unread-activity signals from the agent queue topic.
pub(crate) fn spawn_queue_listener(engine: WeakEngine, mut subscription: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            match event {
                PushEvent::Activity(conversation_id) => engine.note_activity(conversation_id),
                PushEvent::Message(message) => engine.note_activity(message.conversation_id),
            }
        }
        tracing::debug!("Agent queue listener stopped");
    })
}

/// Periodically re-fetch the newest page and the status.
pub(crate) fn spawn_poll_fallback(
    engine: WeakEngine,
    conversation_id: ConversationId,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            if !engine.is_current(conversation_id) {
                break;
            }
            engine.poll_once(conversation_id).await;
        }
        tracing::debug!(conversation_id = %conversation_id, "Poll fallback stopped");
    })
}

impl ConversationEngine {
    /// One poll tick. Failures are logged and swallowed.
    pub(crate) async fn poll_once(&self, conversation_id: ConversationId) {
        if let Err(e) = self
            .merge_newest_page(conversation_id, InboundSource::Poll)
            .await
        {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Poll fallback fetch failed");
            return;
        }

        let status = match self.inner.api.fetch_status(conversation_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Poll fallback status check failed");
                return;
            }
        };

        let changed = self
            .update_current(conversation_id, |state| {
                mode::apply_action(state, ModeAction::Observed(status))
            })
            .flatten();
        if changed.is_some() {
            if let Err(e) = self.load_initial().await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Reload after status change failed");
            }
        }
    }

    /// Fetch the newest page shortly after a send acknowledgment.
    ///
    /// The task belongs to the conversation and is aborted when it closes.
    pub(crate) fn spawn_backfill(&self, conversation_id: ConversationId) {
        let engine = self.downgrade();
        let delay = self.inner.config.backfill_delay();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if !engine.is_current(conversation_id) {
                return;
            }
            if let Err(e) = engine
                .merge_newest_page(conversation_id, InboundSource::Backfill)
                .await
            {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Backfill after send failed");
            }
        });

        let mut task = Some(task);
        self.update_current(conversation_id, |state| {
            state.conversation_tasks.retain(|t| !t.is_finished());
            state.conversation_tasks.extend(task.take());
        });
        if let Some(task) = task {
            task.abort();
        }
    }
}
