//! History loading and pagination.
//!
//! The server returns pages newest first. Page 0 replaces the timeline (on
//! open and on every mode refresh); pages 1 and up are reversed and merged in
//! front of what is already loaded. Offset pages can overlap when new
//! messages arrived in between, which the id-based merge absorbs.

use parley_core::{ConversationId, Message};

use crate::engine::ConversationEngine;
use crate::error::{Result, SyncError};
use crate::merge::MergeOutcome;
use crate::state::{EngineState, InboundSource};

impl EngineState {
    /// Replace the timeline with the newest page and reset the cursor.
    ///
    /// `newest_first` is the page as the server sent it. Placeholders whose
    /// sends are still in flight survive the replacement, and the page is
    /// merged over them so a stored copy of an in-flight send confirms it.
    pub(crate) fn apply_first_page(&mut self, newest_first: Vec<Message>, last: bool) {
        let tickets = &self.tickets;
        self.messages
            .retain(|m| m.id.as_temp().is_some_and(|t| tickets.contains_key(t)));
        self.merge_messages(newest_first.into_iter().rev().collect());

        if let Some(conversation) = self.conversation.as_mut() {
            conversation.page_cursor = 0;
            conversation.has_more_older = !last;
        }
    }

    /// Merge an older page in front of the timeline and advance the cursor.
    ///
    /// Returns the number of messages that were not already loaded.
    pub(crate) fn apply_older_page(&mut self, newest_first: Vec<Message>, last: bool, page: u32) -> usize {
        let outcomes = self.merge_messages(newest_first.into_iter().rev().collect());
        if let Some(conversation) = self.conversation.as_mut() {
            conversation.page_cursor = page;
            conversation.has_more_older = !last;
        }
        outcomes
            .iter()
            .filter(|o| matches!(o, MergeOutcome::Inserted))
            .count()
    }
}

impl ConversationEngine {
    /// Load the newest page of the open conversation, replacing the timeline.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if the page cannot be fetched; the timeline
    /// is left unchanged.
    pub async fn load_initial(&self) -> Result<()> {
        let conversation_id = self.require_conversation()?;
        let page = self
            .inner
            .api
            .fetch_messages(conversation_id, 0, self.inner.config.page_size)
            .await
            .map_err(SyncError::Fetch)?;

        let messages = self.prepare(conversation_id, page.content);
        let last = page.last;
        self.update_current(conversation_id, |state| state.apply_first_page(messages, last));
        tracing::debug!(conversation_id = %conversation_id, last, "Loaded newest page");
        Ok(())
    }

    /// Load the page after the cursor and prepend it.
    ///
    /// Returns the number of messages added: 0 if everything is loaded or a
    /// load is already running.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if the page cannot be fetched; the cursor
    /// does not advance.
    pub async fn load_older(&self) -> Result<usize> {
        let conversation_id = self.require_conversation()?;
        let next_page = self
            .update_current(conversation_id, |state| {
                let conversation = state.conversation.as_ref()?;
                if state.loading_older || !conversation.has_more_older {
                    return None;
                }
                let next = conversation.page_cursor + 1;
                state.loading_older = true;
                Some(next)
            })
            .flatten();
        let Some(page) = next_page else {
            return Ok(0);
        };

        let result = self
            .inner
            .api
            .fetch_messages(conversation_id, page, self.inner.config.page_size)
            .await;

        match result {
            Ok(body) => {
                let messages = self.prepare(conversation_id, body.content);
                let last = body.last;
                let added = self
                    .update_current(conversation_id, |state| {
                        state.loading_older = false;
                        state.apply_older_page(messages, last, page)
                    })
                    .unwrap_or(0);
                tracing::debug!(conversation_id = %conversation_id, page, added, last, "Loaded older page");
                Ok(added)
            }
            Err(e) => {
                self.update_current(conversation_id, |state| state.loading_older = false);
                tracing::debug!(conversation_id = %conversation_id, page, error = %e, "Loading older page failed");
                Err(SyncError::Fetch(e))
            }
        }
    }

    /// Fetch the newest page and merge it without touching the cursor.
    pub(crate) async fn merge_newest_page(
        &self,
        conversation_id: ConversationId,
        source: InboundSource,
    ) -> Result<usize> {
        let page = self
            .inner
            .api
            .fetch_messages(conversation_id, 0, self.inner.config.page_size)
            .await
            .map_err(SyncError::Fetch)?;
        Ok(self.ingest(conversation_id, source, page.content))
    }
}
