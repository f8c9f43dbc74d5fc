//! The persisted client session handed to the engine at construction.

use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::{ConversationId, CustomerId};
use parley_store::{MemorySessionStore, SessionStore, StoreError, StoredSession};

/// Remembers which conversation an anonymous shopper was using.
///
/// The backing store is read once, when the session is loaded. Later reads
/// come from memory; writes go through to the store.
pub struct Session {
    store: Arc<dyn SessionStore>,
    current: Mutex<Option<StoredSession>>,
}

impl Session {
    /// Read the stored session from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(store: Arc<dyn SessionStore>) -> Result<Self, StoreError> {
        let current = store.load()?;
        if let Some(session) = &current {
            tracing::debug!(conversation_id = %session.conversation_id, "Loaded stored session");
        }
        Ok(Self {
            store,
            current: Mutex::new(current),
        })
    }

    /// A session that is never persisted.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            store: Arc::new(MemorySessionStore::new()),
            current: Mutex::new(None),
        }
    }

    /// Conversation to resume, if one was stored.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.current.lock().as_ref().map(|s| s.conversation_id)
    }

    /// Record the conversation in use. Unchanged values are not rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn remember(
        &self,
        conversation_id: ConversationId,
        customer_id: Option<CustomerId>,
    ) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        let unchanged = current
            .as_ref()
            .is_some_and(|s| s.conversation_id == conversation_id && s.customer_id == customer_id);
        if unchanged {
            return Ok(());
        }

        let session = StoredSession::new(conversation_id, customer_id);
        self.store.save(&session)?;
        *current = Some(session);
        Ok(())
    }

    /// Forget the stored conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn forget(&self) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        self.store.clear()?;
        *current = None;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("current", &*self.current.lock())
            .finish_non_exhaustive()
    }
}
