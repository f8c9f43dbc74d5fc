//! In-memory session storage.

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::StoredSession;
use crate::SessionStore;

/// A `SessionStore` that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<StoredSession>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a session.
    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self.session.read().clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.session.write() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.session.write().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ConversationId;

    #[test]
    fn save_load_clear() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());

        let session = StoredSession::new(ConversationId::new(7), None);
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_overwrites() {
        let store = MemorySessionStore::with_session(StoredSession::new(ConversationId::new(1), None));
        store
            .save(&StoredSession::new(ConversationId::new(2), None))
            .unwrap();
        assert_eq!(
            store.load().unwrap().map(|s| s.conversation_id),
            Some(ConversationId::new(2))
        );
    }
}
