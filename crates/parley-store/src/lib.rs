//! Persisted client-side session storage for parley.
//!
//! The only state the chat client keeps across process restarts is the id of
//! the conversation an anonymous shopper was using. It is read once when the
//! engine starts and written whenever a new conversation id is obtained.
//!
//! Two implementations of [`SessionStore`] are provided:
//!
//! - [`RocksSessionStore`]: durable, backed by `RocksDB`
//! - [`MemorySessionStore`]: process-local, for tests and ephemeral clients
//!
//! # Example
//!
//! ```no_run
//! use parley_core::ConversationId;
//! use parley_store::{RocksSessionStore, SessionStore, StoredSession};
//!
//! let store = RocksSessionStore::open("/tmp/parley-session").unwrap();
//! store.save(&StoredSession::new(ConversationId::new(42), None)).unwrap();
//!
//! let resumed = store.load().unwrap();
//! assert_eq!(resumed.map(|s| s.conversation_id), Some(ConversationId::new(42)));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemorySessionStore;
pub use rocks::RocksSessionStore;
pub use types::StoredSession;

/// Storage for the persisted client session.
///
/// Implementations are shared between the engine and the embedding
/// application, so they must be `Send + Sync`.
pub trait SessionStore: Send + Sync {
    /// Read the stored session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn load(&self) -> Result<Option<StoredSession>>;

    /// Insert or replace the stored session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn save(&self, session: &StoredSession) -> Result<()>;

    /// Forget the stored session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn clear(&self) -> Result<()>;
}
