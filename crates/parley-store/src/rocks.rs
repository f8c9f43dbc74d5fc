//! `RocksDB` session storage.
//!
//! This module provides the `RocksSessionStore` implementation of the `SessionStore` trait.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::StoredSession;
use crate::SessionStore;

/// RocksDB-backed session storage.
///
/// Each store instance reads and writes one profile. Several profiles can
/// share a database directory, e.g. one per storefront account on a kiosk.
pub struct RocksSessionStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    profile: String,
}

impl RocksSessionStore {
    /// Open or create a database at the given path using the default profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_profile(path, keys::DEFAULT_PROFILE)
    }

    /// Open or create a database at the given path for a named profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_profile<P: AsRef<Path>>(path: P, profile: impl Into<String>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            profile: profile.into(),
        })
    }

    /// The profile this store reads and writes.
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl SessionStore for RocksSessionStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let cf = self.cf(cf::SESSIONS)?;
        let key = keys::session_key(&self.profile);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        let cf = self.cf(cf::SESSIONS)?;
        let key = keys::session_key(&self.profile);
        let value = Self::serialize(session)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(
            profile = %self.profile,
            conversation_id = %session.conversation_id,
            "Persisted client session"
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let cf = self.cf(cf::SESSIONS)?;
        let key = keys::session_key(&self.profile);

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ConversationId, CustomerId};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksSessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksSessionStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn empty_store_has_no_session() {
        let (store, _dir) = create_test_store();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.profile(), keys::DEFAULT_PROFILE);
    }

    #[test]
    fn session_crud() {
        let (store, _dir) = create_test_store();
        let session = StoredSession::new(ConversationId::new(42), Some(CustomerId::new(5)));

        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn session_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksSessionStore::open(dir.path()).unwrap();
            store
                .save(&StoredSession::new(ConversationId::new(42), None))
                .unwrap();
        }

        let store = RocksSessionStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.conversation_id, ConversationId::new(42));
    }

    #[test]
    fn profiles_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = RocksSessionStore::open_profile(dir.path(), "kiosk-a").unwrap();
        store
            .save(&StoredSession::new(ConversationId::new(1), None))
            .unwrap();
        drop(store);

        let other = RocksSessionStore::open_profile(dir.path(), "kiosk-b").unwrap();
        assert!(other.load().unwrap().is_none());
    }
}
