//! Core identifier types for parley.
//!
//! Server-assigned identifiers are opaque 64-bit integers. Messages created
//! locally before the server has acknowledged them carry a [`TempId`] instead,
//! which is why [`MessageId`] is an enum rather than a plain integer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw server identifier.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the raw server identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidNumber(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a support conversation.
    ConversationId
);

numeric_id!(
    /// Server-assigned message identifier.
    ServerMessageId
);

numeric_id!(
    /// Identifier of an employee (support agent).
    EmployeeId
);

numeric_id!(
    /// Identifier of a registered customer.
    CustomerId
);

/// Prefix carried by every temporary identifier.
pub const TEMP_PREFIX: &str = "temp-";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A client-generated identifier for a message the server has not confirmed yet.
///
/// Shape: `temp-<unix-millis>-<seq>`. The sequence makes two ids generated in
/// the same millisecond distinct.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TempId(String);

impl TempId {
    /// Generate a fresh temporary identifier.
    #[must_use]
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{TEMP_PREFIX}{millis}-{seq}"))
    }

    /// Parse a temporary identifier, checking its prefix.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidTempId` if the prefix is missing or nothing follows it.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        match s.strip_prefix(TEMP_PREFIX) {
            Some(rest) if !rest.is_empty() => Ok(Self(s.to_string())),
            _ => Err(IdError::InvalidTempId(s.to_string())),
        }
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the idempotency key sent alongside this message.
    ///
    /// The key is a hex-encoded blake3 hash of the temporary id and content,
    /// so resubmitting the same optimistic message yields the same key.
    #[must_use]
    pub fn idempotency_key(&self, content: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.0.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(content.as_bytes());
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TempId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TempId> for String {
    fn from(id: TempId) -> Self {
        id.0
    }
}

/// Identifier of a message in a timeline.
///
/// Serialized untagged: server ids are JSON numbers, temporary ids are strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Assigned by the server; globally unique.
    Server(ServerMessageId),
    /// Generated locally for an optimistic message.
    Local(TempId),
}

impl MessageId {
    /// Generate a fresh local identifier.
    #[must_use]
    pub fn temporary() -> Self {
        Self::Local(TempId::generate())
    }

    /// Returns true if the server has assigned this identifier.
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    /// Returns the temporary id, if this is a local identifier.
    #[must_use]
    pub const fn as_temp(&self) -> Option<&TempId> {
        match self {
            Self::Local(id) => Some(id),
            Self::Server(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for MessageId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(TEMP_PREFIX) {
            TempId::parse(s).map(Self::Local)
        } else {
            s.parse().map(Self::Server)
        }
    }
}

impl From<ServerMessageId> for MessageId {
    fn from(id: ServerMessageId) -> Self {
        Self::Server(id)
    }
}

impl From<TempId> for MessageId {
    fn from(id: TempId) -> Self {
        Self::Local(id)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a non-negative integer.
    #[error("invalid numeric identifier: {0:?}")]
    InvalidNumber(String),

    /// The input does not look like a temporary identifier.
    #[error("invalid temporary identifier: {0:?}")]
    InvalidTempId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_roundtrip() {
        let id: ConversationId = "42".parse().unwrap();
        assert_eq!(id, ConversationId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn conversation_id_rejects_garbage() {
        let result = "forty-two".parse::<ConversationId>();
        assert!(matches!(result, Err(IdError::InvalidNumber(_))));
    }

    #[test]
    fn temp_ids_are_unique() {
        let a = TempId::generate();
        let b = TempId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(TEMP_PREFIX));
    }

    #[test]
    fn temp_id_requires_prefix() {
        assert!(TempId::parse("temp-1700000000").is_ok());
        assert!(matches!(
            TempId::parse("1700000000"),
            Err(IdError::InvalidTempId(_))
        ));
        assert!(matches!(TempId::parse("temp-"), Err(IdError::InvalidTempId(_))));
    }

    #[test]
    fn message_id_from_str_dispatches_on_prefix() {
        assert_eq!(
            "8801".parse::<MessageId>().unwrap(),
            MessageId::Server(ServerMessageId::new(8801))
        );
        let local = "temp-1700000000".parse::<MessageId>().unwrap();
        assert!(!local.is_server());
        assert_eq!(local.as_temp().unwrap().as_str(), "temp-1700000000");
    }

    #[test]
    fn message_id_serde_is_untagged() {
        let server = MessageId::Server(ServerMessageId::new(9001));
        assert_eq!(serde_json::to_string(&server).unwrap(), "9001");

        let parsed: MessageId = serde_json::from_str("\"temp-1700000000\"").unwrap();
        assert_eq!(parsed, "temp-1700000000".parse::<MessageId>().unwrap());

        let parsed: MessageId = serde_json::from_str("9001").unwrap();
        assert_eq!(parsed, server);
    }

    #[test]
    fn idempotency_key_is_stable_per_message() {
        let id = TempId::parse("temp-1700000000").unwrap();
        let k1 = id.idempotency_key("Hi");
        let k2 = id.idempotency_key("Hi");
        let k3 = id.idempotency_key("Hello");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_eq!(k1.len(), 32);
    }
}
