//! Key encoding for the sessions column family.

/// Profile used when the caller does not name one.
pub const DEFAULT_PROFILE: &str = "guest";

/// Encode a session key: `session/<profile>`.
#[must_use]
pub fn session_key(profile: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + profile.len());
    key.extend_from_slice(b"session/");
    key.extend_from_slice(profile.as_bytes());
    key
}
