//! Common error types for parley.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

use crate::model::MessageStatus;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout parley.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A message status change that would break the delivery invariants.
    #[error("invalid message status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        /// The current status.
        from: MessageStatus,
        /// The requested status.
        to: MessageStatus,
    },
}
