//! Core types for parley.
//!
//! This crate provides the foundational types used by the conversation
//! synchronization engine and its adapters:
//!
//! - **Identifiers**: conversation, message, employee and customer ids, plus
//!   temporary ids for optimistic messages
//! - **Model**: messages, conversations, sender roles and statuses
//! - **Role table**: per-role behaviour looked up in one place
//! - **Control commands**: the typed form of the handoff commands
//!
//! # Example
//!
//! ```
//! use parley_core::{ConversationId, Message, SenderRole};
//!
//! let conversation = ConversationId::new(42);
//! let msg = Message::pending(conversation, SenderRole::Customer, None, "What's on the menu?");
//!
//! assert!(msg.is_pending());
//! assert!(msg.is_local());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod command;
pub mod error;
pub mod ids;
pub mod model;
pub mod role;

pub use command::ControlCommand;
pub use error::{CoreError, Result};
pub use ids::{ConversationId, CustomerId, EmployeeId, IdError, MessageId, ServerMessageId, TempId};
pub use model::{Conversation, ConversationStatus, Message, MessageStatus, SenderRole};
pub use role::RoleBehavior;
