//! Conversation synchronization engine for parley support chat.
//!
//! Three unsynchronized sources feed one timeline: history pages fetched on
//! demand, realtime push events, and optimistic messages awaiting
//! confirmation. All of them pass through a single idempotent merge, so the
//! visible timeline is always ordered by creation time and free of
//! duplicates, whatever order events arrive in.
//!
//! # Components
//!
//! - [`merge`]: the dedup and merge rules
//! - [`history`]: page 0 replacement and older-page prepending
//! - [`realtime`]: push subscriber and poll fallback
//! - [`send`]: the optimistic send pipeline
//! - [`mode`]: the bot/agent handoff state machine
//! - [`scroll`]: anchor-preserving infinite scroll
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parley_client::{ClientConfig, HttpChatApi, WsPushChannel};
//! use parley_engine::{ConversationEngine, Participant, Session, SyncConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientConfig::new("https://shop.example.com");
//! let engine = ConversationEngine::new(
//!     Arc::new(HttpChatApi::new(&client)?),
//!     Arc::new(WsPushChannel::connect(&client).await?),
//!     Session::ephemeral(),
//!     Participant::guest(),
//!     SyncConfig::default(),
//! );
//!
//! engine.resume_guest().await?;
//! engine.send("What's on the menu?").await?;
//! println!("{} messages", engine.snapshot().messages.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod merge;
pub mod mode;
pub mod realtime;
pub mod scroll;
pub mod send;
pub mod session;
pub mod state;

pub use config::SyncConfig;
pub use engine::ConversationEngine;
pub use error::{Result, SyncError};
pub use merge::{merge, MergeOutcome};
pub use mode::ModeAction;
pub use scroll::{ScrollCoordinator, ScrollOutcome, Viewport, ViewportAnchor};
pub use send::SendOutcome;
pub use session::Session;
pub use state::{InboundSource, Participant, PendingSendTicket, TimelineSnapshot};
