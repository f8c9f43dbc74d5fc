//! Boundary adapters between parley and the chat server.
//!
//! The synchronization engine talks to two collaborators:
//!
//! - [`ChatApi`]: request/response operations (history pages, sends, status,
//!   claim/release). [`HttpChatApi`] implements it over reqwest.
//! - [`PushChannel`]: topic subscriptions delivering realtime events.
//!   [`WsPushChannel`] implements it over a single WebSocket.
//!
//! With the `test-utils` feature, `InMemoryChatServer` implements both over
//! shared in-process state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod push;
pub mod types;
pub mod ws;

pub use api::ChatApi;
pub use config::ClientConfig;
pub use error::{ApiError, PushError, Result};
pub use http::HttpChatApi;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryChatServer;
pub use push::{PushChannel, PushEvent, SubscriberRegistry, Subscription, SubscriptionId, Topic};
pub use types::{ConversationSummary, MessagePage, SendMessageRequest};
pub use ws::WsPushChannel;
