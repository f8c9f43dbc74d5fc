//! Application state for the line client.
//!
//! Parses input lines into [`Command`]s, runs them against the engine, and
//! turns published snapshots into lines to print. Every timeline entry is
//! printed once, when the server has confirmed it.

use std::collections::{BTreeSet, HashSet};

use parley_core::{ConversationId, ConversationStatus, IdError, MessageId, SenderRole};
use parley_engine::{ConversationEngine, SendOutcome, SyncError, TimelineSnapshot};

use crate::render;

// =============================================================================
// Commands
// =============================================================================

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to send.
    Send(String),
    /// Load the next older page.
    Older,
    /// Ask for a human agent.
    RequestAgent,
    /// Hand back to the bot.
    ReturnToBot,
    /// Claim the open conversation.
    Claim,
    /// Release the open conversation.
    Release,
    /// Mark a conversation read; the open one if no id is given.
    Read(Option<ConversationId>),
    /// Reload status and newest page.
    Refresh,
    /// Switch conversations.
    Open(ConversationId),
    /// List conversations.
    Queue,
    /// Show the command list.
    Help,
    /// Exit.
    Quit,
}

/// Errors from parsing an input line.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Unrecognized slash command.
    #[error("unknown command: /{0} (try /help)")]
    Unknown(String),

    /// Command needs an argument.
    #[error("/{0} needs a conversation id")]
    MissingArgument(&'static str),

    /// Argument is not an id.
    #[error(transparent)]
    InvalidId(#[from] IdError),
}

impl Command {
    /// Parse one input line. Returns `None` for blank lines.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` for unknown commands or malformed arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let command = match name {
            "older" => Self::Older,
            "agent" => Self::RequestAgent,
            "bot" => Self::ReturnToBot,
            "claim" => Self::Claim,
            "release" => Self::Release,
            "read" => Self::Read(arg.map(str::parse::<ConversationId>).transpose()?),
            "refresh" => Self::Refresh,
            "open" => Self::Open(arg.ok_or(CommandError::MissingArgument("open"))?.parse()?),
            "queue" => Self::Queue,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

// =============================================================================
// App
// =============================================================================

/// Line client state.
pub struct App {
    engine: ConversationEngine,
    printed: HashSet<MessageId>,
    status: Option<(ConversationId, ConversationStatus)>,
    unread: BTreeSet<ConversationId>,
    waiting_on_bot: bool,
    /// Set by `/quit`.
    pub should_quit: bool,
}

impl App {
    /// Create the app around an engine.
    #[must_use]
    pub fn new(engine: ConversationEngine) -> Self {
        Self {
            engine,
            printed: HashSet::new(),
            status: None,
            unread: BTreeSet::new(),
            waiting_on_bot: false,
            should_quit: false,
        }
    }

    /// The engine this app drives.
    #[must_use]
    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    /// Run a command and return the lines to print.
    ///
    /// Engine errors are rendered rather than returned; the session goes on.
    pub async fn execute(&mut self, command: Command) -> Vec<String> {
        match self.run(command).await {
            Ok(lines) => lines,
            Err(e) => self.describe_error(&e).await,
        }
    }

    async fn run(&mut self, command: Command) -> parley_engine::Result<Vec<String>> {
        let engine = &self.engine;
        let lines = match command {
            Command::Send(text) => match engine.send(&text).await? {
                SendOutcome::Confirmed(_) => Vec::new(),
                SendOutcome::Ignored => vec![self.blocked_hint()],
            },
            Command::Older => {
                let added = engine.load_older().await?;
                if added == 0 {
                    vec!["* no older messages".to_string()]
                } else {
                    let mut lines = vec![format!("* loaded {added} older messages")];
                    lines.extend(self.rerender());
                    lines
                }
            }
            Command::RequestAgent => {
                engine.request_agent().await?;
                Vec::new()
            }
            Command::ReturnToBot => {
                engine.return_to_bot().await?;
                Vec::new()
            }
            Command::Claim => {
                engine.claim().await?;
                vec!["* conversation claimed".to_string()]
            }
            Command::Release => {
                engine.release().await?;
                vec!["* conversation released to the assistant".to_string()]
            }
            Command::Read(id) => {
                let id = match id {
                    Some(id) => id,
                    None => engine.conversation_id().ok_or(SyncError::NoConversation)?,
                };
                engine.mark_read(id).await?;
                self.unread.remove(&id);
                vec![format!("* conversation {id} marked read")]
            }
            Command::Refresh => {
                engine.refresh().await?;
                Vec::new()
            }
            Command::Open(id) => {
                engine.open(id).await?;
                self.printed.clear();
                self.status = None;
                vec![format!("* opened conversation {id}")]
            }
            Command::Queue => self.queue(None).await?,
            Command::Help => render::HELP.lines().map(str::to_string).collect(),
            Command::Quit => {
                self.should_quit = true;
                Vec::new()
            }
        };
        Ok(lines)
    }

    async fn queue(&self, status: Option<ConversationStatus>) -> parley_engine::Result<Vec<String>> {
        let conversations = self.engine.list_conversations(status).await?;
        if conversations.is_empty() {
            return Ok(vec!["* no conversations".to_string()]);
        }
        let unread = self.engine.snapshot().unread;
        Ok(conversations
            .iter()
            .map(|c| render::summary(c, unread.contains(&c.id)))
            .collect())
    }

    async fn describe_error(&self, err: &SyncError) -> Vec<String> {
        tracing::debug!(error = %err, "Command failed");
        let mut lines = vec![format!("! {}", err.user_message())];
        if err.is_conflict() {
            match self.queue(Some(ConversationStatus::WaitingAgent)).await {
                Ok(queue) => {
                    lines.push("* conversations still waiting:".to_string());
                    lines.extend(queue);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to reload queue after conflict"),
            }
        }
        lines
    }

    fn blocked_hint(&self) -> String {
        match self.engine.participant().role() {
            SenderRole::Employee => "! claim the conversation before writing".to_string(),
            _ => "! please wait for the reply to your last message".to_string(),
        }
    }

    /// Print the whole timeline again, oldest first.
    fn rerender(&mut self) -> Vec<String> {
        self.printed.clear();
        let snapshot = self.engine.snapshot();
        self.observe(&snapshot)
    }

    /// Lines describing what changed since the previous snapshot.
    pub fn observe(&mut self, snapshot: &TimelineSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(conversation) = &snapshot.conversation {
            let current = (conversation.id, conversation.status);
            if self.status.is_some_and(|prev| prev != current) {
                lines.push(render::status_change(current.0, current.1));
            }
            self.status = Some(current);
        }

        for message in &snapshot.messages {
            let confirmed = message.id.is_server() || message.sender_role == SenderRole::System;
            if confirmed && self.printed.insert(message.id.clone()) {
                lines.push(render::message(message));
            }
        }

        if snapshot.waiting_on_bot && !self.waiting_on_bot {
            lines.push("* the assistant is typing...".to_string());
        }
        self.waiting_on_bot = snapshot.waiting_on_bot;

        for id in snapshot.unread.difference(&self.unread) {
            lines.push(format!("* new activity in conversation {id}"));
        }
        self.unread.clone_from(&snapshot.unread);

        lines
    }
}
