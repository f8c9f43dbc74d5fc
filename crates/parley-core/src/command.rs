//! Control commands.
//!
//! The server interprets a few literal message contents as handoff commands.
//! Callers issue a [`ControlCommand`]; only [`ControlCommand::content`] knows
//! the literal text.

use serde::{Deserialize, Serialize};

use crate::model::ConversationStatus;

/// A customer-issued handoff command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Ask for a human agent.
    RequestAgent,
    /// Hand the conversation back to the bot.
    ReturnToBot,
}

impl ControlCommand {
    /// Every command, in declaration order.
    pub const ALL: [Self; 2] = [Self::RequestAgent, Self::ReturnToBot];

    /// Message content the server recognizes for this command.
    #[must_use]
    pub const fn content(self) -> &'static str {
        match self {
            Self::RequestAgent => "request agent",
            Self::ReturnToBot => "return to bot",
        }
    }

    /// Status the conversation moves to once the server acknowledges the command.
    #[must_use]
    pub const fn target_status(self) -> ConversationStatus {
        match self {
            Self::RequestAgent => ConversationStatus::WaitingAgent,
            Self::ReturnToBot => ConversationStatus::Ai,
        }
    }

    /// Recognize a command from message content.
    #[must_use]
    pub fn from_content(content: &str) -> Option<Self> {
        let content = content.trim();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.content().eq_ignore_ascii_case(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_roundtrip() {
        for cmd in ControlCommand::ALL {
            assert_eq!(ControlCommand::from_content(cmd.content()), Some(cmd));
        }
    }

    #[test]
    fn recognition_ignores_case_and_padding() {
        assert_eq!(
            ControlCommand::from_content("  Request Agent "),
            Some(ControlCommand::RequestAgent)
        );
        assert_eq!(ControlCommand::from_content("what's on the menu?"), None);
    }

    #[test]
    fn target_statuses() {
        assert_eq!(
            ControlCommand::RequestAgent.target_status(),
            ConversationStatus::WaitingAgent
        );
        assert_eq!(ControlCommand::ReturnToBot.target_status(), ConversationStatus::Ai);
    }
}
