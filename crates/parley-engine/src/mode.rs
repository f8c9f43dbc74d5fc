//! Conversation handoff state machine.
//!
//! # State Machine
//!
//! ```text
//!            request agent             claim
//!   ┌──────┐ ───────────▶ ┌───────────────┐ ─────▶ ┌───────┐
//!   │  AI  │              │ WAITING_AGENT │        │ AGENT │
//!   └──────┘ ◀─────────── └───────────────┘        └───────┘
//!      ▲  ▲  return to bot / release                  │  │
//!      │  └───────────────────────────────────────────┘  │
//!      │            return to bot / release              │
//!      └──── claim (direct pickup) ──────────────────────┘
//! ```
//!
//! Status changes only through a control command acknowledged by the server
//! or an agent action (claim, release). Message arrival never changes it.

use parley_core::{ControlCommand, ConversationId, ConversationStatus, EmployeeId, Message, SenderRole};

use crate::error::{Result, SyncError};
use crate::state::EngineState;

/// Something that moves a conversation between handoff states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeAction {
    /// A control command the server acknowledged.
    Command(ControlCommand),
    /// An agent claimed the conversation.
    Claim(EmployeeId),
    /// An agent released the conversation to the bot.
    Release,
    /// The server reported a status set by another client.
    Observed(ConversationStatus),
}

impl ModeAction {
    /// Status the action leads to.
    #[must_use]
    pub const fn target(self) -> ConversationStatus {
        match self {
            Self::Command(cmd) => cmd.target_status(),
            Self::Claim(_) => ConversationStatus::Agent,
            Self::Release => ConversationStatus::Ai,
            Self::Observed(status) => status,
        }
    }
}

/// Validates a transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `SyncError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    conversation_id: ConversationId,
    from: ConversationStatus,
    to: ConversationStatus,
) -> Result<ConversationStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(SyncError::InvalidTransition {
            conversation_id,
            from,
            to,
        })
    }
}

/// Check if a transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ConversationStatus, to: ConversationStatus) -> bool {
    use ConversationStatus::{Agent, Ai, WaitingAgent};

    matches!(
        (from, to),
        (Ai, WaitingAgent) | (Ai | WaitingAgent, Agent) | (WaitingAgent | Agent, Ai)
    )
}

/// Apply a handoff action to the open conversation.
///
/// Returns the new status if it changed. Actions that would be invalid
/// transitions are ignored, except server observations, which are
/// authoritative and only logged.
pub(crate) fn apply_action(state: &mut EngineState, action: ModeAction) -> Option<ConversationStatus> {
    let conversation = state.conversation.as_mut()?;
    let from = conversation.status;
    let to = action.target();

    if let ModeAction::Claim(agent_id) = action {
        conversation.assigned_agent_id = Some(agent_id);
    }
    if from == to {
        return None;
    }

    if !is_valid_transition(from, to) {
        if let ModeAction::Observed(_) = action {
            tracing::warn!(
                conversation_id = %conversation.id,
                from = from.as_str(),
                to = to.as_str(),
                "Server reported an irregular status change"
            );
        } else {
            tracing::debug!(
                conversation_id = %conversation.id,
                from = from.as_str(),
                to = to.as_str(),
                "Ignoring invalid status transition"
            );
            return None;
        }
    }

    conversation.status = to;
    if to != ConversationStatus::Agent {
        conversation.assigned_agent_id = None;
    }
    tracing::info!(
        conversation_id = %conversation.id,
        from = from.as_str(),
        to = to.as_str(),
        "Conversation status changed"
    );
    Some(to)
}

/// Whether the customer is still waiting for an answer.
///
/// True if the last message is an AI message that is still pending. While
/// the bot serves the conversation it is also true if the customer spoke last
/// (system notices aside) and that message is unconfirmed or its question is
/// still open. `open_question` says whether a send still waits for its answer;
/// it closes on the answer or on the send timeout, so the gate never sticks.
#[must_use]
pub fn awaiting_reply(status: ConversationStatus, messages: &[Message], open_question: bool) -> bool {
    if messages
        .last()
        .is_some_and(|last| last.sender_role == SenderRole::Ai && last.is_pending())
    {
        return true;
    }
    status == ConversationStatus::Ai
        && last_exchange(messages).is_some_and(|last| {
            last.sender_role == SenderRole::Customer && (last.is_pending() || open_question)
        })
}

/// Whether the customer's last message has been answered by the bot or an agent.
#[must_use]
pub fn is_answered(messages: &[Message]) -> bool {
    last_exchange(messages).is_some_and(|last| last.sender_role.behavior().answers_customer)
}

/// Last message written by the customer or by someone answering them.
fn last_exchange(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|m| {
        m.sender_role == SenderRole::Customer || m.sender_role.behavior().answers_customer
    })
}

/// Whether a participant of `role` may send a message now.
///
/// Employees write only in conversations they serve. Customers may not ask a
/// second question while the bot is still answering the first; control
/// commands are exempt so a stuck bot can always be escalated.
#[must_use]
pub fn can_send(
    role: SenderRole,
    status: ConversationStatus,
    awaiting: bool,
    is_command: bool,
) -> bool {
    match role {
        SenderRole::Customer => is_command || !(status == ConversationStatus::Ai && awaiting),
        SenderRole::Employee => status == ConversationStatus::Agent,
        SenderRole::Ai | SenderRole::System => false,
    }
}
