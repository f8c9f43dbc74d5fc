//! Optimistic send pipeline.
//!
//! A submitted message appears in the timeline at once as a pending
//! placeholder with a temporary id. The server's acknowledgment confirms it
//! through the merge path; a short-delay backfill then catches a reply the
//! push channel may have missed. A customer's question keeps its ticket open
//! until an answer is merged, which holds the awaiting-reply gate shut. If
//! the send timeout fires first, the ticket closes and an unconfirmed
//! placeholder resolves to `SENT`, staying reconcilable. A failed send call
//! replaces the placeholder with a system notice.

use parley_client::SendMessageRequest;
use parley_core::{
    ControlCommand, ConversationId, ConversationStatus, Message, MessageId, MessageStatus,
    SenderRole, TempId,
};

use crate::engine::{ConversationEngine, WeakEngine};
use crate::error::{Result, SyncError};
use crate::merge::{self, MergeOutcome};
use crate::mode::{self, ModeAction};
use crate::state::{InboundSource, Participant, PendingSendTicket};

/// Result of a send attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The send was rejected locally (empty content or blocked by mode).
    Ignored,
    /// The server accepted the message.
    Confirmed(Message),
}

impl ConversationEngine {
    /// Send a text message as the current participant.
    ///
    /// A customer with no open conversation resumes or starts the guest
    /// conversation first.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Send` if the send call fails, after the
    /// placeholder was replaced by a system notice.
    pub async fn send(&self, content: &str) -> Result<SendOutcome> {
        self.submit(content.trim(), None).await
    }

    /// Issue a handoff command through the normal send path.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotPermitted` for employees, otherwise as [`send`](Self::send).
    pub async fn send_command(&self, command: ControlCommand) -> Result<SendOutcome> {
        if self.inner.participant.role() != SenderRole::Customer {
            return Err(SyncError::NotPermitted(
                "only customers issue handoff commands".to_string(),
            ));
        }
        self.submit(command.content(), Some(command)).await
    }

    /// Ask for a human agent.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn request_agent(&self) -> Result<SendOutcome> {
        self.send_command(ControlCommand::RequestAgent).await
    }

    /// Hand the conversation back to the bot.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn return_to_bot(&self) -> Result<SendOutcome> {
        self.send_command(ControlCommand::ReturnToBot).await
    }

    async fn submit(&self, content: &str, command: Option<ControlCommand>) -> Result<SendOutcome> {
        if content.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let conversation_id = match (self.conversation_id(), &self.inner.participant) {
            (Some(id), _) => id,
            (None, Participant::Customer { .. }) => self.resume_guest().await?,
            (None, Participant::Employee { .. }) => return Err(SyncError::NoConversation),
        };

        let Some(temp_id) = self.place_optimistic(conversation_id, content, command) else {
            tracing::debug!(conversation_id = %conversation_id, "Send blocked by conversation mode");
            return Ok(SendOutcome::Ignored);
        };

        let participant = &self.inner.participant;
        let request = SendMessageRequest {
            conversation_id: Some(conversation_id),
            sender_role: participant.role(),
            content: content.to_string(),
            lang: self.inner.config.lang.clone(),
            idempotency_key: Some(temp_id.idempotency_key(content)),
            customer_id: participant.customer_id(),
            employee_id: participant.employee_id(),
        };

        match self.inner.api.send_message(&request).await {
            Ok(confirmed) => {
                let confirmed = self.confirm_send(conversation_id, &temp_id, confirmed, command);
                self.spawn_backfill(conversation_id);
                Ok(SendOutcome::Confirmed(confirmed))
            }
            Err(e) => {
                let err = SyncError::Send(e);
                self.fail_send(conversation_id, &temp_id, &err);
                Err(err)
            }
        }
    }

    /// Insert the pending placeholder and arm its timeout.
    ///
    /// Returns `None` if the participant may not send right now.
    fn place_optimistic(
        &self,
        conversation_id: ConversationId,
        content: &str,
        command: Option<ControlCommand>,
    ) -> Option<TempId> {
        let participant = &self.inner.participant;
        let role = participant.role();
        let timeout = self.inner.config.send_timeout();
        let weak = self.downgrade();

        self.update_current(conversation_id, |state| {
            let status = state.status();
            if !mode::can_send(role, status, state.awaiting_reply(), command.is_some()) {
                return None;
            }

            let temp_id = TempId::generate();
            let mut placeholder = Message::pending(
                conversation_id,
                role,
                participant.display_name().map(str::to_string),
                content,
            );
            placeholder.id = MessageId::Local(temp_id.clone());
            participant.backfill_sender_name(&mut placeholder);

            let asks_bot =
                role == SenderRole::Customer && status == ConversationStatus::Ai && command.is_none();
            let handle = spawn_send_timeout(weak, conversation_id, temp_id.clone(), timeout);
            state
                .tickets
                .insert(temp_id.clone(), PendingSendTicket::new(handle, asks_bot));
            merge::merge_into(&mut state.messages, placeholder);

            if asks_bot {
                state.waiting_on_bot = true;
            }

            tracing::debug!(conversation_id = %conversation_id, temp_id = %temp_id, "Placed optimistic message");
            Some(temp_id)
        })
        .flatten()
    }

    fn confirm_send(
        &self,
        conversation_id: ConversationId,
        temp_id: &TempId,
        confirmed: Message,
        command: Option<ControlCommand>,
    ) -> Message {
        let mut confirmed = confirmed;
        self.inner.participant.backfill_sender_name(&mut confirmed);
        let merged = confirmed.clone();

        let applied = self.update_current(conversation_id, |state| {
            if let MergeOutcome::Confirmed(other) =
                merge::confirm_local(&mut state.messages, temp_id, merged)
            {
                state.confirm_ticket(&other);
            }
            state.confirm_ticket(temp_id);
            // The answer may have been pushed before the acknowledgment.
            state.retire_answered();

            if let Some(command) = command {
                mode::apply_action(state, ModeAction::Command(command));
            }
            state.waiting_on_bot = false;
        });

        if applied.is_none() {
            tracing::debug!(
                conversation_id = %conversation_id,
                source = %InboundSource::SendAck,
                "Discarding acknowledgment for a conversation that is no longer open"
            );
        }
        confirmed
    }

    fn fail_send(&self, conversation_id: ConversationId, temp_id: &TempId, err: &SyncError) {
        tracing::warn!(conversation_id = %conversation_id, temp_id = %temp_id, error = %err, "Send failed");
        let notice = Message::system_notice(conversation_id, err.user_message());

        self.update_current(conversation_id, |state| {
            merge::remove_local(&mut state.messages, temp_id);
            if let Some(ticket) = state.tickets.remove(temp_id) {
                ticket.cancel();
            }
            merge::merge_into(&mut state.messages, notice);
            state.waiting_on_bot = false;
        });
    }

    /// Close a ticket whose timeout fired, resolving an unconfirmed
    /// placeholder to `SENT`.
    pub(crate) fn expire_send(&self, conversation_id: ConversationId, temp_id: &TempId) {
        self.update_current(conversation_id, |state| {
            // The timeout task is the caller; dropping the ticket detaches it.
            let Some(ticket) = state.tickets.remove(temp_id) else {
                return;
            };
            if ticket.is_confirmed() {
                tracing::debug!(conversation_id = %conversation_id, temp_id = %temp_id, "No reply before the send timeout");
                return;
            }
            let Some(message) = state
                .messages
                .iter_mut()
                .find(|m| m.id.as_temp() == Some(temp_id))
            else {
                return;
            };
            if message.transition(MessageStatus::Sent).is_ok() {
                tracing::debug!(conversation_id = %conversation_id, temp_id = %temp_id, "Send timed out without confirmation");
            }
        });
    }
}

fn spawn_send_timeout(
    engine: WeakEngine,
    conversation_id: ConversationId,
    temp_id: TempId,
    timeout: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(engine) = engine.upgrade() {
            engine.expire_send(conversation_id, &temp_id);
        }
    })
}
