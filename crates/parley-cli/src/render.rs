//! Plain-text rendering of timeline entries and server listings.

use parley_client::ConversationSummary;
use parley_core::{ConversationId, ConversationStatus, Message, MessageStatus, SenderRole};

/// Shown for `/help`.
pub const HELP: &str = "\
Commands:
  <text>          send a message
  /older          load older history
  /agent          ask for a human agent
  /bot            hand the conversation back to the bot
  /claim          claim the open conversation (agents)
  /release        release the open conversation to the bot (agents)
  /read [id]      mark a conversation read (agents)
  /refresh        reload status and the newest page
  /open <id>      open another conversation
  /queue          list conversations
  /quit           exit";

/// One timeline entry, e.g. `[12:00] Assistant: Today we have soup.`
#[must_use]
pub fn message(message: &Message) -> String {
    let time = message.created_at.format("%H:%M");
    let name = message
        .sender_name
        .as_deref()
        .unwrap_or_else(|| message.sender_role.default_label());

    if message.sender_role == SenderRole::System {
        return format!("[{time}] -- {} --", message.content);
    }

    let marker = match message.status {
        MessageStatus::Pending => " (sending)",
        MessageStatus::Failed => " (failed)",
        MessageStatus::Sent => "",
    };
    format!("[{time}] {name}: {}{marker}", message.content)
}

/// Human-readable handoff status.
#[must_use]
pub const fn status(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::Ai => "served by the assistant",
        ConversationStatus::WaitingAgent => "waiting for an agent",
        ConversationStatus::Agent => "served by an agent",
    }
}

/// Status change notice.
#[must_use]
pub fn status_change(id: ConversationId, to: ConversationStatus) -> String {
    format!("* conversation {id} is {}", status(to))
}

/// One row of `/queue`.
#[must_use]
pub fn summary(summary: &ConversationSummary, unread: bool) -> String {
    let agent = summary
        .assigned_agent_id
        .map_or_else(String::new, |id| format!(" agent={id}"));
    let last = summary
        .last_message_at
        .map_or_else(String::new, |at| format!(" last={}", at.format("%Y-%m-%d %H:%M")));
    let flag = if unread { " [unread]" } else { "" };
    format!(
        "  #{:<6} {:<14}{agent}{last}{flag}",
        summary.id.to_string(),
        summary.status.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use parley_core::{MessageId, ServerMessageId};

    fn at_noon(role: SenderRole, content: &str) -> Message {
        Message {
            id: MessageId::Server(ServerMessageId::new(1)),
            conversation_id: ConversationId::new(42),
            sender_role: role,
            sender_name: None,
            content: content.to_string(),
            products: Vec::new(),
            created_at: DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn renders_default_label() {
        let line = message(&at_noon(SenderRole::Ai, "Today we have soup."));
        assert_eq!(line, "[12:00] Assistant: Today we have soup.");
    }

    #[test]
    fn renders_pending_marker_and_name() {
        let mut msg = at_noon(SenderRole::Customer, "Hi");
        msg.sender_name = Some("Ada".to_string());
        msg.status = MessageStatus::Pending;
        assert_eq!(message(&msg), "[12:00] Ada: Hi (sending)");
    }

    #[test]
    fn renders_system_notice() {
        let line = message(&at_noon(SenderRole::System, "Message could not be sent"));
        assert_eq!(line, "[12:00] -- Message could not be sent --");
    }

    #[test]
    fn renders_queue_row() {
        let row = summary(
            &ConversationSummary {
                id: ConversationId::new(43),
                status: ConversationStatus::WaitingAgent,
                assigned_agent_id: None,
                customer_id: None,
                last_message_at: None,
            },
            true,
        );
        assert!(row.contains("#43"));
        assert!(row.contains("WAITING_AGENT"));
        assert!(row.ends_with("[unread]"));
    }
}
