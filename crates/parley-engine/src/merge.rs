//! Dedup and merge.
//!
//! Every message that enters a timeline, whatever its source, goes through
//! [`merge_into`]. A timeline is kept sorted ascending by `created_at`.
//!
//! Rules, in order:
//!
//! 1. An incoming message whose id is already present replaces that entry.
//! 2. Otherwise, if a local placeholder of the same role and content exists
//!    and the role sends optimistically, the placeholder is dropped and the
//!    incoming message takes its place. Placeholders count while `PENDING`
//!    and also after the send timeout resolved them to `SENT`, since they
//!    still carry their temporary id; `FAILED` ones never match.
//! 3. Otherwise the incoming message is inserted at its sorted position.
//!
//! Applying the same message twice leaves the timeline unchanged the second
//! time, so push delivery, poll results and backfills can race freely.

use parley_core::{Message, MessageStatus, TempId};

/// What [`merge_into`] did with an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// An entry with the same id was replaced.
    Upserted,
    /// A local placeholder was confirmed and removed.
    Confirmed(TempId),
    /// The message was new.
    Inserted,
}

/// Merge one message into a sorted timeline, returning the new timeline.
#[must_use]
pub fn merge(list: &[Message], incoming: Message) -> Vec<Message> {
    let mut merged = list.to_vec();
    merge_into(&mut merged, incoming);
    merged
}

/// Merge one message into a sorted timeline in place.
pub fn merge_into(list: &mut Vec<Message>, incoming: Message) -> MergeOutcome {
    if let Some(pos) = list.iter().position(|m| m.id == incoming.id) {
        let moved = list[pos].created_at != incoming.created_at;
        if moved {
            list.remove(pos);
            insert_sorted(list, incoming);
        } else {
            list[pos] = incoming;
        }
        return MergeOutcome::Upserted;
    }

    if let Some(pos) = find_placeholder(list, &incoming) {
        let placeholder = list.remove(pos);
        insert_sorted(list, incoming);
        if let Some(temp_id) = placeholder.id.as_temp() {
            return MergeOutcome::Confirmed(temp_id.clone());
        }
    } else {
        insert_sorted(list, incoming);
    }

    MergeOutcome::Inserted
}

/// Merge a batch, returning each outcome in order.
pub fn merge_all<I>(list: &mut Vec<Message>, incoming: I) -> Vec<MergeOutcome>
where
    I: IntoIterator<Item = Message>,
{
    incoming
        .into_iter()
        .map(|message| merge_into(list, message))
        .collect()
}

/// Confirm one specific placeholder with the server's copy of it.
///
/// Used for send acknowledgments, where the placeholder is known. Unlike
/// [`merge_into`] this does not match by content first, so repeated sends of
/// identical text each confirm their own placeholder.
pub fn confirm_local(list: &mut Vec<Message>, temp_id: &TempId, confirmed: Message) -> MergeOutcome {
    let removed = remove_local(list, temp_id).is_some();
    if !removed || list.iter().any(|m| m.id == confirmed.id) {
        return merge_into(list, confirmed);
    }
    insert_sorted(list, confirmed);
    MergeOutcome::Confirmed(temp_id.clone())
}

/// Remove a local message by temporary id. Returns it if it was present.
pub fn remove_local(list: &mut Vec<Message>, temp_id: &TempId) -> Option<Message> {
    let pos = list
        .iter()
        .position(|m| m.id.as_temp() == Some(temp_id))?;
    Some(list.remove(pos))
}

/// Returns true if the list is sorted ascending and has no repeated id.
#[must_use]
pub fn is_well_formed(list: &[Message]) -> bool {
    let sorted = list.windows(2).all(|w| w[0].created_at <= w[1].created_at);
    let mut ids: Vec<_> = list.iter().map(|m| m.id.to_string()).collect();
    ids.sort_unstable();
    ids.dedup();
    sorted && ids.len() == list.len()
}

/// Find the oldest local placeholder that `incoming` confirms.
///
/// Placeholders resolved by the send timeout still carry their temporary id
/// and remain eligible, so a late confirmation replaces them.
fn find_placeholder(list: &[Message], incoming: &Message) -> Option<usize> {
    if !incoming.id.is_server() || !incoming.sender_role.behavior().reconciles_optimistic {
        return None;
    }
    list.iter().position(|m| {
        m.is_local()
            && m.status != MessageStatus::Failed
            && m.sender_role == incoming.sender_role
            && m.content == incoming.content
    })
}

fn insert_sorted(list: &mut Vec<Message>, message: Message) {
    let at = list.partition_point(|m| m.created_at <= message.created_at);
    list.insert(at, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use parley_core::{ConversationId, MessageId, SenderRole, ServerMessageId};

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn server(id: u64, role: SenderRole, content: &str, offset_ms: i64) -> Message {
        Message {
            id: MessageId::Server(ServerMessageId::new(id)),
            conversation_id: ConversationId::new(42),
            sender_role: role,
            sender_name: None,
            content: content.to_string(),
            products: Vec::new(),
            created_at: base_time() + Duration::milliseconds(offset_ms),
            status: MessageStatus::Sent,
        }
    }

    fn pending(content: &str, offset_ms: i64) -> Message {
        let mut m = Message::pending(ConversationId::new(42), SenderRole::Customer, None, content);
        m.id = MessageId::Local(TempId::parse("temp-1700000000").unwrap());
        m.created_at = base_time() + Duration::milliseconds(offset_ms);
        m
    }

    #[test]
    fn merge_is_idempotent() {
        let list = vec![
            server(1, SenderRole::Customer, "Hello", 0),
            pending("What's on the menu?", 1_000),
        ];
        let reply = server(9001, SenderRole::Ai, "Soup.", 1_400);

        let once = merge(&list, reply.clone());
        let twice = merge(&once, reply);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn confirmation_replaces_placeholder() {
        let mut list = vec![pending("Hi", 0)];
        let outcome = merge_into(&mut list, server(8801, SenderRole::Customer, "Hi", 50));

        assert_eq!(
            outcome,
            MergeOutcome::Confirmed(TempId::parse("temp-1700000000").unwrap())
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, MessageId::Server(ServerMessageId::new(8801)));
        assert_eq!(list[0].status, MessageStatus::Sent);
    }

    #[test]
    fn ai_message_never_confirms_placeholder() {
        let mut ai_placeholder = pending("Thinking", 0);
        ai_placeholder.sender_role = SenderRole::Ai;
        let mut list = vec![ai_placeholder];

        let outcome = merge_into(&mut list, server(5, SenderRole::Ai, "Thinking", 10));
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn different_role_does_not_match() {
        let mut list = vec![pending("Hi", 0)];
        merge_into(&mut list, server(7, SenderRole::Employee, "Hi", 10));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn failed_placeholder_is_not_reconciled() {
        let mut failed = pending("Hi", 0);
        failed.status = MessageStatus::Failed;
        let mut list = vec![failed];

        merge_into(&mut list, server(8801, SenderRole::Customer, "Hi", 10));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn timed_out_placeholder_is_still_reconciled() {
        let mut timed_out = pending("Hi", 0);
        timed_out.transition(MessageStatus::Sent).unwrap();
        let mut list = vec![timed_out];

        let outcome = merge_into(&mut list, server(8801, SenderRole::Customer, "Hi", 31_000));
        assert!(matches!(outcome, MergeOutcome::Confirmed(_)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn out_of_order_arrivals_end_sorted() {
        let mut list = Vec::new();
        merge_all(
            &mut list,
            [
                server(3, SenderRole::Ai, "c", 300),
                server(1, SenderRole::Customer, "a", 100),
                server(2, SenderRole::Ai, "b", 200),
                server(1, SenderRole::Customer, "a", 100),
            ],
        );
        let contents: Vec<_> = list.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"]);
        assert!(is_well_formed(&list));
    }

    #[test]
    fn upsert_with_new_timestamp_moves_entry() {
        let mut list = vec![
            server(1, SenderRole::Customer, "a", 100),
            server(2, SenderRole::Ai, "b", 200),
        ];
        merge_into(&mut list, server(1, SenderRole::Customer, "a", 300));
        assert_eq!(list[1].id, MessageId::Server(ServerMessageId::new(1)));
        assert!(is_well_formed(&list));
    }

    #[test]
    fn confirm_local_targets_its_own_placeholder() {
        let mut older = pending("Hi", 0);
        older.id = MessageId::Local(TempId::parse("temp-1").unwrap());
        older.transition(MessageStatus::Sent).unwrap();
        let mut newer = pending("Hi", 1_000);
        newer.id = MessageId::Local(TempId::parse("temp-2").unwrap());
        let mut list = vec![older, newer];

        let temp = TempId::parse("temp-2").unwrap();
        let outcome = confirm_local(&mut list, &temp, server(8802, SenderRole::Customer, "Hi", 1_050));

        assert_eq!(outcome, MergeOutcome::Confirmed(temp));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id.as_temp().unwrap().as_str(), "temp-1");
        assert!(list[1].id.is_server());
    }

    #[test]
    fn confirm_local_after_push_delivery_leaves_one_entry() {
        let mut list = vec![pending("Hi", 0), server(9001, SenderRole::Ai, "Hello", 500)];
        let confirmed = server(8801, SenderRole::Customer, "Hi", 100);
        // A refresh kept the in-flight placeholder next to the stored copy.
        list.insert(1, confirmed.clone());

        let temp = TempId::parse("temp-1700000000").unwrap();
        let outcome = confirm_local(&mut list, &temp, confirmed);

        assert_eq!(outcome, MergeOutcome::Upserted);
        assert_eq!(list.len(), 2);
        assert!(is_well_formed(&list));
    }

    #[test]
    fn remove_local_by_temp_id() {
        let mut list = vec![server(1, SenderRole::Ai, "a", 0), pending("Hi", 10)];
        let temp = TempId::parse("temp-1700000000").unwrap();
        assert!(remove_local(&mut list, &temp).is_some());
        assert!(remove_local(&mut list, &temp).is_none());
        assert_eq!(list.len(), 1);
    }
}
