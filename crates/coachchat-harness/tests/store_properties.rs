//! Property-based tests for the chat store reducer.
//!
//! The store is fed arbitrary interleavings of REST results and broker
//! events. Properties:
//! - store invariants hold after every event
//! - a message is never listed twice, whichever of send response and broker
//!   echo arrives first
//! - typing indicators behave like a set keyed by user
//! - unread counts equal the distinct messages delivered to closed
//!   conversations
//! - every message delivered to the open conversation is listed exactly
//!   once, even when list refreshes and created summaries already carry it
//!   as their last message

use std::collections::{BTreeSet, HashMap, HashSet};

use coachchat_app::{AppEvent, ChatStore, ConversationDetail, ConversationPage, PageMeta};
use coachchat_core::{ChatEvent, Conversation, ConversationId, MessageId};
use coachchat_harness::{InvariantRegistry, StoreSnapshot, fixtures};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum StoreOp {
    Open(ConversationId),
    Incoming { id: MessageId, conversation_id: ConversationId, sender: u64 },
    Sent { id: MessageId, conversation_id: ConversationId },
    Typing(u64),
    StopTyping(u64),
    /// Conversation list page 1 whose summary carries `last`.
    Refresh { conversation_id: ConversationId, last: MessageId },
    /// Created conversation whose summary carries `last`.
    Created { conversation_id: ConversationId, last: MessageId },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        1 => (1u64..4).prop_map(StoreOp::Open),
        3 => (1u64..20, 1u64..4, 1u64..5)
            .prop_map(|(id, conversation_id, sender)| StoreOp::Incoming { id, conversation_id, sender }),
        2 => (1u64..20, 1u64..4).prop_map(|(id, conversation_id)| StoreOp::Sent { id, conversation_id }),
        2 => (2u64..6).prop_map(StoreOp::Typing),
        1 => (2u64..6).prop_map(StoreOp::StopTyping),
        1 => (1u64..4, 1u64..20)
            .prop_map(|(conversation_id, last)| StoreOp::Refresh { conversation_id, last }),
        1 => (1u64..4, 1u64..20)
            .prop_map(|(conversation_id, last)| StoreOp::Created { conversation_id, last }),
    ]
}

/// Ops over a fixed id space where message `id` belongs to conversation
/// `id % 2 + 1`.
fn delivery_op_strategy() -> impl Strategy<Value = StoreOp> {
    let conversation = |id: MessageId| id % 2 + 1;
    prop_oneof![
        3 => (1u64..20, 1u64..4).prop_map(move |(id, sender)| StoreOp::Incoming {
            id,
            conversation_id: conversation(id),
            sender,
        }),
        1 => (1u64..20).prop_map(move |id| StoreOp::Sent { id, conversation_id: conversation(id) }),
        2 => (1u64..20).prop_map(move |last| StoreOp::Refresh {
            conversation_id: conversation(last),
            last,
        }),
        2 => (1u64..20).prop_map(move |last| StoreOp::Created {
            conversation_id: conversation(last),
            last,
        }),
    ]
}

fn opened(conversation_id: ConversationId) -> AppEvent {
    AppEvent::ConversationLoaded {
        detail: ConversationDetail {
            conversation: Conversation::new(conversation_id),
            messages: Vec::new(),
            meta: PageMeta::single(),
        },
    }
}

fn typing(user_id: u64) -> AppEvent {
    let user = fixtures::user(user_id, "User", "");
    AppEvent::Chat(ChatEvent::Typing { user, timestamp: None })
}

fn stop_typing(user_id: u64) -> AppEvent {
    let user = fixtures::user(user_id, "User", "");
    AppEvent::Chat(ChatEvent::StopTyping { user, timestamp: None })
}

fn summary(conversation_id: ConversationId, last: MessageId) -> Conversation {
    let mut conversation = Conversation::new(conversation_id);
    conversation.record_message(&fixtures::message(last, conversation_id, 2, "hi"));
    conversation
}

/// Message ids are global, so the same id always carries the same body.
fn apply(store: &mut ChatStore, op: &StoreOp) {
    let event = match *op {
        StoreOp::Open(conversation_id) => opened(conversation_id),
        StoreOp::Incoming { id, conversation_id, sender } => AppEvent::Chat(
            ChatEvent::NewMessage(fixtures::message(id, conversation_id, sender, "hi")),
        ),
        StoreOp::Sent { id, conversation_id } => {
            AppEvent::MessageSent { message: fixtures::message(id, conversation_id, 1, "hi") }
        },
        StoreOp::Typing(user_id) => typing(user_id),
        StoreOp::StopTyping(user_id) => stop_typing(user_id),
        StoreOp::Refresh { conversation_id, last } => AppEvent::ConversationsLoaded {
            page: ConversationPage {
                conversations: vec![summary(conversation_id, last)],
                meta: PageMeta::single(),
            },
        },
        StoreOp::Created { conversation_id, last } => {
            AppEvent::ConversationCreated { conversation: summary(conversation_id, last) }
        },
    };
    store.handle(event);
}

proptest! {
    #[test]
    fn invariants_hold_under_arbitrary_events(
        ops in prop::collection::vec(store_op_strategy(), 0..60)
    ) {
        let registry = InvariantRegistry::standard();
        let mut store = ChatStore::new();

        for (i, op) in ops.iter().enumerate() {
            apply(&mut store, op);
            let snapshot = StoreSnapshot::from_store(&store);
            prop_assert!(
                registry.check_all(&snapshot).is_ok(),
                "violation after op {} ({:?}): {:?}",
                i,
                op,
                registry.check_all(&snapshot)
            );
        }
    }

    #[test]
    fn send_and_echo_merge_in_any_order(
        contents in prop::collection::vec(1u64..30, 1..20),
        echo_first in prop::collection::vec(any::<bool>(), 20),
    ) {
        let mut store = ChatStore::new();
        store.handle(opened(1));

        let mut expected = Vec::new();
        for (i, &id) in contents.iter().enumerate() {
            let sent = StoreOp::Sent { id, conversation_id: 1 };
            let echo = StoreOp::Incoming { id, conversation_id: 1, sender: 1 };
            if echo_first[i] {
                apply(&mut store, &echo);
                apply(&mut store, &sent);
            } else {
                apply(&mut store, &sent);
                apply(&mut store, &echo);
            }
            if !expected.contains(&id) {
                expected.push(id);
            }
        }

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(store.conversation(1).map(|c| c.unread_count), Some(0));
    }

    #[test]
    fn typing_matches_set_model(
        ops in prop::collection::vec((any::<bool>(), 2u64..8), 0..50)
    ) {
        let mut store = ChatStore::new();
        store.handle(opened(1));
        let mut model = BTreeSet::new();

        for &(start, user_id) in &ops {
            if start {
                store.handle(typing(user_id));
                model.insert(user_id);
            } else {
                store.handle(stop_typing(user_id));
                model.remove(&user_id);
            }
        }

        let typing: Vec<_> = store.typing_users(1).iter().map(|u| u.id).collect();
        prop_assert_eq!(typing, model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn unread_counts_distinct_closed_deliveries(
        deliveries in prop::collection::vec((1u64..40, 1u64..5), 0..60)
    ) {
        let mut store = ChatStore::new();
        store.handle(opened(1));
        let mut seen = HashSet::new();
        let mut expected: HashMap<ConversationId, u32> = HashMap::new();

        for &(id, conversation_id) in &deliveries {
            // An id belongs to exactly one conversation
            if !seen.insert(id) {
                continue;
            }
            // Every delivery is duplicated, as after a resubscribe replay
            for _ in 0..2 {
                apply(&mut store, &StoreOp::Incoming { id, conversation_id, sender: 2 });
            }
            if conversation_id != 1 {
                *expected.entry(conversation_id).or_default() += 1;
            }
        }

        prop_assert_eq!(store.conversation(1).map(|c| c.unread_count), Some(0));
        for (conversation_id, count) in expected {
            prop_assert_eq!(
                store.conversation(conversation_id).map(|c| c.unread_count),
                Some(count)
            );
        }
    }

    #[test]
    fn open_conversation_lists_each_delivery_once(
        ops in prop::collection::vec(delivery_op_strategy(), 0..80)
    ) {
        let mut store = ChatStore::new();
        store.handle(opened(1));
        let mut expected = Vec::new();

        for op in &ops {
            apply(&mut store, op);
            let delivered = match *op {
                StoreOp::Incoming { id, conversation_id: 1, .. }
                | StoreOp::Sent { id, conversation_id: 1 } => Some(id),
                _ => None,
            };
            if let Some(id) = delivered.filter(|id| !expected.contains(id)) {
                expected.push(id);
            }
        }

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(store.current_conversation_id(), Some(1));
    }
}
