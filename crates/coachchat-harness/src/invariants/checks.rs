//! Standard invariant checks.

use std::collections::HashSet;

use super::{Invariant, InvariantResult, StoreSnapshot, Violation};

/// Every message id appears at most once in the visible list.
///
/// Guards the send/echo race: the REST response and the broker echo of the
/// same message must collapse into one entry.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for (id, _) in &state.messages {
            if !seen.insert(*id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("message {id} listed twice"),
                });
            }
        }
        Ok(())
    }
}

/// The visible message list only holds messages of the open conversation.
pub struct OpenConversationMessagesOnly;

impl Invariant for OpenConversationMessagesOnly {
    fn name(&self) -> &'static str {
        "open_conversation_messages_only"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        let stray = state
            .messages
            .iter()
            .find(|(_, conversation_id)| state.open_conversation != Some(*conversation_id));

        match stray {
            Some((id, conversation_id)) => Err(Violation {
                invariant: self.name(),
                message: format!(
                    "message {id} of conversation {conversation_id} shown while {:?} is open",
                    state.open_conversation
                ),
            }),
            None => Ok(()),
        }
    }
}

/// No conversation is listed twice.
pub struct UniqueConversationIds;

impl Invariant for UniqueConversationIds {
    fn name(&self) -> &'static str {
        "unique_conversation_ids"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        match state.conversations.iter().find(|id| !seen.insert(**id)) {
            Some(id) => Err(Violation {
                invariant: self.name(),
                message: format!("conversation {id} listed twice"),
            }),
            None => Ok(()),
        }
    }
}

/// Typing indicators belong to the open conversation.
pub struct TypingScopedToOpenConversation;

impl Invariant for TypingScopedToOpenConversation {
    fn name(&self) -> &'static str {
        "typing_scoped_to_open_conversation"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        for (conversation_id, user_id) in &state.typing {
            if state.open_conversation != Some(*conversation_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {user_id} typing in conversation {conversation_id} while {:?} is open",
                        state.open_conversation
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_message_is_a_violation() {
        let state = StoreSnapshot {
            open_conversation: Some(1),
            messages: vec![(7, 1), (7, 1)],
            ..Default::default()
        };
        assert!(UniqueMessageIds.check(&state).is_err());
    }

    #[test]
    fn stray_message_is_a_violation() {
        let state = StoreSnapshot {
            open_conversation: Some(2),
            messages: vec![(7, 1)],
            ..Default::default()
        };
        assert!(OpenConversationMessagesOnly.check(&state).is_err());
    }

    #[test]
    fn duplicate_conversation_is_a_violation() {
        let state = StoreSnapshot { conversations: vec![1, 2, 1], ..Default::default() };
        assert!(UniqueConversationIds.check(&state).is_err());
    }

    #[test]
    fn typing_elsewhere_is_a_violation() {
        let state =
            StoreSnapshot { open_conversation: Some(1), typing: vec![(2, 5)], ..Default::default() };
        assert!(TypingScopedToOpenConversation.check(&state).is_err());
    }
}
