//! Observable store state for invariant checking.

use coachchat_app::ChatStore;
use coachchat_core::{ConversationId, MessageId, UserId};

/// Snapshot of a chat store's observable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Open conversation.
    pub open_conversation: Option<ConversationId>,
    /// `(message id, conversation id)` of the visible message list, in order.
    pub messages: Vec<(MessageId, ConversationId)>,
    /// Conversation list ids, in order.
    pub conversations: Vec<ConversationId>,
    /// Typing indicator keys.
    pub typing: Vec<(ConversationId, UserId)>,
}

impl StoreSnapshot {
    /// Capture a store.
    pub fn from_store(store: &ChatStore) -> Self {
        let mut typing: Vec<_> = store.typing_indicators().map(|t| t.key()).collect();
        typing.sort_unstable();

        Self {
            open_conversation: store.current_conversation_id(),
            messages: store.messages().iter().map(|m| (m.id, m.conversation_id)).collect(),
            conversations: store.conversations().iter().map(|c| c.id).collect(),
            typing,
        }
    }
}
