//! Events consumed by the [`crate::ChatStore`].

use coachchat_core::{ChatEvent, Conversation, ConversationId, Message};

use crate::{
    api::{ConversationDetail, ConversationPage},
    error::ApiError,
};

/// Events processed by the chat store.
///
/// Broker events arrive wrapped in [`AppEvent::Chat`]; the rest are results
/// of REST calls the runtime made on the store's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Realtime event from the broker or the connection manager.
    Chat(ChatEvent),

    /// A page of the conversation list arrived.
    ConversationsLoaded {
        /// The page.
        page: ConversationPage,
    },

    /// A conversation snapshot arrived.
    ConversationLoaded {
        /// Conversation and one page of its messages.
        detail: ConversationDetail,
    },

    /// A new conversation was created.
    ConversationCreated {
        /// The persisted conversation.
        conversation: Conversation,
    },

    /// A message was persisted.
    MessageSent {
        /// Authoritative message returned by the server.
        message: Message,
    },

    /// Persisting a message failed.
    SendFailed {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Content the user tried to send.
        content: String,
        /// Why the request failed.
        error: ApiError,
    },

    /// Mark-as-read succeeded.
    MarkedRead {
        /// Conversation that was marked read.
        conversation_id: ConversationId,
    },

    /// Any other REST call failed.
    RequestFailed {
        /// Why the request failed.
        error: ApiError,
    },
}

impl From<ChatEvent> for AppEvent {
    fn from(event: ChatEvent) -> Self {
        Self::Chat(event)
    }
}
