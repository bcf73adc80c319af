//! Actions produced by the [`crate::ChatStore`] for the runtime to execute.

use coachchat_core::{ChannelCommand, ConversationId};

use crate::api::{CreateConversationRequest, SendMessageRequest};

/// Side effects requested by the chat store.
///
/// REST actions come back to the store as an [`crate::AppEvent`] carrying
/// either the result or the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Fetch one page of the conversation list.
    FetchConversations {
        /// 1-indexed page.
        page: u32,
    },

    /// Fetch a conversation with one page of messages.
    FetchConversation {
        /// Conversation to fetch.
        conversation_id: ConversationId,
        /// 1-indexed page. Page 1 holds the newest messages.
        page: u32,
    },

    /// Create a conversation.
    CreateConversation {
        /// Request body.
        request: CreateConversationRequest,
    },

    /// Persist a message.
    SendMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Request body.
        request: SendMessageRequest,
    },

    /// Mark a conversation as read.
    MarkAsRead {
        /// Conversation to mark.
        conversation_id: ConversationId,
    },

    /// Subscribe to a conversation's channel.
    Subscribe {
        /// Conversation to subscribe to.
        conversation_id: ConversationId,
    },

    /// Perform a command on the active channel subscription.
    Perform {
        /// Command to perform.
        command: ChannelCommand,
    },
}
