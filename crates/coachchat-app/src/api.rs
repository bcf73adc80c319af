//! Collaborator contracts: the REST chat API and the credential store.
//!
//! Both are external to this crate. The runtime only depends on these traits
//! and treats every `Err` as a recoverable failure that is surfaced in the
//! store, never as a fatal error.

use async_trait::async_trait;
use coachchat_core::{Conversation, ConversationId, Message, MessageType, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, CredentialError};

/// Pagination metadata returned by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// 1-indexed page number of this response.
    pub current_page: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

impl PageMeta {
    /// Single-page result.
    pub fn single() -> Self {
        Self { current_page: 1, total_pages: 1 }
    }

    /// Check if a later page exists.
    pub fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }
}

/// One page of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPage {
    /// Conversations on this page, most recent first.
    pub conversations: Vec<Conversation>,
    /// Pagination metadata.
    pub meta: PageMeta,
}

/// A conversation with one page of its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDetail {
    /// Conversation summary.
    pub conversation: Conversation,
    /// Messages on this page, oldest first.
    pub messages: Vec<Message>,
    /// Pagination metadata. Page 1 holds the newest messages.
    pub meta: PageMeta,
}

/// Request body for starting a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    /// User to start the conversation with.
    pub participant_id: UserId,
    /// Optional opening message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
}

/// Request body for sending a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Message body.
    pub content: String,
    /// Body kind.
    pub message_type: MessageType,
}

impl SendMessageRequest {
    /// Plain text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), message_type: MessageType::Text }
    }
}

/// REST conversation and message API.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// List conversations, 1-indexed `page`.
    async fn get_conversations(&self, page: u32) -> Result<ConversationPage, ApiError>;

    /// Fetch a conversation with one page of messages.
    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
        page: u32,
    ) -> Result<ConversationDetail, ApiError>;

    /// Start a conversation.
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApiError>;

    /// Persist a message. Returns the authoritative message with its id.
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        request: SendMessageRequest,
    ) -> Result<Message, ApiError>;

    /// Mark every message of the conversation as read.
    async fn mark_conversation_as_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ApiError>;
}

/// Secure key-value storage holding the auth token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Value stored under `key`. `None` if absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_meta_has_more() {
        assert!(PageMeta { current_page: 1, total_pages: 3 }.has_more());
        assert!(!PageMeta { current_page: 3, total_pages: 3 }.has_more());
        assert!(!PageMeta::single().has_more());
    }

    #[test]
    fn send_request_wire_format() {
        let body = serde_json::to_value(SendMessageRequest::text("hi")).unwrap();
        assert_eq!(body, serde_json::json!({ "content": "hi", "message_type": "text" }));
    }

    #[test]
    fn create_request_omits_missing_message() {
        let body = serde_json::to_value(CreateConversationRequest {
            participant_id: 8,
            initial_message: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "participant_id": 8 }));
    }
}
