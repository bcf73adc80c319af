//! Chat domain model.
//!
//! These types are shared by the broker payloads, the REST collaborator and
//! the chat store. Field names follow the server's JSON (`snake_case`), so
//! the same structs deserialize from both the broker and REST responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned conversation identifier.
pub type ConversationId = u64;

/// Server-assigned user identifier.
pub type UserId = u64;

/// Server-assigned message identifier. Identity key for deduplication.
pub type MessageId = u64;

/// Kind of message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment (content holds the URL).
    Image,
    /// File attachment (content holds the URL).
    File,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body.
    pub content: String,
    /// Body kind.
    #[serde(default, alias = "type")]
    pub message_type: MessageType,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
    /// When the recipient read the message. `None` if unread.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// A user as embedded in broker payloads and conversation participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: UserId,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Avatar image URL, if the user has one.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl User {
    /// "First Last", trimmed when either part is missing.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Conversation summary as shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// Messages not yet read by the current user.
    #[serde(default)]
    pub unread_count: u32,
    /// Most recent message, if any.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Timestamp of the most recent message.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Other members of the conversation.
    #[serde(default)]
    pub participants: Vec<User>,
}

impl Conversation {
    /// Create an empty conversation summary.
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            unread_count: 0,
            last_message: None,
            last_message_at: None,
            participants: Vec::new(),
        }
    }

    /// Record `message` as the latest message of this conversation.
    pub fn record_message(&mut self, message: &Message) {
        self.last_message_at = Some(message.created_at);
        self.last_message = Some(message.clone());
    }
}

/// "User is typing" marker, keyed by `(conversation_id, user.id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    /// Conversation the user is typing in.
    pub conversation_id: ConversationId,
    /// The typing user.
    pub user: User,
    /// When the broker reported the keystroke. `None` if absent from payload.
    pub timestamp: Option<DateTime<Utc>>,
}

impl TypingIndicator {
    /// Map key for this indicator.
    pub fn key(&self) -> (ConversationId, UserId) {
        (self.conversation_id, self.user.id)
    }
}
