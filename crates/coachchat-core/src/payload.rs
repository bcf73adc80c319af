//! Broker payload codec.
//!
//! Inbound payloads arrive as JSON objects of the shape
//! `{type, message?, user?, timestamp?}`. [`decode_payload`] turns them into
//! [`ChatEvent`]s. Outbound traffic is limited to the subscription identifier
//! ([`SubscriptionParams`]) and the typing commands ([`ChannelCommand`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::PayloadError,
    event::ChatEvent,
    model::{ConversationId, Message, User},
};

/// Channel name the server routes conversation traffic through.
pub const CHAT_CHANNEL: &str = "ChatChannel";

/// Parameters identifying a conversation channel subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Server-side channel class.
    pub channel: String,
    /// Conversation the subscription is scoped to.
    pub conversation_id: ConversationId,
}

impl SubscriptionParams {
    /// Parameters for the chat channel of `conversation_id`.
    pub fn new(conversation_id: ConversationId) -> Self {
        Self { channel: CHAT_CHANNEL.to_string(), conversation_id }
    }

    /// JSON identifier string the broker uses to address the subscription.
    ///
    /// Keys are emitted in sorted order so the identifier is stable.
    pub fn identifier(&self) -> String {
        json!({ "channel": self.channel, "conversation_id": self.conversation_id }).to_string()
    }
}

/// Commands performed on the active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Current user is typing.
    Typing,
    /// Current user stopped typing.
    StopTyping,
}

impl ChannelCommand {
    /// Server action name.
    pub fn action(self) -> &'static str {
        match self {
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
        }
    }

    /// Action data for `conversation_id`.
    pub fn data(self, conversation_id: ConversationId) -> Value {
        json!({ "conversation_id": conversation_id })
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Decode an inbound broker payload into a [`ChatEvent`].
///
/// Unparseable timestamps are tolerated (the event carries `None`); anything
/// else that does not match the expected shape is an error.
pub fn decode_payload(value: &Value) -> Result<ChatEvent, PayloadError> {
    let raw = RawPayload::deserialize(value).map_err(|e| PayloadError::Json(e.to_string()))?;
    let timestamp = raw.timestamp.as_deref().and_then(parse_timestamp);

    match raw.kind.as_str() {
        "new_message" => raw
            .message
            .map(ChatEvent::NewMessage)
            .ok_or(PayloadError::MissingField { kind: "new_message", field: "message" }),
        "typing" => raw
            .user
            .map(|user| ChatEvent::Typing { user, timestamp })
            .ok_or(PayloadError::MissingField { kind: "typing", field: "user" }),
        "stop_typing" => raw
            .user
            .map(|user| ChatEvent::StopTyping { user, timestamp })
            .ok_or(PayloadError::MissingField { kind: "stop_typing", field: "user" }),
        other => Err(PayloadError::UnknownType(other.to_string())),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}
