//! Builders for model values and broker payloads.

use chrono::{DateTime, Utc};
use coachchat_core::{ConversationId, Message, MessageId, MessageType, User, UserId};
use serde_json::{Value, json};

/// Seconds since the epoch of the first fixture timestamp.
const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Deterministic timestamp: one second per message id.
pub fn timestamp(id: MessageId) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_TIMESTAMP + id as i64, 0).unwrap_or_default()
}

/// A text message.
pub fn message(
    id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
) -> Message {
    Message {
        id,
        conversation_id,
        sender_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        created_at: timestamp(id),
        read_at: None,
    }
}

/// A user without an avatar.
pub fn user(id: UserId, first_name: &str, last_name: &str) -> User {
    User {
        id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        avatar_url: None,
    }
}

/// `new_message` broker payload.
pub fn new_message_payload(message: &Message) -> Value {
    json!({ "type": "new_message", "message": message })
}

/// `typing` broker payload.
pub fn typing_payload(user: &User) -> Value {
    json!({ "type": "typing", "user": user, "timestamp": timestamp(0).to_rfc3339() })
}

/// `stop_typing` broker payload.
pub fn stop_typing_payload(user: &User) -> Value {
    json!({ "type": "stop_typing", "user": user, "timestamp": timestamp(0).to_rfc3339() })
}

#[cfg(test)]
mod tests {
    use coachchat_core::{ChatEvent, payload::decode_payload};

    use super::*;

    #[test]
    fn payloads_decode_to_events() {
        let coach = user(3, "Ada", "Coach");
        let sent = message(9, 1, 3, "see you at 6");

        assert_eq!(decode_payload(&new_message_payload(&sent)), Ok(ChatEvent::NewMessage(sent)));
        assert!(matches!(
            decode_payload(&typing_payload(&coach)),
            Ok(ChatEvent::Typing { user, timestamp: Some(_) }) if user.id == 3
        ));
        assert!(matches!(
            decode_payload(&stop_typing_payload(&coach)),
            Ok(ChatEvent::StopTyping { .. })
        ));
    }

    #[test]
    fn new_message_payload_shape() {
        insta::assert_snapshot!(
            new_message_payload(&message(1, 2, 3, "hi")).to_string(),
            @r#"{"message":{"content":"hi","conversation_id":2,"created_at":"2023-11-14T22:13:21Z","id":1,"message_type":"text","read_at":null,"sender_id":3},"type":"new_message"}"#
        );
    }
}
