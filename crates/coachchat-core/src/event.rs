//! Chat events.
//!
//! [`ChatEvent`] is the single event stream produced by the connection and
//! subscription state machines and fanned out by the
//! [`crate::EventDispatcher`]. The chat store is one of its listeners.

use chrono::{DateTime, Utc};

use crate::{
    error::ConnectionError,
    model::{ConversationId, Message, User},
};

/// Events delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Broker connection (or channel subscription) is up.
    Connected,

    /// Broker connection (or channel subscription) went away.
    Disconnected,

    /// Connection-level failure.
    ConnectionError(ConnectionError),

    /// A message arrived on the subscribed conversation.
    NewMessage(Message),

    /// A user started (or kept) typing.
    Typing {
        /// The typing user.
        user: User,
        /// Broker timestamp. `None` if absent or unparseable.
        timestamp: Option<DateTime<Utc>>,
    },

    /// A user stopped typing.
    StopTyping {
        /// The user.
        user: User,
        /// Broker timestamp. `None` if absent or unparseable.
        timestamp: Option<DateTime<Utc>>,
    },

    /// The server denied the channel subscription (authorization failure).
    SubscriptionRejected {
        /// Conversation whose subscription was rejected.
        conversation_id: ConversationId,
    },
}

impl ChatEvent {
    /// Short event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectionError(_) => "error",
            Self::NewMessage(_) => "new_message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::SubscriptionRejected { .. } => "rejected",
        }
    }
}
