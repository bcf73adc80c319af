//! Error types for the chat core.
//!
//! Separate errors per concern: connection errors (transport failures,
//! reconnect exhaustion), payload errors (broker messages we cannot
//! interpret) and listener errors (failures inside event listeners).
//!
//! None of these ever escape to the UI as a panic or an unhandled `Err`:
//! connection errors travel as [`crate::ChatEvent::ConnectionError`], payload
//! errors are dropped after logging, listener errors are contained by the
//! [`crate::EventDispatcher`].

use thiserror::Error;

/// Errors reported by the connection layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker transport failed to open or dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// Automatic reconnection gave up.
    ///
    /// Terminal for the current session: only an explicit `connect()` resumes.
    #[error("max reconnection attempts reached")]
    ReconnectExhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },
}

impl ConnectionError {
    /// Returns true if the error may clear up on its own (automatic retry is
    /// still possible).
    ///
    /// Exhaustion is never transient: it needs a user-triggered reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors decoding an inbound broker payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload is not a JSON object of the expected shape.
    #[error("malformed payload: {0}")]
    Json(String),

    /// Payload type requires a field that is absent.
    #[error("{kind} payload without `{field}`")]
    MissingField {
        /// Payload `type` value.
        kind: &'static str,
        /// Missing field name.
        field: &'static str,
    },

    /// Payload `type` is not one we understand.
    #[error("unknown payload type: {0}")]
    UnknownType(String),
}

impl PayloadError {
    /// Returns true if the payload was structurally broken (as opposed to a
    /// well-formed payload of a type this client does not know).
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnknownType(_))
    }
}

/// Error returned by an event listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
