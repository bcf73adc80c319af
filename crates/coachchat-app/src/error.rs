//! Collaborator error types.

use thiserror::Error;

/// Errors returned by the REST chat API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Server answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Server-provided error message.
        message: String,
    },

    /// Request never reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Errors reading the credential store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("credential store unavailable: {0}")]
pub struct CredentialError(pub String);
