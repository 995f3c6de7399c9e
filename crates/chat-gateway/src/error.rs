//! Error types for the chat gateway

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chat gateway
///
/// None of these are fatal to the process. Read and write failures end the
/// connection through [`crate::CloseReason::TransportError`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Message bus errors (subscribe / publish)
    #[error("Message bus error: {0}")]
    Bus(#[from] anyhow::Error),

    /// Malformed bus payload or inbound frame
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Connection refused before it became active
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}
