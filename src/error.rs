//! Error types for the courier gateway

use thiserror::Error;

/// Result type alias for courier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the courier gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Access-token exchange with the identity provider failed
    #[error("token error: {0}")]
    Token(String),

    /// Inbound media download, staging, or storage upload failed
    #[error("media error: {0}")]
    Media(String),

    /// Outbound media URL unreachable or unusable
    #[error("media fetch error: {0}")]
    MediaFetch(String),

    /// Malformed reply request
    #[error("validation error: {0}")]
    Validation(String),

    /// Both webhook destinations failed for an inbound event
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Messaging channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// Messaging session lost; fatal to the process by design
    #[error("session error: {0}")]
    Session(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
