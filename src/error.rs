//! Error types for the forwarder.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// RPC codes meaning the destination conversation is gone or closed to us.
///
/// The first three are the peer-invalid class, the last is write-forbidden.
const DESTINATION_UNREACHABLE_CODES: &[&str] = &[
    "PEER_ID_INVALID",
    "CHANNEL_INVALID",
    "CHAT_ID_INVALID",
    "CHAT_WRITE_FORBIDDEN",
];

/// Errors surfaced by the messaging platform client.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Connection closed: {0}")]
    Disconnected(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    /// Whether this error means the destination can never be written to again.
    ///
    /// Matches on the rendered error text, so codes embedded in any variant's
    /// message are recognised.
    pub fn is_destination_unreachable(&self) -> bool {
        let text = self.to_string();
        DESTINATION_UNREACHABLE_CODES
            .iter()
            .any(|code| text.contains(code))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PlatformError::InvalidResponse(e.to_string())
        } else {
            PlatformError::Network(e.to_string())
        }
    }
}

/// Errors from the forwarding core's public surface.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("Rule {0} not found")]
    RuleNotFound(String),

    #[error("Forwarder is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
