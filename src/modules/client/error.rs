//! Error taxonomy surfaced to client callers

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Credential missing, invalid or insufficient (401/403). Never retried.
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The last attempt timed out
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// Transport failure or a non-2xx response
    #[error("{}", connection_message(status, message))]
    Connection {
        /// HTTP status when the server answered
        status: Option<u16>,
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("invalid response: {0}")]
    Decode(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

fn connection_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("request failed ({}): {}", status, message),
        None => format!("connection failed: {}", message),
    }
}

impl ClientError {
    /// Transient failures worth another attempt: timeouts, transport errors and 429
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout { .. } => true,
            ClientError::Connection { status: None, .. } => true,
            ClientError::Connection {
                status: Some(429), ..
            } => true,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth { .. })
    }

    /// HTTP status of the failed response, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Auth { status, .. } => Some(*status),
            ClientError::Connection { status, .. } => *status,
            _ => None,
        }
    }
}
