//! Transport layer error types

use thiserror::Error;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// WebSocket connection error
    #[error("WebSocket connection error: {message}")]
    ConnectionError { message: String },

    /// WebSocket protocol error
    #[error("WebSocket protocol error: {message}")]
    ProtocolError { message: String },

    /// Message too large
    #[error("Message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Connection or write timeout
    #[error("Connection timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Connection closed unexpectedly
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Connection not ready
    #[error("Connection not ready, current state: {state:?}")]
    NotReady { state: crate::ConnectionState },

    /// IO error
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Handshake error
    #[error("WebSocket handshake error: {message}")]
    HandshakeError { message: String },
}

impl TransportError {
    pub fn closed(reason: impl Into<String>) -> Self {
        TransportError::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed => {
                TransportError::closed("WebSocket connection closed")
            }
            tungstenite::Error::AlreadyClosed => TransportError::closed("WebSocket already closed"),
            tungstenite::Error::Protocol(msg) => TransportError::ProtocolError {
                message: msg.to_string(),
            },
            tungstenite::Error::Io(io_err) => TransportError::IoError {
                message: io_err.to_string(),
            },
            tungstenite::Error::Http(response) => TransportError::HandshakeError {
                message: format!("HTTP {}", response.status()),
            },
            _ => TransportError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
