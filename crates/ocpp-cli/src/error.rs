//! Control-channel client errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UiClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// Frame that is not a well-formed response to an outstanding request
    #[error("Channel protocol violation: {0}")]
    ChannelProtocolViolation(String),

    #[error("Request {id} ({procedure}) timed out")]
    Timeout { id: String, procedure: String },

    #[error("Connection closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for UiClientError {
    fn from(err: serde_json::Error) -> Self {
        UiClientError::Serialization(err.to_string())
    }
}

pub type UiClientResult<T> = Result<T, UiClientError>;
