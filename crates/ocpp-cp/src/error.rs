//! # Station Error Handling
//!
//! [`RequestError`] is the outcome of a single OCPP exchange, the type every
//! caller of the request service sees. [`StationError`] covers the station
//! lifecycle around it.

use ocpp_transport::TransportError;
use ocpp_types::{CallErrorCode, OcppError};
use serde_json::Value;
use thiserror::Error;

/// Failure of an OCPP exchange
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport was not open. When `buffered` the frame waits in the
    /// outbound buffer and will be sent on reconnection.
    #[error("Connection closed for {} message id '{message_id}'", buffering_label(.buffered))]
    TransportClosed { message_id: String, buffered: bool },

    /// No response within the deadline
    #[error("Timeout for message id '{message_id}' after {timeout_ms}ms")]
    Timeout { message_id: String, timeout_ms: u64 },

    /// Peer answered with a CallError
    #[error("{code}: {description}")]
    Protocol {
        code: CallErrorCode,
        description: String,
        details: Value,
    },

    /// Admission control rejected an incoming command
    #[error("Security error: {0}")]
    Security(String),

    /// Command unknown or not supported by this station
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Incoming payload failed schema validation
    #[error("Payload validation failed for {command}: {reason}")]
    Validation {
        command: String,
        code: CallErrorCode,
        reason: String,
    },

    /// A command handler failed
    #[error("Handler for {command} failed: {message}")]
    HandlerFault { command: String, message: String },

    /// The correlation id is already in use
    #[error("Duplicate message id '{0}'")]
    DuplicateMessageId(String),

    /// Response with no matching pending request
    #[error("Response for unknown message id '{0}'")]
    UnknownMessageId(String),

    /// Pending request abandoned because the station stopped
    #[error("Request '{0}' cancelled")]
    Cancelled(String),
}

fn buffering_label(buffered: &bool) -> &'static str {
    if *buffered {
        "buffered"
    } else {
        "non buffered"
    }
}

impl RequestError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn handler_fault(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFault {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented(message.into())
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    /// CallError triple sent to the peer when this error answers an incoming Call
    pub fn to_call_error(&self) -> (CallErrorCode, String, Value) {
        let empty = Value::Object(Default::default());
        match self {
            RequestError::Protocol {
                code,
                description,
                details,
            } => (*code, description.clone(), details.clone()),
            RequestError::Security(_) => (CallErrorCode::SecurityError, self.to_string(), empty),
            RequestError::NotImplemented(_) => {
                (CallErrorCode::NotImplemented, self.to_string(), empty)
            }
            RequestError::Validation { code, .. } => (*code, self.to_string(), empty),
            RequestError::Serialization(_) => {
                (CallErrorCode::FormationViolation, self.to_string(), empty)
            }
            RequestError::HandlerFault { .. } => {
                (CallErrorCode::InternalError, self.to_string(), empty)
            }
            _ => (CallErrorCode::GenericError, self.to_string(), empty),
        }
    }

    /// Whether the message will still reach the peer
    pub fn is_buffered(&self) -> bool {
        matches!(self, RequestError::TransportClosed { buffered: true, .. })
    }
}

impl From<OcppError> for RequestError {
    fn from(err: OcppError) -> Self {
        RequestError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::Serialization(err.to_string())
    }
}

pub type RequestResult<T> = Result<T, RequestError>;

/// Station lifecycle errors
#[derive(Error, Debug, Clone)]
pub enum StationError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template error in {file}: {message}")]
    Template { file: String, message: String },

    #[error("Station {0} is not started")]
    NotStarted(String),

    #[error("Connector {0} does not exist")]
    UnknownConnector(u32),

    #[error("No transaction on connector {0}")]
    NoTransaction(u32),

    #[error("Connector {0} already has a transaction")]
    TransactionInProgress(u32),

    #[error("Id tag {0} is not authorized")]
    Unauthorized(String),
}

impl StationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn template(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            file: file.into(),
            message: message.into(),
        }
    }
}

pub type StationResult<T> = Result<T, StationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_closed_display() {
        let buffered = RequestError::TransportClosed {
            message_id: "m1".to_string(),
            buffered: true,
        };
        assert_eq!(
            buffered.to_string(),
            "Connection closed for buffered message id 'm1'"
        );
        assert!(buffered.is_buffered());

        let dropped = RequestError::TransportClosed {
            message_id: "m2".to_string(),
            buffered: false,
        };
        assert!(dropped.to_string().contains("non buffered"));
        assert!(!dropped.is_buffered());
    }

    #[test]
    fn test_call_error_mapping() {
        let (code, _, details) = RequestError::security("not registered").to_call_error();
        assert_eq!(code, CallErrorCode::SecurityError);
        assert_eq!(details, json!({}));

        let (code, description, details) = RequestError::Protocol {
            code: CallErrorCode::PropertyConstraintViolation,
            description: "bad".to_string(),
            details: json!({"field": "idTag"}),
        }
        .to_call_error();
        assert_eq!(code, CallErrorCode::PropertyConstraintViolation);
        assert_eq!(description, "bad");
        assert_eq!(details["field"], "idTag");

        let (code, _, _) = RequestError::handler_fault("Reset", "boom").to_call_error();
        assert_eq!(code, CallErrorCode::InternalError);
    }

    #[test]
    fn test_station_error_from_request_error() {
        let error: StationError = RequestError::Cancelled("x".to_string()).into();
        assert!(matches!(error, StationError::Request(_)));
    }
}
