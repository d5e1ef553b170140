//! Error types for OCPP envelope handling

use std::str::FromStr;
use thiserror::Error;

/// Main error type for envelope encoding and decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcppError {
    /// Invalid message type identifier
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// JSON serialization/deserialization error
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Frame does not have the shape required by its message type
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Error code outside the OCPP catalogue
    #[error("Unknown error code: {code}")]
    UnknownErrorCode { code: String },
}

impl From<serde_json::Error> for OcppError {
    fn from(err: serde_json::Error) -> Self {
        OcppError::Json {
            message: err.to_string(),
        }
    }
}

impl OcppError {
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        OcppError::ProtocolViolation {
            message: message.into(),
        }
    }
}

/// OCPP Call Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CallErrorCode {
    /// Requested Action is not known by receiver
    NotImplemented,

    /// Requested Action is recognized but not supported by the receiver
    NotSupported,

    /// An internal error occurred and the receiver was not able to process the requested Action successfully
    InternalError,

    /// Payload for Action is incomplete
    ProtocolError,

    /// During the processing of Action a security issue occurred preventing receiver from completing the Action successfully
    SecurityError,

    /// Payload for Action is syntactically incorrect or not conform the PDU structure for Action
    FormationViolation,

    /// OCPP 2.0 spelling of [`CallErrorCode::FormationViolation`]
    FormatViolation,

    /// Payload is syntactically correct but at least one field contains an invalid value
    PropertyConstraintViolation,

    /// Payload for Action is syntactically correct but at least one of the fields violates occurrence constraints
    OccurrenceConstraintViolation,

    /// Payload for Action is syntactically correct but at least one of the fields violates data type constraints (e.g. "somestring": 12)
    TypeConstraintViolation,

    /// Any other error not covered by the above
    GenericError,
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallErrorCode {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::FormatViolation => "FormatViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }
}

impl FromStr for CallErrorCode {
    type Err = OcppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s {
            "NotImplemented" => CallErrorCode::NotImplemented,
            "NotSupported" => CallErrorCode::NotSupported,
            "InternalError" => CallErrorCode::InternalError,
            "ProtocolError" => CallErrorCode::ProtocolError,
            "SecurityError" => CallErrorCode::SecurityError,
            "FormationViolation" => CallErrorCode::FormationViolation,
            "FormatViolation" => CallErrorCode::FormatViolation,
            "PropertyConstraintViolation" => CallErrorCode::PropertyConstraintViolation,
            "OccurrenceConstraintViolation" | "OccurenceConstraintViolation" => {
                CallErrorCode::OccurrenceConstraintViolation
            }
            "TypeConstraintViolation" => CallErrorCode::TypeConstraintViolation,
            "GenericError" => CallErrorCode::GenericError,
            other => {
                return Err(OcppError::UnknownErrorCode {
                    code: other.to_string(),
                })
            }
        };
        Ok(code)
    }
}

/// Result type alias for OCPP operations
pub type OcppResult<T> = Result<T, OcppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_code_serialization() {
        let error = CallErrorCode::NotImplemented;
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, "\"NotImplemented\"");

        let deserialized: CallErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, CallErrorCode::NotImplemented);
    }

    #[test]
    fn test_call_error_code_from_str() {
        assert_eq!(
            "SecurityError".parse::<CallErrorCode>().unwrap(),
            CallErrorCode::SecurityError
        );
        // OCPP 1.6 schemas carry the misspelled variant
        assert_eq!(
            "OccurenceConstraintViolation".parse::<CallErrorCode>().unwrap(),
            CallErrorCode::OccurrenceConstraintViolation
        );
        assert!(matches!(
            "Nope".parse::<CallErrorCode>(),
            Err(OcppError::UnknownErrorCode { .. })
        ));
    }

    #[test]
    fn test_ocpp_error_from_serde_json() {
        let json_error = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let ocpp_error = OcppError::from(json_error);

        match ocpp_error {
            OcppError::Json { message } => assert!(!message.is_empty()),
            _ => panic!("Expected Json error"),
        }
    }
}
