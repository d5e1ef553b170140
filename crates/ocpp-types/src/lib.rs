//! # OCPP Types
//!
//! Foundational types shared by every crate of the fleet simulator: the OCPP-J
//! message envelope codec, the CallError code catalogue, message type tags and
//! the negotiated protocol version.

pub mod error;
pub mod message;

pub use error::*;
pub use message::*;

/// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// OCPP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    #[serde(rename = "1.6")]
    V16J,
    #[serde(rename = "2.0.1", alias = "2.0")]
    V201,
}

impl OcppVersion {
    /// WebSocket subprotocol negotiated for this version
    pub fn subprotocol(&self) -> &'static str {
        match self {
            OcppVersion::V16J => "ocpp1.6",
            OcppVersion::V201 => "ocpp2.0.1",
        }
    }
}

impl Default for OcppVersion {
    fn default() -> Self {
        OcppVersion::V16J
    }
}

impl std::fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcppVersion::V16J => write!(f, "1.6"),
            OcppVersion::V201 => write!(f, "2.0.1"),
        }
    }
}

/// Message type identifier for OCPP messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    /// Label used for statistics and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Call => "call",
            MessageType::CallResult => "call_result",
            MessageType::CallError => "call_error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = OcppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            _ => Err(OcppError::InvalidMessageType(value)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type as u8
    }
}

/// Connector identifier. Connector 0 addresses the station as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(pub u32);

impl ConnectorId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier assigned by the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i32);

impl TransactionId {
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::try_from(2).unwrap(), MessageType::Call);
        assert_eq!(MessageType::try_from(3).unwrap(), MessageType::CallResult);
        assert_eq!(MessageType::try_from(4).unwrap(), MessageType::CallError);
        assert!(MessageType::try_from(1).is_err());
        assert!(MessageType::try_from(5).is_err());

        assert_eq!(u8::from(MessageType::CallError), 4);
    }

    #[test]
    fn test_ocpp_version_serialization() {
        assert_eq!(serde_json::to_string(&OcppVersion::V16J).unwrap(), "\"1.6\"");
        assert_eq!(
            serde_json::to_string(&OcppVersion::V201).unwrap(),
            "\"2.0.1\""
        );

        let legacy: OcppVersion = serde_json::from_str("\"2.0\"").unwrap();
        assert_eq!(legacy, OcppVersion::V201);
        assert_eq!(legacy.subprotocol(), "ocpp2.0.1");
    }

    #[test]
    fn test_connector_id_is_transparent() {
        let connector: ConnectorId = serde_json::from_str("2").unwrap();
        assert_eq!(connector.value(), 2);
        assert_eq!(serde_json::to_string(&TransactionId(77)).unwrap(), "77");
    }
}
