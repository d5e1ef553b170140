//! Message envelope types for OCPP-J
//!
//! Every frame on the wire is a JSON array whose first element is the
//! [`MessageType`] tag:
//!
//! ```text
//! [2, "<id>", "<action>", {payload}]
//! [3, "<id>", {payload}]
//! [4, "<id>", "<errorCode>", "<errorDescription>", {errorDetails}]
//! ```

use crate::{CallErrorCode, MessageType, OcppError, OcppResult};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generate a process-unique message id
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// OCPP message envelope that wraps all message types
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call message (request)
    Call(CallMessage),
    /// CallResult message (successful response)
    CallResult(CallResultMessage),
    /// CallError message (error response)
    CallError(CallErrorMessage),
}

impl Message {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Call(_) => MessageType::Call,
            Message::CallResult(_) => MessageType::CallResult,
            Message::CallError(_) => MessageType::CallError,
        }
    }

    /// Get the unique message ID
    pub fn unique_id(&self) -> &str {
        match self {
            Message::Call(msg) => &msg.unique_id,
            Message::CallResult(msg) => &msg.unique_id,
            Message::CallError(msg) => &msg.unique_id,
        }
    }

    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Message::Call(CallMessage {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        })
    }

    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        Message::CallResult(CallResultMessage {
            unique_id: unique_id.into(),
            payload,
        })
    }

    pub fn call_error(
        unique_id: impl Into<String>,
        error_code: CallErrorCode,
        error_description: impl Into<String>,
        error_details: Option<Value>,
    ) -> Self {
        Message::CallError(CallErrorMessage::new(
            unique_id.into(),
            error_code,
            error_description.into(),
            error_details,
        ))
    }

    /// Decode a text frame
    pub fn parse(text: &str) -> OcppResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Array(elements) => Self::from_elements(elements),
            other => Err(OcppError::protocol_violation(format!(
                "frame is not an array: {}",
                other
            ))),
        }
    }

    /// Encode into a text frame
    pub fn to_json(&self) -> OcppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_elements(elements: Vec<Value>) -> OcppResult<Self> {
        let mut fields = elements.into_iter();

        let tag = fields
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| OcppError::protocol_violation("missing message type id"))?;
        let message_type = u8::try_from(tag)
            .map_err(|_| OcppError::InvalidMessageType(u8::MAX))
            .and_then(MessageType::try_from)?;

        let unique_id = next_string(&mut fields, "message id")?;

        let message = match message_type {
            MessageType::Call => {
                let action = next_string(&mut fields, "action")?;
                let payload = fields
                    .next()
                    .ok_or_else(|| OcppError::protocol_violation("call without payload"))?;
                Message::Call(CallMessage {
                    unique_id,
                    action,
                    payload,
                })
            }
            MessageType::CallResult => {
                let payload = fields
                    .next()
                    .ok_or_else(|| OcppError::protocol_violation("call result without payload"))?;
                Message::CallResult(CallResultMessage { unique_id, payload })
            }
            MessageType::CallError => {
                let code = next_string(&mut fields, "error code")?;
                let error_description = match fields.next() {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => {
                        return Err(OcppError::protocol_violation(format!(
                            "error description is not a string: {}",
                            other
                        )))
                    }
                };
                // Codes outside the catalogue still correlate with their Call.
                let error_code = code.parse().unwrap_or(CallErrorCode::GenericError);
                Message::CallError(CallErrorMessage::new(
                    unique_id,
                    error_code,
                    error_description,
                    fields.next(),
                ))
            }
        };

        if fields.next().is_some() {
            return Err(OcppError::protocol_violation(format!(
                "too many elements for {:?}",
                message_type
            )));
        }
        Ok(message)
    }
}

fn next_string(fields: &mut impl Iterator<Item = Value>, what: &str) -> OcppResult<String> {
    match fields.next() {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(OcppError::protocol_violation(format!(
            "{} is not a string: {}",
            what, other
        ))),
        None => Err(OcppError::protocol_violation(format!("missing {}", what))),
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Message::Call(msg) => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element(&u8::from(MessageType::Call))?;
                seq.serialize_element(&msg.unique_id)?;
                seq.serialize_element(&msg.action)?;
                seq.serialize_element(&msg.payload)?;
                seq.end()
            }
            Message::CallResult(msg) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&u8::from(MessageType::CallResult))?;
                seq.serialize_element(&msg.unique_id)?;
                seq.serialize_element(&msg.payload)?;
                seq.end()
            }
            Message::CallError(msg) => {
                let mut seq = serializer.serialize_seq(Some(5))?;
                seq.serialize_element(&u8::from(MessageType::CallError))?;
                seq.serialize_element(&msg.unique_id)?;
                seq.serialize_element(msg.error_code.as_str())?;
                seq.serialize_element(&msg.error_description)?;
                seq.serialize_element(&msg.error_details)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let elements = Vec::<Value>::deserialize(deserializer)?;
        Message::from_elements(elements).map_err(de::Error::custom)
    }
}

/// OCPP Call message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct CallMessage {
    /// Unique message identifier
    pub unique_id: String,
    /// Action name (e.g., "Authorize", "StartTransaction")
    pub action: String,
    /// Message payload
    pub payload: Value,
}

impl CallMessage {
    /// Create a new Call message with a fresh id
    pub fn new<T>(action: String, payload: T) -> OcppResult<Self>
    where
        T: Serialize,
    {
        Ok(CallMessage {
            unique_id: new_message_id(),
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Extract the payload as a specific type
    pub fn payload_as<T>(&self) -> OcppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CallResult message (successful response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResultMessage {
    /// Unique message identifier (same as corresponding Call)
    pub unique_id: String,
    /// Response payload
    pub payload: Value,
}

impl CallResultMessage {
    /// Extract the payload as a specific type
    pub fn payload_as<T>(&self) -> OcppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CallError message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallErrorMessage {
    /// Unique message identifier (same as corresponding Call)
    pub unique_id: String,
    /// Error code
    pub error_code: CallErrorCode,
    /// Human-readable error description
    pub error_description: String,
    /// Additional error details
    pub error_details: Value,
}

impl CallErrorMessage {
    /// Create a new CallError message, details default to `{}`
    pub fn new(
        unique_id: String,
        error_code: CallErrorCode,
        error_description: String,
        error_details: Option<Value>,
    ) -> Self {
        CallErrorMessage {
            unique_id,
            error_code,
            error_description,
            error_details: error_details.unwrap_or(Value::Object(Default::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_format() {
        let msg = Message::call("abc", "Heartbeat", json!({}));
        assert_eq!(msg.to_json().unwrap(), r#"[2,"abc","Heartbeat",{}]"#);
    }

    #[test]
    fn test_call_error_defaults_details() {
        let msg = Message::call_error("x1", CallErrorCode::SecurityError, "pending", None);
        assert_eq!(
            msg.to_json().unwrap(),
            r#"[4,"x1","SecurityError","pending",{}]"#
        );
    }

    #[test]
    fn test_parse_each_shape() {
        let call = Message::parse(r#"[2,"1","ClearCache",{}]"#).unwrap();
        assert_eq!(call.message_type(), MessageType::Call);
        assert_eq!(call.unique_id(), "1");

        let result = Message::parse(r#"[3,"1",{"status":"Accepted"}]"#).unwrap();
        match result {
            Message::CallResult(r) => assert_eq!(r.payload["status"], "Accepted"),
            _ => panic!("Expected CallResult"),
        }

        let error = Message::parse(r#"[4,"1","NotImplemented","nope",{"a":1}]"#).unwrap();
        match error {
            Message::CallError(e) => {
                assert_eq!(e.error_code, CallErrorCode::NotImplemented);
                assert_eq!(e.error_description, "nope");
                assert_eq!(e.error_details, json!({"a": 1}));
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_reencode_preserves_frame() {
        for frame in [
            r#"[2,"a-1","StartTransaction",{"connectorId":1,"idTag":"TAG"}]"#,
            r#"[3,"a-1",{"transactionId":5}]"#,
            r#"[4,"a-1","GenericError","",{}]"#,
        ] {
            assert_eq!(Message::parse(frame).unwrap().to_json().unwrap(), frame);
        }
    }

    #[test]
    fn test_call_error_without_details() {
        let msg = Message::parse(r#"[4,"z","InternalError","boom"]"#).unwrap();
        match msg {
            Message::CallError(e) => assert_eq!(e.error_details, json!({})),
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_unknown_error_code_still_correlates() {
        let msg = Message::parse(r#"[4,"z","Weird","?",{}]"#).unwrap();
        assert_eq!(msg.unique_id(), "z");
        match msg {
            Message::CallError(e) => assert_eq!(e.error_code, CallErrorCode::GenericError),
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_frames() {
        assert!(matches!(
            Message::parse(r#"{"not":"an array"}"#),
            Err(OcppError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            Message::parse(r#"[5,"id",{}]"#),
            Err(OcppError::InvalidMessageType(5))
        ));
        assert!(Message::parse(r#"[2,"id","Heartbeat"]"#).is_err());
        assert!(Message::parse(r#"[3,"id",{},{}]"#).is_err());
        assert!(Message::parse(r#"[2,7,"Heartbeat",{}]"#).is_err());
        assert!(matches!(
            Message::parse("not json"),
            Err(OcppError::Json { .. })
        ));
    }

    #[test]
    fn test_payload_extraction() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TestPayload {
            id_tag: String,
        }

        let payload = TestPayload {
            id_tag: "TEST123".to_string(),
        };

        let msg = CallMessage::new("Authorize".to_string(), &payload).unwrap();
        assert!(!msg.unique_id.is_empty());
        let extracted: TestPayload = msg.payload_as().unwrap();

        assert_eq!(extracted, payload);
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}
