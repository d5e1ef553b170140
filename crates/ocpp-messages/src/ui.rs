//! Control-channel (UI) protocol frames
//!
//! Operator requests travel as `["<id>", "<procedure>", {payload}]` and the
//! simulator answers with `["<id>", <response>]`.

use ocpp_types::{OcppError, OcppResult, OcppVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// WebSocket subprotocol spoken on the control channel
pub const UI_PROTOCOL: &str = "ui0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureName {
    ListChargingStations,
    StartTransaction,
    StopTransaction,
}

impl ProcedureName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureName::ListChargingStations => "ListChargingStations",
            ProcedureName::StartTransaction => "StartTransaction",
            ProcedureName::StopTransaction => "StopTransaction",
        }
    }
}

impl std::fmt::Display for ProcedureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcedureName {
    type Err = OcppError;

    fn from_str(s: &str) -> OcppResult<Self> {
        match s {
            "ListChargingStations" => Ok(ProcedureName::ListChargingStations),
            "StartTransaction" => Ok(ProcedureName::StartTransaction),
            "StopTransaction" => Ok(ProcedureName::StopTransaction),
            other => Err(OcppError::protocol_violation(format!(
                "unknown procedure {}",
                other
            ))),
        }
    }
}

/// Operator request frame
#[derive(Debug, Clone, PartialEq)]
pub struct UiRequest {
    pub id: String,
    pub procedure: ProcedureName,
    pub payload: Value,
}

impl UiRequest {
    pub fn to_json(&self) -> OcppResult<String> {
        Ok(serde_json::to_string(&(
            &self.id,
            self.procedure.as_str(),
            &self.payload,
        ))?)
    }

    /// Decode a request frame. On failure the id is returned when it could
    /// be recovered so the host can still answer.
    pub fn parse(text: &str) -> Result<Self, (Option<String>, OcppError)> {
        let value: Value = serde_json::from_str(text).map_err(|e| (None, e.into()))?;
        let mut elements = match value {
            Value::Array(elements) if elements.len() == 3 => elements.into_iter(),
            _ => {
                return Err((
                    None,
                    OcppError::protocol_violation("request is not a 3-element array"),
                ))
            }
        };

        let id = match elements.next() {
            Some(Value::String(id)) => id,
            _ => return Err((None, OcppError::protocol_violation("request id is not a string"))),
        };
        let procedure = match elements.next() {
            Some(Value::String(name)) => match name.parse() {
                Ok(procedure) => procedure,
                Err(e) => return Err((Some(id), e)),
            },
            _ => {
                return Err((
                    Some(id),
                    OcppError::protocol_violation("procedure name is not a string"),
                ))
            }
        };
        let payload = elements.next().unwrap_or(Value::Null);

        Ok(UiRequest {
            id,
            procedure,
            payload,
        })
    }
}

/// Simulator response frame
#[derive(Debug, Clone, PartialEq)]
pub struct UiResponse {
    pub id: String,
    pub payload: Value,
}

impl UiResponse {
    pub fn to_json(&self) -> OcppResult<String> {
        Ok(serde_json::to_string(&(&self.id, &self.payload))?)
    }

    /// Decode a response frame, which must be exactly `[id, response]`
    pub fn parse(text: &str) -> OcppResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                return Err(OcppError::protocol_violation(format!(
                    "response is not an array: {}",
                    other
                )))
            }
        };
        let [id, payload]: [Value; 2] = elements.try_into().map_err(|e: Vec<Value>| {
            OcppError::protocol_violation(format!(
                "response has {} elements, expected 2",
                e.len()
            ))
        })?;
        match id {
            Value::String(id) => Ok(UiResponse { id, payload }),
            other => Err(OcppError::protocol_violation(format!(
                "response id is not a string: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Acknowledgement returned by procedures that post work to a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureAck {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProcedureAck {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failure,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionPayload {
    pub hash_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    /// Procedure echoed inside the payload by operator clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ProcedureName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionPayload {
    pub hash_id: String,
    pub connector_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ProcedureName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSummary {
    pub connector_id: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
}

/// Snapshot of a running station as listed to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSummary {
    pub hash_id: String,
    pub index: usize,
    pub template: String,
    pub ocpp_version: OcppVersion,
    pub registration: String,
    pub started: bool,
    pub connected: bool,
    pub connectors: Vec<ConnectorSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame() {
        let request = UiRequest {
            id: "id1".to_string(),
            procedure: ProcedureName::ListChargingStations,
            payload: json!({}),
        };
        let text = request.to_json().unwrap();
        assert_eq!(text, r#"["id1","ListChargingStations",{}]"#);
        assert_eq!(UiRequest::parse(&text).unwrap(), request);
    }

    #[test]
    fn test_request_with_unknown_procedure_keeps_id() {
        let (id, _) = UiRequest::parse(r#"["id9","Explode",{}]"#).unwrap_err();
        assert_eq!(id.as_deref(), Some("id9"));

        let (id, _) = UiRequest::parse(r#"{"id":"x"}"#).unwrap_err();
        assert!(id.is_none());
    }

    #[test]
    fn test_response_frame_shape() {
        let response = UiResponse::parse(r#"["id1",[{"hashId":"a"}]]"#).unwrap();
        assert_eq!(response.id, "id1");
        assert!(response.payload.is_array());

        assert!(UiResponse::parse(r#"{"id1":1}"#).is_err());
        assert!(UiResponse::parse(r#"["id1"]"#).is_err());
        assert!(UiResponse::parse(r#"["id1",1,2]"#).is_err());
        assert!(UiResponse::parse(r#"[1,{}]"#).is_err());
    }

    #[test]
    fn test_ack_shape() {
        assert_eq!(
            serde_json::to_value(ProcedureAck::success()).unwrap(),
            json!({"status": "success"})
        );
    }

    #[test]
    fn test_start_transaction_payload_names() {
        let payload: StartTransactionPayload =
            serde_json::from_value(json!({"hashId": "h", "connectorId": 1, "idTag": "T"}))
                .unwrap();
        assert_eq!(payload.connector_id, 1);
        assert_eq!(payload.command, None);

        let payload: StopTransactionPayload = serde_json::from_value(
            json!({"hashId": "h", "connectorId": 2, "command": "StopTransaction"}),
        )
        .unwrap();
        assert_eq!(payload.command, Some(ProcedureName::StopTransaction));
    }
}
