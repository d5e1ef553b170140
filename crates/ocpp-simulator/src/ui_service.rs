//! # Operator procedures
//!
//! Answers control-channel requests. Transaction procedures are posted to
//! the addressed station over the control broadcast and acknowledged as soon
//! as they are queued; the outcome is visible through `ListChargingStations`.

use crate::simulator::StationRegistry;
use ocpp_cp::{StationCommand, StationControlMessage};
use ocpp_messages::{
    ProcedureAck, ProcedureName, StartTransactionPayload, StopTransactionPayload, UiRequest,
    UiResponse,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct UiService {
    registry: Arc<StationRegistry>,
    control: broadcast::Sender<StationControlMessage>,
}

impl UiService {
    pub fn new(
        registry: Arc<StationRegistry>,
        control: broadcast::Sender<StationControlMessage>,
    ) -> Self {
        Self { registry, control }
    }

    /// Answer one text frame. Frames without a recoverable id get no answer.
    pub async fn handle_text(&self, text: &str) -> Option<String> {
        let response = match UiRequest::parse(text) {
            Ok(request) => UiResponse {
                payload: self.handle_request(&request).await,
                id: request.id,
            },
            Err((Some(id), e)) => {
                warn!("Rejecting control request {}: {}", id, e);
                UiResponse {
                    id,
                    payload: ack(ProcedureAck::failure(e.to_string())),
                }
            }
            Err((None, e)) => {
                warn!("Dropping malformed control frame: {}", e);
                return None;
            }
        };
        match response.to_json() {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Cannot encode control response {}: {}", response.id, e);
                None
            }
        }
    }

    pub async fn handle_request(&self, request: &UiRequest) -> Value {
        debug!("Control request {} {}", request.id, request.procedure);
        match request.procedure {
            ProcedureName::ListChargingStations => {
                serde_json::to_value(self.registry.summaries().await)
                    .unwrap_or_else(|e| ack(ProcedureAck::failure(e.to_string())))
            }
            ProcedureName::StartTransaction => {
                ack(self.post(&request.payload, |p: StartTransactionPayload| {
                    (
                        p.hash_id,
                        StationCommand::StartTransaction {
                            connector_id: p.connector_id,
                            id_tag: p.id_tag,
                        },
                    )
                }))
            }
            ProcedureName::StopTransaction => {
                ack(self.post(&request.payload, |p: StopTransactionPayload| {
                    (
                        p.hash_id,
                        StationCommand::StopTransaction {
                            connector_id: p.connector_id,
                        },
                    )
                }))
            }
        }
    }

    fn post<P: DeserializeOwned>(
        &self,
        payload: &Value,
        command: impl FnOnce(P) -> (String, StationCommand),
    ) -> ProcedureAck {
        let payload = match P::deserialize(payload) {
            Ok(payload) => payload,
            Err(e) => return ProcedureAck::failure(format!("invalid payload: {}", e)),
        };
        let (hash_id, command) = command(payload);
        if !self.registry.contains(&hash_id) {
            return ProcedureAck::failure(format!("unknown station {}", hash_id));
        }
        match self.control.send(StationControlMessage { hash_id, command }) {
            Ok(_) => ProcedureAck::success(),
            Err(_) => ProcedureAck::failure("no station is listening"),
        }
    }
}

fn ack(ack: ProcedureAck) -> Value {
    serde_json::to_value(ack).unwrap_or(Value::Null)
}
