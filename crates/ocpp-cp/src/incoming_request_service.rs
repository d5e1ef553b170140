//! Incoming request handling
//!
//! Server-initiated Calls pass an admission gate based on the station
//! registration state, then payload validation, then the version-specific
//! command handler. Every Call gets exactly one reply.

use crate::configuration::HEARTBEAT_INTERVAL;
use crate::error::{RequestError, RequestResult};
use crate::station::{ChargingStation, RegistrationState, StationCommand};
use async_trait::async_trait;
use ocpp_messages::v16j::{
    self, ChangeConfigurationRequest, ChangeConfigurationResponse, ConfigurationStatus,
    GenericStatus, GetConfigurationRequest, GetConfigurationResponse, ResetRequest,
};
use ocpp_messages::validation::{v16j_incoming_schema, v201_incoming_schema};
use ocpp_messages::{v201, IncomingRequestCommand, PayloadSchema};
use ocpp_types::{CallErrorCode, OcppVersion};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Whether a station in `state` may process server-initiated commands
pub fn admit(state: RegistrationState, strict_compliance: bool) -> RequestResult<()> {
    match state {
        RegistrationState::Pending if strict_compliance => Err(RequestError::security(
            "station is pending registration, incoming requests are rejected",
        )),
        RegistrationState::Registered => Ok(()),
        RegistrationState::Unknown if !strict_compliance => Ok(()),
        _ => Err(RequestError::security(format!(
            "station is not registered ({:?}), incoming requests are rejected",
            state
        ))),
    }
}

#[async_trait]
pub trait IncomingRequestService: Send + Sync {
    fn version(&self) -> OcppVersion;

    fn is_supported(&self, command: IncomingRequestCommand) -> bool;

    fn schema(&self, command: IncomingRequestCommand) -> Option<&PayloadSchema>;

    /// Code reported for structurally malformed payloads
    fn formation_violation(&self) -> CallErrorCode;

    /// Run the command handler. Returns the CallResult payload.
    async fn handle(
        &self,
        station: &ChargingStation,
        command: IncomingRequestCommand,
        payload: Value,
    ) -> RequestResult<Value>;

    /// Process an incoming Call and send its reply. Admission, support and
    /// validation rejections are answered here with a CallError; a handler
    /// fault is logged and returned so the caller can answer it.
    async fn incoming_request_handler(
        &self,
        station: &ChargingStation,
        message_id: &str,
        command_name: &str,
        payload: Value,
    ) -> RequestResult<()> {
        let outcome = match admit(
            station.registration_state().await,
            station.is_strict_compliance(),
        ) {
            Ok(()) => self.dispatch(station, command_name, payload).await,
            Err(e) => Err(e),
        };

        let requests = station.request_service();
        match outcome {
            Ok(response) => requests
                .send_response(station, message_id, response, command_name)
                .await
                .map(|_| ()),
            Err(e @ RequestError::HandlerFault { .. }) => {
                error!(
                    "{} Handling incoming request {} '{}' failed: {}",
                    station.log_prefix(),
                    command_name,
                    message_id,
                    e
                );
                Err(e)
            }
            Err(e) => {
                warn!(
                    "{} Incoming request {} '{}' rejected: {}",
                    station.log_prefix(),
                    command_name,
                    message_id,
                    e
                );
                requests
                    .send_error(station, message_id, &e, command_name)
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn dispatch(
        &self,
        station: &ChargingStation,
        command_name: &str,
        payload: Value,
    ) -> RequestResult<Value> {
        let command = command_name
            .parse::<IncomingRequestCommand>()
            .ok()
            .filter(|c| self.is_supported(*c) && station.template().is_incoming_command_enabled(*c))
            .ok_or_else(|| {
                RequestError::not_implemented(format!(
                    "{} incoming request is not supported by OCPP {}",
                    command_name,
                    self.version()
                ))
            })?;

        match self.schema(command) {
            Some(schema) => schema.check(&payload).map_err(|violation| RequestError::Validation {
                command: command.to_string(),
                code: violation.call_error_code(self.formation_violation()),
                reason: violation.to_string(),
            })?,
            None => warn!(
                "{} No JSON schema found for {} payload validation",
                station.log_prefix(),
                command
            ),
        }

        debug!("{} Handling {}", station.log_prefix(), command);
        self.handle(station, command, payload).await
    }
}

pub fn incoming_request_service_for(version: OcppVersion) -> Arc<dyn IncomingRequestService> {
    match version {
        OcppVersion::V16J => Arc::new(V16IncomingRequestService::new()),
        OcppVersion::V201 => Arc::new(V201IncomingRequestService::new()),
    }
}

fn schemas(
    supported: &[IncomingRequestCommand],
    lookup: fn(IncomingRequestCommand) -> Option<PayloadSchema>,
) -> HashMap<IncomingRequestCommand, PayloadSchema> {
    supported
        .iter()
        .filter_map(|command| lookup(*command).map(|schema| (*command, schema)))
        .collect()
}

fn parse_payload<T: DeserializeOwned>(
    command: IncomingRequestCommand,
    payload: Value,
    code: CallErrorCode,
) -> RequestResult<T> {
    serde_json::from_value(payload).map_err(|e| RequestError::Validation {
        command: command.to_string(),
        code,
        reason: e.to_string(),
    })
}

fn reply<T: Serialize>(response: &T) -> RequestResult<Value> {
    serde_json::to_value(response).map_err(RequestError::from)
}

fn post(station: &ChargingStation, command: IncomingRequestCommand, control: StationCommand) -> RequestResult<()> {
    station
        .post_command(control)
        .map_err(|e| RequestError::handler_fault(command.as_str(), e.to_string()))
}

fn clear_authorization_cache(station: &ChargingStation) {
    if let Some(file) = &station.template().authorization_file {
        station.auth_cache().delete_authorized_tags(file);
    }
}

pub struct V16IncomingRequestService {
    schemas: HashMap<IncomingRequestCommand, PayloadSchema>,
}

impl V16IncomingRequestService {
    pub fn new() -> Self {
        Self {
            schemas: schemas(&IncomingRequestCommand::ALL, v16j_incoming_schema),
        }
    }

    fn status(accepted: bool) -> GenericStatus {
        if accepted {
            GenericStatus::Accepted
        } else {
            GenericStatus::Rejected
        }
    }

    async fn remote_start(
        &self,
        station: &ChargingStation,
        request: v16j::RemoteStartTransactionRequest,
    ) -> RequestResult<Value> {
        let connector_id = match request.connector_id {
            Some(id) => Some(id),
            None => station.find_available_connector().await,
        };
        let accepted = match connector_id {
            Some(id) => matches!(station.connector(id).await, Some(c) if !c.has_transaction()),
            None => false,
        };
        if let (true, Some(connector_id)) = (accepted, connector_id) {
            post(
                station,
                IncomingRequestCommand::RemoteStartTransaction,
                StationCommand::StartTransaction {
                    connector_id,
                    id_tag: request.id_tag,
                },
            )?;
        }
        reply(&v16j::RemoteStartStopResponse {
            status: Self::status(accepted),
        })
    }

    async fn remote_stop(
        &self,
        station: &ChargingStation,
        request: v16j::RemoteStopTransactionRequest,
    ) -> RequestResult<Value> {
        let connector_id = station.connector_with_transaction(request.transaction_id).await;
        if let Some(connector_id) = connector_id {
            post(
                station,
                IncomingRequestCommand::RemoteStopTransaction,
                StationCommand::StopTransaction { connector_id },
            )?;
        }
        reply(&v16j::RemoteStartStopResponse {
            status: Self::status(connector_id.is_some()),
        })
    }
}

impl Default for V16IncomingRequestService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncomingRequestService for V16IncomingRequestService {
    fn version(&self) -> OcppVersion {
        OcppVersion::V16J
    }

    fn is_supported(&self, _command: IncomingRequestCommand) -> bool {
        true
    }

    fn schema(&self, command: IncomingRequestCommand) -> Option<&PayloadSchema> {
        self.schemas.get(&command)
    }

    fn formation_violation(&self) -> CallErrorCode {
        CallErrorCode::FormationViolation
    }

    async fn handle(
        &self,
        station: &ChargingStation,
        command: IncomingRequestCommand,
        payload: Value,
    ) -> RequestResult<Value> {
        let code = self.formation_violation();
        match command {
            IncomingRequestCommand::ClearCache => {
                clear_authorization_cache(station);
                reply(&v16j::ClearCacheResponse {
                    status: GenericStatus::Accepted,
                })
            }
            IncomingRequestCommand::Reset => {
                let request: ResetRequest = parse_payload(command, payload, code)?;
                post(
                    station,
                    command,
                    StationCommand::Reset {
                        reset_type: request.reset_type,
                    },
                )?;
                reply(&v16j::ResetResponse {
                    status: GenericStatus::Accepted,
                })
            }
            IncomingRequestCommand::RemoteStartTransaction => {
                self.remote_start(station, parse_payload(command, payload, code)?)
                    .await
            }
            IncomingRequestCommand::RemoteStopTransaction => {
                self.remote_stop(station, parse_payload(command, payload, code)?)
                    .await
            }
            IncomingRequestCommand::GetConfiguration => {
                let request: GetConfigurationRequest = parse_payload(command, payload, code)?;
                let keys = request.key.unwrap_or_default();
                let (configuration_key, unknown_key) =
                    station.configuration().read().await.lookup(&keys);
                reply(&GetConfigurationResponse {
                    configuration_key,
                    unknown_key,
                })
            }
            IncomingRequestCommand::ChangeConfiguration => {
                let request: ChangeConfigurationRequest = parse_payload(command, payload, code)?;
                let status = station
                    .configuration()
                    .write()
                    .await
                    .change(&request.key, &request.value);
                if status == ConfigurationStatus::Accepted && request.key == HEARTBEAT_INTERVAL {
                    debug!(
                        "{} Heartbeat interval changed to {}s",
                        station.log_prefix(),
                        request.value
                    );
                }
                reply(&ChangeConfigurationResponse { status })
            }
        }
    }
}

pub struct V201IncomingRequestService {
    schemas: HashMap<IncomingRequestCommand, PayloadSchema>,
}

impl V201IncomingRequestService {
    const SUPPORTED: [IncomingRequestCommand; 1] = [IncomingRequestCommand::ClearCache];

    pub fn new() -> Self {
        Self {
            schemas: schemas(&Self::SUPPORTED, v201_incoming_schema),
        }
    }
}

impl Default for V201IncomingRequestService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncomingRequestService for V201IncomingRequestService {
    fn version(&self) -> OcppVersion {
        OcppVersion::V201
    }

    fn is_supported(&self, command: IncomingRequestCommand) -> bool {
        Self::SUPPORTED.contains(&command)
    }

    fn schema(&self, command: IncomingRequestCommand) -> Option<&PayloadSchema> {
        self.schemas.get(&command)
    }

    fn formation_violation(&self) -> CallErrorCode {
        CallErrorCode::FormatViolation
    }

    async fn handle(
        &self,
        station: &ChargingStation,
        command: IncomingRequestCommand,
        _payload: Value,
    ) -> RequestResult<Value> {
        match command {
            IncomingRequestCommand::ClearCache => {
                clear_authorization_cache(station);
                reply(&v201::ClearCacheResponse {
                    status: v201::ClearCacheStatus::Accepted,
                    status_info: None,
                })
            }
            other => Err(RequestError::not_implemented(format!(
                "{} incoming request is not supported by OCPP 2.0.1",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::test_support::{open_station, peer_frame, station_with};
    use ocpp_transport::ChannelTransport;
    use serde_json::json;

    #[test]
    fn test_admission_gate() {
        assert!(admit(RegistrationState::Registered, true).is_ok());
        assert!(admit(RegistrationState::Registered, false).is_ok());
        assert!(admit(RegistrationState::Unknown, false).is_ok());
        assert!(matches!(
            admit(RegistrationState::Unknown, true),
            Err(RequestError::Security(_))
        ));
        assert!(matches!(
            admit(RegistrationState::Pending, true),
            Err(RequestError::Security(_))
        ));
        assert!(matches!(
            admit(RegistrationState::Pending, false),
            Err(RequestError::Security(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_cache_before_registration() {
        let (station, _transport, mut peer) = open_station().await;
        station
            .auth_cache()
            .set_authorized_tags("tags.json", vec!["A".to_string()]);

        station.on_message(r#"[2,"abc","ClearCache",{}]"#).await;

        assert_eq!(
            peer_frame(&mut peer).await,
            json!([3, "abc", {"status": "Accepted"}])
        );
    }

    #[tokio::test]
    async fn test_clear_cache_drops_authorized_tags() {
        let station = station_with(|t| t.authorization_file = Some("tags.json".to_string()));
        let (transport, mut peer) = ChannelTransport::new();
        station.attach_transport(transport).await;
        station
            .auth_cache()
            .set_authorized_tags("tags.json", vec!["A".to_string()]);

        station.on_message(r#"[2,"cc-1","ClearCache",{}]"#).await;

        assert_eq!(peer_frame(&mut peer).await[0], 3);
        assert!(!station.auth_cache().has_authorized_tags("tags.json"));
    }

    #[tokio::test]
    async fn test_pending_strict_station_rejects() {
        let station = station_with(|t| t.ocpp_strict_compliance = true);
        let (transport, mut peer) = ChannelTransport::new();
        station.attach_transport(transport).await;
        station.set_registration_state(RegistrationState::Pending).await;

        station.on_message(r#"[2,"x1","GetConfiguration",{}]"#).await;

        let frame = peer_frame(&mut peer).await;
        assert_eq!(frame[0], 4);
        assert_eq!(frame[1], "x1");
        assert_eq!(frame[2], "SecurityError");
    }

    #[tokio::test]
    async fn test_unknown_command_not_implemented() {
        let (station, _transport, mut peer) = open_station().await;

        station.on_message(r#"[2,"u1","DataTransfer",{}]"#).await;

        let frame = peer_frame(&mut peer).await;
        assert_eq!(frame[0], 4);
        assert_eq!(frame[2], "NotImplemented");
    }

    #[tokio::test]
    async fn test_disabled_command_not_implemented() {
        let station = station_with(|t| {
            t.commands_support
                .incoming_commands
                .insert("Reset".to_string(), false);
        });
        let (transport, mut peer) = ChannelTransport::new();
        station.attach_transport(transport).await;

        station.on_message(r#"[2,"r1","Reset",{"type":"Soft"}]"#).await;

        assert_eq!(peer_frame(&mut peer).await[2], "NotImplemented");
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected() {
        let (station, _transport, mut peer) = open_station().await;

        station
            .on_message(r#"[2,"v1","ChangeConfiguration",{"key":"HeartbeatInterval"}]"#)
            .await;
        assert_eq!(peer_frame(&mut peer).await[2], "OccurrenceConstraintViolation");

        station
            .on_message(r#"[2,"v2","Reset",{"type":"Sometimes"}]"#)
            .await;
        assert_eq!(peer_frame(&mut peer).await[2], "PropertyConstraintViolation");
    }

    #[tokio::test]
    async fn test_configuration_round() {
        let (station, _transport, mut peer) = open_station().await;

        station
            .on_message(r#"[2,"c1","ChangeConfiguration",{"key":"HeartbeatInterval","value":"30"}]"#)
            .await;
        assert_eq!(
            peer_frame(&mut peer).await,
            json!([3, "c1", {"status": "Accepted"}])
        );
        assert_eq!(station.heartbeat_interval().await.as_secs(), 30);

        station
            .on_message(r#"[2,"c2","GetConfiguration",{"key":["HeartbeatInterval","Missing"]}]"#)
            .await;
        let frame = peer_frame(&mut peer).await;
        assert_eq!(frame[2]["configurationKey"][0]["value"], "30");
        assert_eq!(frame[2]["unknownKey"], json!(["Missing"]));
    }

    #[tokio::test]
    async fn test_remote_stop_without_transaction_rejected() {
        let (station, _transport, mut peer) = open_station().await;

        station
            .on_message(r#"[2,"rs1","RemoteStopTransaction",{"transactionId":99}]"#)
            .await;

        assert_eq!(
            peer_frame(&mut peer).await,
            json!([3, "rs1", {"status": "Rejected"}])
        );
    }

    #[tokio::test]
    async fn test_reset_without_control_loop_is_internal_error() {
        let (station, _transport, mut peer) = open_station().await;
        station.close_command_queue().await;

        station.on_message(r#"[2,"h1","Reset",{"type":"Hard"}]"#).await;

        let frame = peer_frame(&mut peer).await;
        assert_eq!(frame[0], 4);
        assert_eq!(frame[2], "InternalError");
        assert!(peer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_v201_only_clear_cache() {
        let station = station_with(|t| t.ocpp_version = OcppVersion::V201);
        let (transport, mut peer) = ChannelTransport::new();
        station.attach_transport(transport).await;

        station.on_message(r#"[2,"a","ClearCache",{}]"#).await;
        assert_eq!(
            peer_frame(&mut peer).await,
            json!([3, "a", {"status": "Accepted"}])
        );

        station.on_message(r#"[2,"b","Reset",{"type":"Soft"}]"#).await;
        assert_eq!(peer_frame(&mut peer).await[2], "NotImplemented");

        station
            .on_message(r#"[2,"c","ClearCache",{"unexpected":1}]"#)
            .await;
        assert_eq!(peer_frame(&mut peer).await[2], "FormatViolation");
    }
}
