//! Request service
//!
//! Builds outbound frames, correlates Calls with their responses and applies
//! the buffering and timeout policy. All traffic of a station, including the
//! responses to server-initiated Calls, goes through [`RequestService::send_message`].

use crate::error::{RequestError, RequestResult};
use crate::pending::PendingRequest;
use crate::response_service::ResponseService;
use crate::statistics::{StatisticsPhase, StatisticsSink};
use crate::station::ChargingStation;
use chrono::Utc;
use ocpp_messages::v16j::{
    self, AuthorizationStatus, ChargePointErrorCode, ChargePointStatus, MeterValue, Reason,
    RegistrationStatus, SampledValue,
};
use ocpp_messages::{v201, OcppAction, RequestCommand};
use ocpp_transport::{Transport, TransportError};
use ocpp_types::{new_message_id, CallErrorCode, Message, MessageType, OcppVersion};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Default deadline for a Call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RequestService {
    version: OcppVersion,
    response_service: Arc<dyn ResponseService>,
    timeout: Duration,
}

impl RequestService {
    pub fn new(
        version: OcppVersion,
        response_service: Arc<dyn ResponseService>,
        timeout: Duration,
    ) -> Self {
        Self {
            version,
            response_service,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a frame of any type.
    ///
    /// A Call resolves with the dispatched response payload; CallResult and
    /// CallError resolve with `params` once written. While the transport is
    /// closed the frame is buffered unless `skip_buffering_on_error` is set.
    /// A buffered Call stays in the pending table without a deadline, so a
    /// response to its later transmission is still dispatched.
    pub async fn send_message(
        &self,
        station: &ChargingStation,
        message_id: &str,
        params: Value,
        message_type: MessageType,
        command_name: &str,
        skip_buffering_on_error: bool,
    ) -> RequestResult<Value> {
        let frame = build_message(message_id, &params, message_type, command_name).to_json()?;

        let waiter = match message_type {
            MessageType::Call => {
                let command: RequestCommand = command_name
                    .parse()
                    .map_err(|_| RequestError::not_implemented(command_name))?;
                let (tx, rx) = oneshot::channel();
                station.requests().insert(
                    message_id,
                    PendingRequest::new(command, params.clone(), tx),
                )?;
                Some(rx)
            }
            _ => None,
        };

        record(station, command_name, message_type, StatisticsPhase::Sent);

        if let Err(failure) = self
            .write_or_buffer(station, frame, command_name, skip_buffering_on_error)
            .await
        {
            let buffered = failure == WriteFailure::Buffered;
            let error = match failure {
                WriteFailure::Rejected(reason) => RequestError::serialization(format!(
                    "Message id '{}' rejected by transport: {}",
                    message_id, reason
                )),
                _ => RequestError::TransportClosed {
                    message_id: message_id.to_string(),
                    buffered,
                },
            };
            if message_type == MessageType::Call {
                if buffered {
                    station.requests().detach_waiter(message_id);
                } else {
                    station.requests().take(message_id);
                }
            }
            log_rejection(station, &error, command_name, &params);
            return Err(error);
        }

        let Some(waiter) = waiter else {
            return Ok(params);
        };

        let deadline = tokio::spawn(expire(
            station.requests().clone(),
            station.statistics().cloned(),
            station.log_prefix().to_string(),
            message_id.to_string(),
            command_name.to_string(),
            self.timeout,
        ));
        station
            .requests()
            .arm_deadline(message_id, deadline.abort_handle());

        waiter
            .await
            .unwrap_or_else(|_| Err(RequestError::Cancelled(message_id.to_string())))
    }

    /// Write `frame`, draining older buffered frames first. When the
    /// connection fails the frame is buffered unless `skip_buffering`; a frame
    /// the transport refuses on its own is never buffered.
    async fn write_or_buffer(
        &self,
        station: &ChargingStation,
        frame: String,
        command_name: &str,
        skip_buffering: bool,
    ) -> Result<(), WriteFailure> {
        let mut buffer = station.outbound_buffer().lock().await;

        if let Some(connection) = station.connection().await {
            drain(station, &mut buffer, connection.as_ref()).await;
            if buffer.is_empty() && connection.is_open() {
                let started = Instant::now();
                match connection.send_text(frame.clone()).await {
                    Ok(()) => {
                        if let Some(stats) = station.statistics() {
                            stats.record_latency(command_name, started.elapsed());
                        }
                        return Ok(());
                    }
                    Err(e) if !is_connection_failure(&e, connection.as_ref()) => {
                        warn!(
                            "{} Write of {} refused, message dropped: {}",
                            station.log_prefix(),
                            command_name,
                            e
                        );
                        return Err(WriteFailure::Rejected(e.to_string()));
                    }
                    Err(e) => {
                        warn!(
                            "{} Write of {} failed, connection treated as closed: {}",
                            station.log_prefix(),
                            command_name,
                            e
                        );
                        station.notify_disconnected();
                    }
                }
            }
        }

        if skip_buffering {
            return Err(WriteFailure::Dropped);
        }
        buffer.push_back(frame);
        Err(WriteFailure::Buffered)
    }

    /// Send buffered frames in FIFO order. Stops when the connection fails,
    /// keeping the unsent frames.
    pub async fn flush_message_buffer(&self, station: &ChargingStation) {
        let mut buffer = station.outbound_buffer().lock().await;
        if buffer.is_empty() {
            return;
        }
        match station.connection().await {
            Some(connection) => {
                let before = buffer.len();
                drain(station, &mut buffer, connection.as_ref()).await;
                info!(
                    "{} Flushed {} buffered message(s), {} left",
                    station.log_prefix(),
                    before - buffer.len(),
                    buffer.len()
                );
            }
            None => debug!(
                "{} No connection to flush {} buffered message(s)",
                station.log_prefix(),
                buffer.len()
            ),
        }
    }

    /// Resolve a pending Call from a CallResult or CallError
    pub async fn handle_response(
        &self,
        station: &ChargingStation,
        message: Message,
    ) -> RequestResult<()> {
        match message {
            Message::CallResult(result) => {
                let request = station
                    .requests()
                    .take(&result.unique_id)
                    .ok_or_else(|| RequestError::UnknownMessageId(result.unique_id.clone()))?;
                let command = request.command;
                record(
                    station,
                    command.as_str(),
                    MessageType::CallResult,
                    StatisticsPhase::Received,
                );

                let outcome = self
                    .response_service
                    .handle_response(station, command, result.payload, &request.params)
                    .await;
                if let Err(e) = &outcome {
                    log_rejection(station, e, command.as_str(), &request.params);
                }
                request.resolve(outcome);
                Ok(())
            }
            Message::CallError(call_error) => {
                let request = station
                    .requests()
                    .take(&call_error.unique_id)
                    .ok_or_else(|| RequestError::UnknownMessageId(call_error.unique_id.clone()))?;
                record(
                    station,
                    request.command.as_str(),
                    MessageType::CallError,
                    StatisticsPhase::Error,
                );

                let error = RequestError::Protocol {
                    code: call_error.error_code,
                    description: call_error.error_description,
                    details: call_error.error_details,
                };
                log_rejection(station, &error, request.command.as_str(), &request.params);
                request.resolve(Err(error));
                Ok(())
            }
            Message::Call(call) => Err(RequestError::serialization(format!(
                "Call '{}' is not a response",
                call.unique_id
            ))),
        }
    }

    /// Answer an incoming Call
    pub async fn send_response(
        &self,
        station: &ChargingStation,
        message_id: &str,
        payload: Value,
        command_name: &str,
    ) -> RequestResult<Value> {
        self.send_message(
            station,
            message_id,
            payload,
            MessageType::CallResult,
            command_name,
            false,
        )
        .await
    }

    /// Reject an incoming Call
    pub async fn send_error(
        &self,
        station: &ChargingStation,
        message_id: &str,
        error: &RequestError,
        command_name: &str,
    ) -> RequestResult<Value> {
        let (code, message, details) = error.to_call_error();
        self.send_message(
            station,
            message_id,
            json!({ "code": code, "message": message, "details": details }),
            MessageType::CallError,
            command_name,
            false,
        )
        .await
    }

    async fn call<T: OcppAction>(
        &self,
        station: &ChargingStation,
        payload: &T,
    ) -> RequestResult<Value> {
        let command: RequestCommand = T::ACTION_NAME.parse()?;
        if !station.template().is_outgoing_command_enabled(command) {
            return Err(RequestError::not_implemented(format!(
                "{} is disabled for this station",
                command
            )));
        }
        let params = serde_json::to_value(payload)?;
        self.send_message(
            station,
            &new_message_id(),
            params,
            MessageType::Call,
            command.as_str(),
            false,
        )
        .await
    }

    fn unsupported(&self, command: RequestCommand) -> RequestError {
        RequestError::not_implemented(format!(
            "{} is not supported by OCPP {}",
            command, self.version
        ))
    }

    pub async fn send_boot_notification(
        &self,
        station: &ChargingStation,
    ) -> RequestResult<RegistrationStatus> {
        let template = station.template();
        let response = match self.version {
            OcppVersion::V16J => {
                self.call(
                    station,
                    &v16j::BootNotificationRequest {
                        charge_point_vendor: template.charge_point_vendor.clone(),
                        charge_point_model: template.charge_point_model.clone(),
                        charge_point_serial_number: Some(station.station_name().to_string()),
                        charge_box_serial_number: None,
                        firmware_version: template.firmware_version.clone(),
                    },
                )
                .await?
            }
            OcppVersion::V201 => {
                self.call(
                    station,
                    &v201::BootNotificationRequest {
                        reason: v201::BootReason::PowerUp,
                        charging_station: v201::ChargingStation {
                            model: template.charge_point_model.clone(),
                            vendor_name: template.charge_point_vendor.clone(),
                            serial_number: Some(station.station_name().to_string()),
                            firmware_version: template.firmware_version.clone(),
                        },
                    },
                )
                .await?
            }
        };
        Ok(decode::<v16j::BootNotificationResponse>(response)?.status)
    }

    pub async fn send_heartbeat(&self, station: &ChargingStation) -> RequestResult<()> {
        self.call(station, &v16j::HeartbeatRequest::default())
            .await
        .map(|_| ())
    }

    pub async fn send_status_notification(
        &self,
        station: &ChargingStation,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: Option<ChargePointErrorCode>,
    ) -> RequestResult<()> {
        let response = match self.version {
            OcppVersion::V16J => {
                self.call(
                    station,
                    &v16j::StatusNotificationRequest {
                        connector_id,
                        error_code: error_code.unwrap_or(ChargePointErrorCode::NoError),
                        status,
                        timestamp: Some(Utc::now()),
                    },
                )
                .await
            }
            OcppVersion::V201 => {
                self.call(
                    station,
                    &v201::StatusNotificationRequest {
                        timestamp: Utc::now(),
                        connector_status: connector_status_v201(status),
                        evse_id: connector_id,
                        connector_id: 1,
                    },
                )
                .await
            }
        };
        response.map(|_| ())
    }

    pub async fn send_authorize(
        &self,
        station: &ChargingStation,
        connector_id: u32,
        id_tag: &str,
    ) -> RequestResult<AuthorizationStatus> {
        if self.version != OcppVersion::V16J {
            return Err(self.unsupported(RequestCommand::Authorize));
        }
        let response = self
            .call(
                station,
                &v16j::AuthorizeRequest {
                    id_tag: id_tag.to_string(),
                },
            )
            .await?;
        let status = decode::<v16j::AuthorizeResponse>(response)?.id_tag_info.status;
        station
            .update_connector(connector_id, |c| {
                c.authorized = status == AuthorizationStatus::Accepted
            })
            .await;
        Ok(status)
    }

    pub async fn send_start_transaction(
        &self,
        station: &ChargingStation,
        connector_id: u32,
        id_tag: &str,
    ) -> RequestResult<v16j::StartTransactionResponse> {
        if self.version != OcppVersion::V16J {
            return Err(self.unsupported(RequestCommand::StartTransaction));
        }
        let meter_start = station
            .connector(connector_id)
            .await
            .map(|c| c.energy_register)
            .unwrap_or_default();
        let response = self
            .call(
                station,
                &v16j::StartTransactionRequest {
                    connector_id,
                    id_tag: id_tag.to_string(),
                    meter_start: clamp_meter(meter_start),
                    timestamp: Utc::now(),
                },
            )
            .await?;
        decode(response)
    }

    pub async fn send_stop_transaction(
        &self,
        station: &ChargingStation,
        transaction_id: i32,
        meter_stop: i64,
        id_tag: Option<String>,
        reason: Option<Reason>,
    ) -> RequestResult<v16j::StopTransactionResponse> {
        if self.version != OcppVersion::V16J {
            return Err(self.unsupported(RequestCommand::StopTransaction));
        }
        let response = self
            .call(
                station,
                &v16j::StopTransactionRequest {
                    id_tag,
                    meter_stop: clamp_meter(meter_stop),
                    timestamp: Utc::now(),
                    transaction_id,
                    reason,
                },
            )
            .await?;
        decode(response)
    }

    /// Sample the connector energy register over `interval` and send it
    pub async fn send_meter_values(
        &self,
        station: &ChargingStation,
        connector_id: u32,
        transaction_id: i32,
        interval: Duration,
    ) -> RequestResult<()> {
        if self.version != OcppVersion::V16J {
            return Err(self.unsupported(RequestCommand::MeterValues));
        }
        let max_power = station.template().max_power;
        let reading = station
            .update_connector(connector_id, |c| c.add_energy(max_power, interval))
            .await
            .ok_or_else(|| {
                RequestError::serialization(format!("connector {} does not exist", connector_id))
            })?;
        self.call(
            station,
            &v16j::MeterValuesRequest {
                connector_id,
                transaction_id: Some(transaction_id),
                meter_values: vec![MeterValue {
                    timestamp: Utc::now(),
                    sampled_value: vec![SampledValue {
                        value: reading.to_string(),
                        measurand: Some("Energy.Active.Import.Register".to_string()),
                        unit: Some("Wh".to_string()),
                    }],
                }],
            },
        )
        .await
        .map(|_| ())
    }
}

fn build_message(
    message_id: &str,
    params: &Value,
    message_type: MessageType,
    command_name: &str,
) -> Message {
    match message_type {
        MessageType::Call => Message::call(message_id, command_name, params.clone()),
        MessageType::CallResult => Message::call_result(message_id, params.clone()),
        MessageType::CallError => {
            let code = params
                .get("code")
                .and_then(Value::as_str)
                .and_then(|c| c.parse().ok())
                .unwrap_or(CallErrorCode::GenericError);
            let description = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Message::call_error(
                message_id,
                code,
                description,
                params.get("details").cloned(),
            )
        }
    }
}

/// Outcome of a write that did not reach the peer
#[derive(Debug, PartialEq)]
enum WriteFailure {
    /// Connection down, frame queued for the next one
    Buffered,
    /// Connection down, frame discarded
    Dropped,
    /// Connection fine, the transport refused this frame
    Rejected(String),
}

/// A write error condemns the connection unless it was about the frame
/// itself or the transport still reports itself open.
fn is_connection_failure(error: &TransportError, connection: &dyn Transport) -> bool {
    !matches!(error, TransportError::MessageTooLarge { .. }) && !connection.is_open()
}

async fn drain(station: &ChargingStation, buffer: &mut VecDeque<String>, connection: &dyn Transport) {
    while connection.is_open() {
        let Some(frame) = buffer.front().cloned() else {
            break;
        };
        match connection.send_text(frame).await {
            Ok(()) => {
                buffer.pop_front();
            }
            Err(e) if !is_connection_failure(&e, connection) => {
                let frame = buffer.pop_front().unwrap_or_default();
                error!(
                    "{} Discarding buffered message refused by transport ({}): {:.120}",
                    station.log_prefix(),
                    e,
                    frame
                );
            }
            Err(e) => {
                warn!(
                    "{} Flush of buffered message failed: {}",
                    station.log_prefix(),
                    e
                );
                station.notify_disconnected();
                break;
            }
        }
    }
}

async fn expire(
    requests: crate::pending::PendingRequestTable,
    statistics: Option<Arc<dyn StatisticsSink>>,
    log_prefix: String,
    message_id: String,
    command_name: String,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;
    let Some(request) = requests.take(&message_id) else {
        return;
    };
    if let Some(stats) = &statistics {
        stats.record_sample(&command_name, MessageType::Call, StatisticsPhase::Timeout);
    }
    let error = RequestError::Timeout {
        message_id,
        timeout_ms: timeout.as_millis() as u64,
    };
    error!(
        "{} Error {} occurred when calling command {} with parameters {}",
        log_prefix, error, command_name, request.params
    );
    request.resolve(Err(error));
}

fn record(
    station: &ChargingStation,
    command_name: &str,
    message_type: MessageType,
    phase: StatisticsPhase,
) {
    if let Some(stats) = station.statistics() {
        stats.record_sample(command_name, message_type, phase);
    }
}

fn log_rejection(station: &ChargingStation, error: &RequestError, command_name: &str, params: &Value) {
    error!(
        "{} Error {} occurred when calling command {} with parameters {}",
        station.log_prefix(),
        error,
        command_name,
        params
    );
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> RequestResult<T> {
    serde_json::from_value(payload).map_err(RequestError::from)
}

fn clamp_meter(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}

fn connector_status_v201(status: ChargePointStatus) -> v201::ConnectorStatus {
    match status {
        ChargePointStatus::Available => v201::ConnectorStatus::Available,
        ChargePointStatus::Reserved => v201::ConnectorStatus::Reserved,
        ChargePointStatus::Unavailable => v201::ConnectorStatus::Unavailable,
        ChargePointStatus::Faulted => v201::ConnectorStatus::Faulted,
        _ => v201::ConnectorStatus::Occupied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::test_support::{open_station, peer_frame};
    use crate::station::RegistrationState;
    use ocpp_transport::ChannelTransport;

    #[tokio::test]
    async fn test_call_resolves_with_dispatched_response() {
        let (station, _transport, mut peer) = open_station().await;

        let sender = station.clone();
        let call = tokio::spawn(async move {
            sender
                .request_service()
                .send_message(&sender, "m-1", json!({}), MessageType::Call, "Heartbeat", false)
                .await
        });

        assert_eq!(peer_frame(&mut peer).await, json!([2, "m-1", "Heartbeat", {}]));
        station
            .on_message(r#"[3,"m-1",{"currentTime":"2024-01-01T00:00:00Z"}]"#)
            .await;

        let response = call.await.unwrap().unwrap();
        assert_eq!(response["currentTime"], "2024-01-01T00:00:00Z");
        assert!(station.requests().is_empty());
    }

    #[tokio::test]
    async fn test_call_error_rejects_with_protocol_error() {
        let (station, _transport, mut peer) = open_station().await;

        let sender = station.clone();
        let call = tokio::spawn(async move {
            sender
                .request_service()
                .send_message(&sender, "m-2", json!({}), MessageType::Call, "Heartbeat", false)
                .await
        });
        peer_frame(&mut peer).await;
        station
            .on_message(r#"[4,"m-2","InternalError","boom",{"why":"test"}]"#)
            .await;

        match call.await.unwrap() {
            Err(RequestError::Protocol {
                code,
                description,
                details,
            }) => {
                assert_eq!(code, CallErrorCode::InternalError);
                assert_eq!(description, "boom");
                assert_eq!(details["why"], "test");
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
        assert!(station.requests().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_buffers_call_and_keeps_entry() {
        let (station, transport, _peer) = open_station().await;
        transport.set_open(false);

        let result = station
            .request_service()
            .send_message(&station, "hb-1", json!({}), MessageType::Call, "Heartbeat", false)
            .await;

        assert_eq!(
            result.unwrap_err(),
            RequestError::TransportClosed {
                message_id: "hb-1".to_string(),
                buffered: true
            }
        );
        assert!(station.requests().contains("hb-1"));
        assert_eq!(station.outbound_buffer().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_skip_buffering_drops_entry() {
        let (station, transport, _peer) = open_station().await;
        transport.set_open(false);

        let result = station
            .request_service()
            .send_message(&station, "hb-2", json!({}), MessageType::Call, "Heartbeat", true)
            .await;

        assert_eq!(
            result.unwrap_err(),
            RequestError::TransportClosed {
                message_id: "hb-2".to_string(),
                buffered: false
            }
        );
        assert!(!station.requests().contains("hb-2"));
        assert!(station.outbound_buffer().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_response_while_closed_is_buffered_without_entry() {
        let (station, transport, _peer) = open_station().await;
        transport.set_open(false);

        let result = station
            .request_service()
            .send_response(&station, "srv-1", json!({"status": "Accepted"}), "ClearCache")
            .await;

        assert!(result.unwrap_err().is_buffered());
        assert!(station.requests().is_empty());
        assert_eq!(station.outbound_buffer().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_treated_as_close() {
        let (station, transport, _peer) = open_station().await;
        transport.fail_writes(true);

        let result = station
            .request_service()
            .send_message(&station, "hb-3", json!({}), MessageType::Call, "Heartbeat", false)
            .await;

        assert!(result.unwrap_err().is_buffered());
        assert_eq!(station.outbound_buffer().lock().await.len(), 1);
        // The connection loop is woken without waiting for a read-side close
        tokio::time::timeout(std::time::Duration::from_secs(1), station.disconnect_notified())
            .await
            .expect("connection loop not notified");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected_without_blocking_queue() {
        let (station, transport, mut peer) = open_station().await;
        transport.set_max_message_size(Some(64));
        let large = json!({"data": "x".repeat(128)});

        let result = station
            .request_service()
            .send_response(&station, "srv-big", large.clone(), "DataTransfer")
            .await;
        assert!(matches!(result, Err(RequestError::Serialization(_))));

        let result = station
            .request_service()
            .send_message(&station, "big-call", large, MessageType::Call, "Heartbeat", false)
            .await;
        assert!(matches!(result, Err(RequestError::Serialization(_))));
        assert!(!station.requests().contains("big-call"));

        assert!(transport.is_open());
        assert!(station.outbound_buffer().lock().await.is_empty());
        station
            .request_service()
            .send_response(&station, "srv-ok", json!({"status": "Accepted"}), "ClearCache")
            .await
            .unwrap();
        assert_eq!(peer_frame(&mut peer).await, json!([3, "srv-ok", {"status": "Accepted"}]));
    }

    #[tokio::test]
    async fn test_flush_discards_refused_head_and_continues() {
        let (station, transport, mut peer) = open_station().await;
        transport.set_open(false);

        let sends = [
            ("f-1", json!({})),
            ("f-2", json!({"data": "x".repeat(128)})),
            ("f-3", json!({})),
        ];
        for (id, payload) in sends {
            let _ = station
                .request_service()
                .send_response(&station, id, payload, "DataTransfer")
                .await;
        }
        assert_eq!(station.outbound_buffer().lock().await.len(), 3);

        transport.set_max_message_size(Some(64));
        transport.set_open(true);
        station.request_service().flush_message_buffer(&station).await;

        assert_eq!(peer_frame(&mut peer).await[1], "f-1");
        assert_eq!(peer_frame(&mut peer).await[1], "f-3");
        assert!(station.outbound_buffer().lock().await.is_empty());
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_buffer_flushes_in_order_before_new_sends() {
        let (station, transport, mut peer) = open_station().await;
        transport.set_open(false);

        for id in ["b-1", "b-2", "b-3"] {
            let _ = station
                .request_service()
                .send_message(&station, id, json!({}), MessageType::Call, "Heartbeat", false)
                .await;
        }

        transport.set_open(true);
        let _ = station
            .request_service()
            .send_response(&station, "r-1", json!({}), "ClearCache")
            .await
            .unwrap();

        let ids: Vec<Value> = [
            peer_frame(&mut peer).await,
            peer_frame(&mut peer).await,
            peer_frame(&mut peer).await,
            peer_frame(&mut peer).await,
        ]
        .into_iter()
        .map(|frame| frame[1].clone())
        .collect();
        assert_eq!(ids, vec![json!("b-1"), json!("b-2"), json!("b-3"), json!("r-1")]);
        assert!(station.outbound_buffer().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_buffered_call_response_still_dispatched() {
        let (station, transport, mut peer) = open_station().await;
        transport.set_open(false);

        let _ = station
            .request_service()
            .send_message(
                &station,
                "boot-1",
                json!({"chargePointVendor": "v", "chargePointModel": "m"}),
                MessageType::Call,
                "BootNotification",
                false,
            )
            .await;

        transport.set_open(true);
        station.request_service().flush_message_buffer(&station).await;
        assert_eq!(peer_frame(&mut peer).await[1], "boot-1");

        station
            .on_message(
                r#"[3,"boot-1",{"currentTime":"2024-01-01T00:00:00Z","interval":30,"status":"Accepted"}]"#,
            )
            .await;
        assert_eq!(
            station.registration_state().await,
            RegistrationState::Registered
        );
        assert!(station.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let (station, _transport, mut peer) = open_station().await;

        let sender = station.clone();
        let call = tokio::spawn(async move {
            sender
                .request_service()
                .send_message(&sender, "t-1", json!({}), MessageType::Call, "Heartbeat", false)
                .await
        });
        peer_frame(&mut peer).await;

        tokio::time::sleep(DEFAULT_REQUEST_TIMEOUT + Duration::from_secs(1)).await;

        assert!(matches!(
            call.await.unwrap(),
            Err(RequestError::Timeout { .. })
        ));
        assert!(!station.requests().contains("t-1"));

        // A late response no longer matches anything
        let late = Message::parse(r#"[3,"t-1",{}]"#).unwrap();
        assert_eq!(
            station
                .request_service()
                .handle_response(&station, late)
                .await
                .unwrap_err(),
            RequestError::UnknownMessageId("t-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_call_error_frame_defaults() {
        let (station, _transport, mut peer) = open_station().await;

        station
            .request_service()
            .send_message(&station, "e-1", json!({}), MessageType::CallError, "Reset", false)
            .await
            .unwrap();

        assert_eq!(
            peer_frame(&mut peer).await,
            json!([4, "e-1", "GenericError", "", {}])
        );
    }

    #[tokio::test]
    async fn test_unknown_outgoing_command_rejected() {
        let (station, _transport, _peer) = open_station().await;

        let result = station
            .request_service()
            .send_message(&station, "x", json!({}), MessageType::Call, "DataTransfer", false)
            .await;
        assert!(matches!(result, Err(RequestError::NotImplemented(_))));
        assert!(station.requests().is_empty());
    }

    #[tokio::test]
    async fn test_v201_rejects_transaction_commands() {
        let station = crate::station::test_support::station_with(|t| {
            t.ocpp_version = OcppVersion::V201;
        });
        let (transport, _peer) = ChannelTransport::new();
        station.attach_transport(transport).await;

        let result = station
            .request_service()
            .send_start_transaction(&station, 1, "TAG")
            .await;
        assert!(matches!(result, Err(RequestError::NotImplemented(_))));
    }
}
