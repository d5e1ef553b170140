//! Response dispatch
//!
//! Applies the side effects of a CallResult to the station once the request
//! service has matched it with its Call.

use crate::error::{RequestError, RequestResult};
use crate::station::{ChargingStation, RegistrationState};
use async_trait::async_trait;
use ocpp_messages::v16j::{
    self, AuthorizationStatus, BootNotificationResponse, RegistrationStatus,
};
use ocpp_messages::{v201, RequestCommand};
use ocpp_types::OcppVersion;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait ResponseService: Send + Sync {
    /// Handle the response `payload` to the Call `command` sent with `request`.
    /// The returned value resolves the caller.
    async fn handle_response(
        &self,
        station: &ChargingStation,
        command: RequestCommand,
        payload: Value,
        request: &Value,
    ) -> RequestResult<Value>;
}

pub fn response_service_for(version: OcppVersion) -> Arc<dyn ResponseService> {
    match version {
        OcppVersion::V16J => Arc::new(V16ResponseService),
        OcppVersion::V201 => Arc::new(V201ResponseService),
    }
}

fn decode<T: DeserializeOwned>(command: RequestCommand, payload: &Value) -> RequestResult<T> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        RequestError::serialization(format!("Invalid {} response: {}", command, e))
    })
}

fn request_field<'a>(request: &'a Value, field: &str) -> Option<&'a Value> {
    request.get(field)
}

async fn apply_registration(
    station: &ChargingStation,
    status: RegistrationStatus,
    interval: u32,
) {
    let state = RegistrationState::from(status);
    station.set_registration_state(state).await;
    if interval > 0 {
        station.set_heartbeat_interval(interval as u64).await;
    }
    info!(
        "{} Registration {:?}, heartbeat interval {}s",
        station.log_prefix(),
        status,
        interval
    );
}

pub struct V16ResponseService;

#[async_trait]
impl ResponseService for V16ResponseService {
    async fn handle_response(
        &self,
        station: &ChargingStation,
        command: RequestCommand,
        payload: Value,
        request: &Value,
    ) -> RequestResult<Value> {
        match command {
            RequestCommand::BootNotification => {
                let response: BootNotificationResponse = decode(command, &payload)?;
                apply_registration(station, response.status, response.interval).await;
            }
            RequestCommand::Authorize => {
                let response: v16j::AuthorizeResponse = decode(command, &payload)?;
                if response.id_tag_info.status != AuthorizationStatus::Accepted {
                    warn!(
                        "{} Authorization of {} refused: {:?}",
                        station.log_prefix(),
                        request_field(request, "idTag").unwrap_or(&serde_json::Value::Null),
                        response.id_tag_info.status
                    );
                }
            }
            RequestCommand::StartTransaction => {
                let response: v16j::StartTransactionResponse = decode(command, &payload)?;
                let sent: v16j::StartTransactionRequest = decode(command, request)?;
                let accepted = response.id_tag_info.status == AuthorizationStatus::Accepted;
                station
                    .update_connector(sent.connector_id, |connector| {
                        if accepted {
                            connector.begin_transaction(response.transaction_id, sent.id_tag.clone());
                        } else {
                            connector.end_transaction();
                        }
                    })
                    .await
                    .ok_or_else(|| {
                        RequestError::serialization(format!(
                            "StartTransaction for unknown connector {}",
                            sent.connector_id
                        ))
                    })?;
                if accepted {
                    info!(
                        "{} Transaction {} started on connector {}",
                        station.log_prefix(),
                        response.transaction_id,
                        sent.connector_id
                    );
                } else {
                    warn!(
                        "{} StartTransaction on connector {} refused: {:?}",
                        station.log_prefix(),
                        sent.connector_id,
                        response.id_tag_info.status
                    );
                }
            }
            RequestCommand::StopTransaction => {
                let _: v16j::StopTransactionResponse = decode(command, &payload)?;
                let sent: v16j::StopTransactionRequest = decode(command, request)?;
                match station.connector_with_transaction(sent.transaction_id).await {
                    Some(connector_id) => {
                        station
                            .update_connector(connector_id, |c| c.end_transaction())
                            .await;
                        info!(
                            "{} Transaction {} stopped on connector {}",
                            station.log_prefix(),
                            sent.transaction_id,
                            connector_id
                        );
                    }
                    None => warn!(
                        "{} StopTransaction response for unknown transaction {}",
                        station.log_prefix(),
                        sent.transaction_id
                    ),
                }
            }
            RequestCommand::Heartbeat
            | RequestCommand::MeterValues
            | RequestCommand::StatusNotification => {}
        }
        Ok(payload)
    }
}

pub struct V201ResponseService;

#[async_trait]
impl ResponseService for V201ResponseService {
    async fn handle_response(
        &self,
        station: &ChargingStation,
        command: RequestCommand,
        payload: Value,
        _request: &Value,
    ) -> RequestResult<Value> {
        match command {
            RequestCommand::BootNotification => {
                let response: v201::BootNotificationResponse = decode(command, &payload)?;
                apply_registration(station, response.status, response.interval).await;
                Ok(payload)
            }
            RequestCommand::Heartbeat | RequestCommand::StatusNotification => Ok(payload),
            other => Err(RequestError::not_implemented(format!(
                "{} response handling is not supported by OCPP 2.0.1",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::test_support::test_station;
    use serde_json::json;

    #[tokio::test]
    async fn test_boot_accepted_registers() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V16J);

        service
            .handle_response(
                &station,
                RequestCommand::BootNotification,
                json!({"currentTime": "2024-01-01T00:00:00Z", "interval": 15, "status": "Accepted"}),
                &json!({}),
            )
            .await
            .unwrap();

        assert_eq!(station.registration_state().await, RegistrationState::Registered);
        assert_eq!(station.heartbeat_interval().await.as_secs(), 15);
    }

    #[tokio::test]
    async fn test_boot_pending_and_rejected() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V16J);
        let boot = |status: &str| {
            json!({"currentTime": "2024-01-01T00:00:00Z", "interval": 0, "status": status})
        };

        service
            .handle_response(&station, RequestCommand::BootNotification, boot("Pending"), &json!({}))
            .await
            .unwrap();
        assert_eq!(station.registration_state().await, RegistrationState::Pending);
        // Zero interval keeps the configured one
        assert_eq!(station.heartbeat_interval().await.as_secs(), 60);

        service
            .handle_response(&station, RequestCommand::BootNotification, boot("Rejected"), &json!({}))
            .await
            .unwrap();
        assert_eq!(station.registration_state().await, RegistrationState::Unknown);
    }

    #[tokio::test]
    async fn test_start_and_stop_transaction() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V16J);

        service
            .handle_response(
                &station,
                RequestCommand::StartTransaction,
                json!({"idTagInfo": {"status": "Accepted"}, "transactionId": 7}),
                &json!({"connectorId": 2, "idTag": "TAG", "meterStart": 0, "timestamp": "2024-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();
        let connector = station.connector(2).await.unwrap();
        assert_eq!(connector.transaction_id, Some(7));
        assert_eq!(connector.id_tag.as_deref(), Some("TAG"));

        service
            .handle_response(
                &station,
                RequestCommand::StopTransaction,
                json!({}),
                &json!({"meterStop": 10, "timestamp": "2024-01-01T00:10:00Z", "transactionId": 7}),
            )
            .await
            .unwrap();
        assert!(!station.connector(2).await.unwrap().has_transaction());
    }

    #[tokio::test]
    async fn test_start_transaction_refused_clears_connector() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V16J);

        service
            .handle_response(
                &station,
                RequestCommand::StartTransaction,
                json!({"idTagInfo": {"status": "Blocked"}, "transactionId": 0}),
                &json!({"connectorId": 1, "idTag": "BAD", "meterStart": 0, "timestamp": "2024-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();
        assert!(!station.connector(1).await.unwrap().has_transaction());
    }

    #[tokio::test]
    async fn test_malformed_response_is_serialization_error() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V16J);

        let result = service
            .handle_response(
                &station,
                RequestCommand::BootNotification,
                json!({"status": "Maybe"}),
                &json!({}),
            )
            .await;
        assert!(matches!(result, Err(RequestError::Serialization(_))));
        assert_eq!(station.registration_state().await, RegistrationState::Unknown);
    }

    #[tokio::test]
    async fn test_v201_boot_and_unsupported() {
        let station = test_station();
        let service = response_service_for(OcppVersion::V201);

        service
            .handle_response(
                &station,
                RequestCommand::BootNotification,
                json!({"currentTime": "2024-01-01T00:00:00Z", "interval": 30, "status": "Accepted"}),
                &json!({}),
            )
            .await
            .unwrap();
        assert_eq!(station.registration_state().await, RegistrationState::Registered);

        let result = service
            .handle_response(&station, RequestCommand::Authorize, json!({}), &json!({}))
            .await;
        assert!(matches!(result, Err(RequestError::NotImplemented(_))));
    }
}
