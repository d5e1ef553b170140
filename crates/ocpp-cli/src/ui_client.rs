//! # Control-channel client
//!
//! Sends `[id, procedure, payload]` requests to a simulator over the
//! `ui0.0.1` subprotocol and correlates `[id, response]` answers by id.

use crate::error::{UiClientError, UiClientResult};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use ocpp_messages::{
    ProcedureAck, ProcedureName, StartTransactionPayload, StationSummary, StopTransactionPayload,
    UiRequest, UiResponse, UI_PROTOCOL,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Time an operator request waits for its answer
pub const UI_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UiClient {
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
    timeout: Duration,
}

impl UiClient {
    /// Client writing frames to `outbound`. Received frames are fed through
    /// [`UiClient::handle_message`].
    pub fn new(outbound: mpsc::UnboundedSender<String>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Open a WebSocket to the simulator control channel
    pub async fn connect(url: &str) -> UiClientResult<Arc<Self>> {
        let url = Url::parse(url).map_err(|e| UiClientError::InvalidUrl(e.to_string()))?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| UiClientError::InvalidUrl(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(UI_PROTOCOL));

        info!("Connecting to simulator control channel: {}", url);
        let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| UiClientError::Connection("connection timed out".to_string()))?
            .map_err(|e| UiClientError::Connection(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let client = Arc::new(Self::new(outbound_tx, UI_REQUEST_TIMEOUT));

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Control channel write failed: {}", e);
                    break;
                }
            }
        });

        let reader = client.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = reader.handle_message(&text) {
                            error!("{}", e);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Control channel read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Control channel closed");
            // Wake every waiter with Closed
            reader.pending.clear();
        });

        Ok(client)
    }

    /// Number of requests waiting for an answer
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Send one request and wait for its answer
    pub async fn send(&self, procedure: ProcedureName, payload: Value) -> UiClientResult<Value> {
        let request = UiRequest {
            id: uuid::Uuid::new_v4().to_string(),
            procedure,
            payload,
        };
        let text = request
            .to_json()
            .map_err(|e| UiClientError::Serialization(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.id.clone(), tx);
        if self.outbound.send(text).is_err() {
            self.pending.remove(&request.id);
            return Err(UiClientError::Closed);
        }
        debug!("Sent {} {}", request.id, procedure);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(UiClientError::Closed),
            Err(_) => {
                self.pending.remove(&request.id);
                Err(UiClientError::Timeout {
                    id: request.id,
                    procedure: procedure.to_string(),
                })
            }
        }
    }

    /// Route a received frame to the request waiting for it
    pub fn handle_message(&self, text: &str) -> UiClientResult<()> {
        let response = UiResponse::parse(text)
            .map_err(|e| UiClientError::ChannelProtocolViolation(e.to_string()))?;
        let Some((_, waiter)) = self.pending.remove(&response.id) else {
            return Err(UiClientError::ChannelProtocolViolation(format!(
                "not a response to a pending request: {}",
                text
            )));
        };
        // Waiter may have given up already
        let _ = waiter.send(response.payload);
        Ok(())
    }

    pub async fn list_charging_stations(&self) -> UiClientResult<Vec<StationSummary>> {
        let response = self
            .send(ProcedureName::ListChargingStations, Value::Object(Default::default()))
            .await?;
        decode(response)
    }

    pub async fn start_transaction(
        &self,
        hash_id: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> UiClientResult<ProcedureAck> {
        let payload = serde_json::to_value(StartTransactionPayload {
            hash_id: hash_id.to_string(),
            connector_id,
            id_tag: id_tag.to_string(),
            command: Some(ProcedureName::StartTransaction),
        })?;
        decode(self.send(ProcedureName::StartTransaction, payload).await?)
    }

    pub async fn stop_transaction(
        &self,
        hash_id: &str,
        connector_id: u32,
    ) -> UiClientResult<ProcedureAck> {
        let payload = serde_json::to_value(StopTransactionPayload {
            hash_id: hash_id.to_string(),
            connector_id,
            command: Some(ProcedureName::StopTransaction),
        })?;
        decode(self.send(ProcedureName::StopTransaction, payload).await?)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> UiClientResult<T> {
    serde_json::from_value(value).map_err(|e| UiClientError::ChannelProtocolViolation(e.to_string()))
}
