//! # Operator channel server
//!
//! WebSocket endpoint speaking the `ui0.0.1` subprotocol on `/`, plus the
//! Prometheus exposition on `/metrics` when statistics are enabled.

use crate::{
    config::UiServerConfig,
    error::{SimulatorError, SimulatorResult},
    ui_service::UiService,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use ocpp_messages::UI_PROTOCOL;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct ServerState {
    service: Arc<UiService>,
    metrics: Option<Registry>,
}

pub struct UiServer {
    config: UiServerConfig,
    state: ServerState,
}

impl UiServer {
    pub fn new(config: UiServerConfig, service: Arc<UiService>, metrics: Option<Registry>) -> Self {
        Self {
            config,
            state: ServerState { service, metrics },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(websocket_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Claim the listening socket. Fails when the address is taken.
    pub async fn bind(&self) -> SimulatorResult<TcpListener> {
        let address = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| SimulatorError::UiServerError(format!("bind {}: {}", address, e)))?;
        info!("UI server listening on ws://{} ({})", address, UI_PROTOCOL);
        Ok(listener)
    }

    pub async fn serve(self, listener: TcpListener) -> SimulatorResult<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| SimulatorError::UiServerError(e.to_string()))
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.protocols([UI_PROTOCOL])
        .on_upgrade(|socket| handle_websocket(socket, state.service))
}

async fn handle_websocket(socket: WebSocket, service: Arc<UiService>) {
    let (mut sender, mut receiver) = socket.split();
    info!("Operator connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(reply) = service.handle_text(&text).await {
                    if sender.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(other) => debug!("Ignoring non-text control frame {:?}", other),
            Err(e) => {
                warn!("Operator WebSocket error: {}", e);
                break;
            }
        }
    }

    info!("Operator disconnected");
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    let Some(registry) = state.metrics else {
        return (StatusCode::NOT_FOUND, "statistics are disabled").into_response();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::StationRegistry;
    use tokio::sync::broadcast;
    use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message as WsMessage};

    async fn spawn_server(metrics: Option<Registry>) -> std::net::SocketAddr {
        let (control, _) = broadcast::channel(16);
        let service = Arc::new(UiService::new(Arc::new(StationRegistry::new()), control));
        let config = UiServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..UiServerConfig::default()
        };
        let server = UiServer::new(config, service, metrics);
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        address
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (control, _) = broadcast::channel(16);
        let service = Arc::new(UiService::new(Arc::new(StationRegistry::new()), control));
        let config = UiServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: taken.local_addr().unwrap().port(),
            ..UiServerConfig::default()
        };

        let error = UiServer::new(config, service, None).bind().await.unwrap_err();
        assert!(matches!(error, SimulatorError::UiServerError(_)));
    }

    #[tokio::test]
    async fn test_operator_round_trip() {
        let address = spawn_server(None).await;
        let mut request = format!("ws://{}/", address).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", UI_PROTOCOL.parse().unwrap());

        let (mut socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
        assert_eq!(
            response.headers().get("Sec-WebSocket-Protocol").unwrap(),
            UI_PROTOCOL
        );

        socket
            .send(WsMessage::Text(r#"["r1","ListChargingStations",{}]"#.to_string()))
            .await
            .unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        assert_eq!(reply.into_text().unwrap(), r#"["r1",[]]"#);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let address = spawn_server(None).await;
        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
