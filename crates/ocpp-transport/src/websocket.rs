//! WebSocket client transport

use crate::{
    error::{TransportError, TransportResult},
    ConnectionState, Transport, TransportConfig, TransportEvent,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::WebSocketConfig;
use tungstenite::Message;
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of a WebSocket connection to a central system
pub struct WebSocketTransport {
    connection_id: Uuid,
    state: Arc<RwLock<ConnectionState>>,
    sink: Mutex<SplitSink<WsStream, Message>>,
    config: TransportConfig,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Open a connection. Incoming text frames and the eventual close are
    /// reported on `events`.
    pub async fn connect(
        url: &str,
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Arc<Self>> {
        info!("Connecting to WebSocket server: {}", url);

        let url = Url::parse(url).map_err(|e| TransportError::ConnectionError {
            message: format!("Invalid URL: {}", e),
        })?;

        let mut request = url.as_str().into_client_request()?;
        if !config.sub_protocols.is_empty() {
            let protocols = HeaderValue::from_str(&config.sub_protocols.join(", ")).map_err(|e| {
                TransportError::HandshakeError {
                    message: format!("Invalid subprotocol header: {}", e),
                }
            })?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocols);
        }

        let ws_config = WebSocketConfig {
            max_message_size: Some(config.max_message_size),
            max_frame_size: Some(config.max_message_size),
            ..Default::default()
        };

        let (ws_stream, response) = timeout(
            config.connection_timeout,
            connect_async_with_config(request, Some(ws_config), false),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            timeout_secs: config.connection_timeout.as_secs(),
        })??;

        debug!(
            "Negotiated subprotocol: {:?}",
            response.headers().get("sec-websocket-protocol")
        );

        let connection_id = Uuid::new_v4();
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (sink, source) = ws_stream.split();

        let _ = events.send(TransportEvent::Opened { connection_id });
        let reader = tokio::spawn(read_loop(source, connection_id, state.clone(), events));

        info!("WebSocket connection {} established", connection_id);
        Ok(Arc::new(Self {
            connection_id,
            state,
            sink: Mutex::new(sink),
            config,
            reader,
        }))
    }

    fn set_state(&self, new_state: ConnectionState) {
        set_state(&self.state, new_state);
    }
}

fn set_state(state: &RwLock<ConnectionState>, new_state: ConnectionState) {
    if let Ok(mut guard) = state.write() {
        *guard = new_state;
    }
}

async fn read_loop(
    mut source: futures_util::stream::SplitStream<WsStream>,
    connection_id: Uuid,
    state: Arc<RwLock<ConnectionState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("Received WebSocket text message: {} bytes", text.len());
                if events
                    .send(TransportEvent::Message {
                        connection_id,
                        text,
                    })
                    .is_err()
                {
                    break "event receiver dropped".to_string();
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!("Received unexpected binary message: {} bytes", data.len());
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed by peer".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };

    info!("WebSocket connection {} closed: {}", connection_id, reason);
    set_state(&state, ConnectionState::Closed);
    let _ = events.send(TransportEvent::Closed {
        connection_id,
        reason,
    });
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: String) -> TransportResult<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::NotReady { state });
        }
        if text.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                limit: self.config.max_message_size,
            });
        }

        let mut sink = self.sink.lock().await;
        let result = timeout(self.config.write_timeout, sink.send(Message::Text(text)))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_secs: self.config.write_timeout.as_secs(),
            })
            .and_then(|sent| sent.map_err(TransportError::from));

        if result.is_err() {
            self.set_state(ConnectionState::Closed);
        }
        result
    }

    async fn close(&self) -> TransportResult<()> {
        self.set_state(ConnectionState::Closing);
        let result = self.sink.lock().await.close().await;
        self.set_state(ConnectionState::Closed);
        result.map_err(TransportError::from)
    }

    fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Closed)
    }

    fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = WebSocketTransport::connect("not a url", TransportConfig::default(), tx).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionError { .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = TransportConfig {
            connection_timeout: std::time::Duration::from_secs(2),
            ..Default::default()
        };
        // Port 9 (discard) is not expected to run a WebSocket server.
        let result = WebSocketTransport::connect("ws://127.0.0.1:9/ocpp/CS1", config, tx).await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }
}
