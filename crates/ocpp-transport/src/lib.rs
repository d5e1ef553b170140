//! # OCPP Transport
//!
//! Connection abstraction used by the simulated stations. A [`Transport`] is a
//! text-frame pipe that knows whether it is open; incoming frames and
//! lifecycle changes are reported as [`TransportEvent`]s on a channel owned by
//! whoever opened the connection.

pub mod error;
pub mod memory;
pub mod websocket;

pub use error::*;
pub use memory::ChannelTransport;
pub use websocket::WebSocketTransport;

use std::time::Duration;
use uuid::Uuid;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Handshake timeout
    pub connection_timeout: Duration,
    /// Timeout of a single frame write
    pub write_timeout: Duration,
    /// WebSocket sub-protocols offered during the handshake
    pub sub_protocols: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 65536, // 64KB
            connection_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            sub_protocols: vec!["ocpp1.6".to_string()],
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is being established
    Connecting,
    /// Connection is established and ready
    Connected,
    /// Connection is being closed
    Closing,
    /// Connection is closed
    Closed,
}

/// Transport event
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established
    Opened { connection_id: Uuid },
    /// Text frame received
    Message { connection_id: Uuid, text: String },
    /// Connection closed, by either side
    Closed { connection_id: Uuid, reason: String },
}

/// A message-oriented connection
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Whether a frame written now would reach the peer
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Write a text frame. Any error means the frame was not delivered.
    async fn send_text(&self, text: String) -> TransportResult<()>;

    /// Close the connection
    async fn close(&self) -> TransportResult<()>;

    /// Get connection state
    fn state(&self) -> ConnectionState;

    /// Get connection ID
    fn connection_id(&self) -> Uuid;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_offers_ocpp16() {
        let config = TransportConfig::default();
        assert_eq!(config.sub_protocols, vec!["ocpp1.6".to_string()]);
        assert!(config.write_timeout < config.connection_timeout);
    }
}
