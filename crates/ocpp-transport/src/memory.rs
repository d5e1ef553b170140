//! In-process transport backed by a channel
//!
//! Frames written to a [`ChannelTransport`] are delivered to the receiver
//! returned by [`ChannelTransport::new`]. The open flag can be flipped at will,
//! which makes it the transport of choice for exercising outage handling.

use crate::{ConnectionState, Transport, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct ChannelTransport {
    connection_id: Uuid,
    open: AtomicBool,
    fail_writes: AtomicBool,
    /// 0 means unlimited
    max_message_size: AtomicUsize,
    outbound: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Create an open transport and the receiving end of its frames
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connection_id: Uuid::new_v4(),
            open: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            max_message_size: AtomicUsize::new(0),
            outbound,
        });
        (transport, rx)
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make the next write fail and close the transport, the way a
    /// half-closed socket behaves.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Refuse frames longer than `limit` bytes without closing
    pub fn set_max_message_size(&self, limit: Option<usize>) {
        self.max_message_size
            .store(limit.unwrap_or(0), Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&self, text: String) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady {
                state: ConnectionState::Closed,
            });
        }
        let limit = self.max_message_size.load(Ordering::SeqCst);
        if limit > 0 && text.len() > limit {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                limit,
            });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::closed("write failed"));
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::closed("receiver dropped"))
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Closed
        }
    }

    fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_receiver() {
        let (transport, mut rx) = ChannelTransport::new();
        assert!(transport.is_open());

        transport.send_text("[2,\"a\",\"Heartbeat\",{}]".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "[2,\"a\",\"Heartbeat\",{}]");
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_writes() {
        let (transport, _rx) = ChannelTransport::new();
        transport.set_open(false);

        assert!(!transport.is_open());
        assert!(matches!(
            transport.send_text("x".to_string()).await,
            Err(TransportError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_closes() {
        let (transport, _rx) = ChannelTransport::new();
        transport.fail_writes(true);

        assert!(transport.send_text("x".to_string()).await.is_err());
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_oversized_frame_refused_while_open() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.set_max_message_size(Some(4));

        assert!(matches!(
            transport.send_text("too long".to_string()).await,
            Err(TransportError::MessageTooLarge { size: 8, limit: 4 })
        ));
        assert!(transport.is_open());
        transport.send_text("ok".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "ok");
    }
}
