//! Pending request table
//!
//! Outstanding Calls of one connection keyed by message id. Whoever removes an
//! entry first (response arrival, deadline, send failure) owns its resolution,
//! so each Call is resolved exactly once.

use crate::error::{RequestError, RequestResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ocpp_messages::RequestCommand;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

pub type ResponseSender = oneshot::Sender<RequestResult<Value>>;

/// An outstanding Call
#[derive(Debug)]
pub struct PendingRequest {
    pub command: RequestCommand,
    /// Original request payload
    pub params: Value,
    pub created_at: DateTime<Utc>,
    /// Absent once the caller was told the Call got buffered
    responder: Option<ResponseSender>,
    deadline: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(command: RequestCommand, params: Value, responder: ResponseSender) -> Self {
        Self {
            command,
            params,
            created_at: Utc::now(),
            responder: Some(responder),
            deadline: None,
        }
    }

    /// Deliver the outcome to the waiting caller, if any
    pub fn resolve(mut self, outcome: RequestResult<Value>) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        if let Some(responder) = self.responder.take() {
            // The caller may have given up waiting.
            let _ = responder.send(outcome);
        }
    }

    pub fn has_waiter(&self) -> bool {
        self.responder.is_some()
    }
}

/// Per-connection map of outstanding Calls
#[derive(Debug, Clone, Default)]
pub struct PendingRequestTable {
    entries: Arc<DashMap<String, PendingRequest>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Call. Fails if the id is already outstanding.
    pub fn insert(&self, message_id: &str, request: PendingRequest) -> RequestResult<()> {
        match self.entries.entry(message_id.to_string()) {
            Entry::Occupied(_) => Err(RequestError::DuplicateMessageId(message_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    /// Remove an entry, transferring the right to resolve it
    pub fn take(&self, message_id: &str) -> Option<PendingRequest> {
        self.entries.remove(message_id).map(|(_, request)| request)
    }

    /// Attach the deadline task so resolution can cancel it
    pub fn arm_deadline(&self, message_id: &str, deadline: AbortHandle) {
        match self.entries.get_mut(message_id) {
            Some(mut entry) => entry.deadline = Some(deadline),
            // Already resolved before the deadline was attached.
            None => deadline.abort(),
        }
    }

    /// Detach the caller from a Call that stays outstanding, returning the
    /// sender so the caller can be told why.
    pub fn detach_waiter(&self, message_id: &str) -> Option<ResponseSender> {
        self.entries
            .get_mut(message_id)
            .and_then(|mut entry| entry.responder.take())
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    pub fn command_of(&self, message_id: &str) -> Option<RequestCommand> {
        self.entries.get(message_id).map(|entry| entry.command)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject every outstanding Call
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(request) = self.take(&id) {
                request.resolve(Err(RequestError::Cancelled(id)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> (PendingRequest, oneshot::Receiver<RequestResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest::new(RequestCommand::Heartbeat, json!({}), tx),
            rx,
        )
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = PendingRequestTable::new();
        let (first, _rx1) = entry();
        let (second, _rx2) = entry();

        table.insert("id-1", first).unwrap();
        assert_eq!(
            table.insert("id-1", second).unwrap_err(),
            RequestError::DuplicateMessageId("id-1".to_string())
        );
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_take_resolves_once() {
        let table = PendingRequestTable::new();
        let (request, rx) = entry();
        table.insert("id-1", request).unwrap();

        let taken = table.take("id-1").unwrap();
        assert!(table.take("id-1").is_none());
        taken.resolve(Ok(json!({"currentTime": "now"})));

        assert_eq!(rx.await.unwrap().unwrap()["currentTime"], "now");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_id_reusable_after_completion() {
        let table = PendingRequestTable::new();
        let (request, _rx) = entry();
        table.insert("id-1", request).unwrap();
        table.take("id-1").unwrap().resolve(Ok(json!({})));

        let (again, _rx) = entry();
        assert!(table.insert("id-1", again).is_ok());
    }

    #[tokio::test]
    async fn test_detached_entry_stays() {
        let table = PendingRequestTable::new();
        let (request, rx) = entry();
        table.insert("id-1", request).unwrap();

        let sender = table.detach_waiter("id-1").unwrap();
        sender
            .send(Err(RequestError::Cancelled("id-1".to_string())))
            .unwrap();
        assert!(rx.await.unwrap().is_err());

        assert!(table.contains("id-1"));
        assert!(!table.take("id-1").unwrap().has_waiter());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let table = PendingRequestTable::new();
        let (a, rx_a) = entry();
        let (b, rx_b) = entry();
        table.insert("a", a).unwrap();
        table.insert("b", b).unwrap();

        table.cancel_all();

        assert!(table.is_empty());
        assert!(matches!(rx_a.await.unwrap(), Err(RequestError::Cancelled(_))));
        assert!(matches!(rx_b.await.unwrap(), Err(RequestError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_concurrent_unique_insertions() {
        let table = PendingRequestTable::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                let mut wins = 0;
                for i in 0..50 {
                    let (tx, _rx) = oneshot::channel();
                    let request = PendingRequest::new(RequestCommand::Heartbeat, json!({}), tx);
                    if table.insert(&format!("id-{}", i), request).is_ok() {
                        wins += 1;
                    }
                }
                wins
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(table.len(), 50);
    }
}
