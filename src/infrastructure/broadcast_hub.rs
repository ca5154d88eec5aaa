//! Process-wide fan-out registry of connected real-time clients (C12, §4.12).
//!
//! A per-client bounded channel decouples a slow consumer from the
//! broadcaster: `broadcast` never blocks on a client's socket, and a client
//! whose buffer fills is dropped rather than allowed to back-pressure the
//! whole hub.

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

const CLIENT_BUFFER: usize = 32;
pub const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

pub type ClientId = u64;

#[derive(Clone)]
pub struct BroadcastHub {
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<Message>>>>,
    next_id: Arc<AtomicU64>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new client and returns its id plus the receiving half of
    /// its outbound buffer, which the caller's socket-write loop drains.
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().await.insert(id, tx);
        info!(client_id = id, "broadcast client registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: ClientId) {
        self.clients.write().await.remove(&id);
        info!(client_id = id, "broadcast client unregistered");
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Sends `payload` to every connected client. A client whose buffer is
    /// full is considered unresponsive and dropped.
    pub async fn broadcast(&self, payload: impl Into<String>) {
        let payload = payload.into();
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, tx) in clients.iter() {
                if tx.try_send(Message::Text(payload.clone())).is_err() {
                    stale.push(*id);
                }
            }
        }
        if !stale.is_empty() {
            let mut clients = self.clients.write().await;
            for id in stale {
                warn!(client_id = id, "dropping unresponsive broadcast client");
                clients.remove(&id);
            }
        }
    }

    pub async fn send_keepalive(&self) {
        let clients = self.clients.read().await;
        for tx in clients.values() {
            let _ = tx.try_send(Message::Ping(Vec::new()));
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_broadcast_delivers_to_client() {
        let hub = BroadcastHub::new();
        let (_id, mut rx) = hub.register().await;
        assert_eq!(hub.client_count().await, 1);

        hub.broadcast(r#"{"type":"bbw_dashboard_update"}"#).await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, Message::Text(t) if t.contains("bbw_dashboard_update")));
    }

    #[tokio::test]
    async fn unregister_removes_client() {
        let hub = BroadcastHub::new();
        let (id, _rx) = hub.register().await;
        hub.unregister(id).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn full_buffer_drops_the_client_on_next_broadcast() {
        let hub = BroadcastHub::new();
        let (_id, _rx) = hub.register().await;
        for _ in 0..CLIENT_BUFFER + 1 {
            hub.broadcast("frame").await;
        }
        assert_eq!(hub.client_count().await, 0);
    }
}
