use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::bot::audit_log::UsernameAuditLog;
use crate::types::ChatEnvelope;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("viewer {0} is no longer connected")]
    ViewerGone(Uuid),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
}

/// Anything that accepts ordered batches of envelopes for immediate delivery
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Deliver in order; returns the number of successful per-viewer sends
    async fn publish(&self, envelopes: &[ChatEnvelope]) -> usize;
}

struct ViewerHandle {
    addr: Option<SocketAddr>,
    sender: mpsc::UnboundedSender<Message>,
}

pub struct BroadcastRelay {
    viewers: RwLock<HashMap<Uuid, ViewerHandle>>,
    audit_log: Arc<UsernameAuditLog>,
    envelopes_sent: AtomicU64,
}

impl BroadcastRelay {
    pub fn new(audit_log: Arc<UsernameAuditLog>) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            audit_log,
            envelopes_sent: AtomicU64::new(0),
        }
    }

    pub fn audit_log(&self) -> &UsernameAuditLog {
        &self.audit_log
    }

    /// Add a viewer; frames for it arrive on the returned receiver
    pub async fn register(&self, addr: Option<SocketAddr>) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.viewers.write().await.insert(id, ViewerHandle { addr, sender });
        (id, receiver)
    }

    pub async fn unregister(&self, id: Uuid) {
        if let Some(handle) = self.viewers.write().await.remove(&id) {
            debug!("Viewer {} ({:?}) removed", id, handle.addr);
        }
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub fn envelopes_sent(&self) -> u64 {
        self.envelopes_sent.load(Ordering::Relaxed)
    }

    fn send_to(id: Uuid, handle: &ViewerHandle, text: &str) -> Result<(), RelayError> {
        handle
            .sender
            .send(Message::Text(text.to_string()))
            .map_err(|_| RelayError::ViewerGone(id))
    }

    /// Send one envelope to every open viewer. A failed viewer is logged,
    /// skipped and pruned; it never affects the others.
    pub async fn broadcast(&self, envelope: &ChatEnvelope) -> usize {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("{}", RelayError::from(e));
                return 0;
            }
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        {
            let viewers = self.viewers.read().await;
            for (id, handle) in viewers.iter() {
                match Self::send_to(*id, handle, &text) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("Dropping delivery: {}", e);
                        gone.push(*id);
                    }
                }
            }
        }

        if !gone.is_empty() {
            let mut viewers = self.viewers.write().await;
            for id in gone {
                viewers.remove(&id);
            }
        }

        self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Broadcast a sequence in order, immediately, without any batching of its own
    pub async fn broadcast_all(&self, envelopes: &[ChatEnvelope]) -> usize {
        let mut delivered = 0;
        for envelope in envelopes {
            delivered += self.broadcast(envelope).await;
        }
        delivered
    }

    /// Record a username in the audit log; failures are reported, never raised
    pub async fn log_username(&self, name: &str) {
        match self.audit_log.record(name).await {
            Ok(true) => info!("New username logged: {}", name.trim()),
            Ok(false) => {}
            Err(e) => error!("Failed to log username '{}': {:#}", name.trim(), e),
        }
    }

    /// Relay a client-originated envelope to all viewers (sender included)
    /// and log its username.
    pub async fn relay_from_client(&self, envelope: &ChatEnvelope) -> usize {
        let delivered = self.broadcast(envelope).await;
        if let Some(name) = envelope.payload().username.as_deref() {
            self.log_username(name).await;
        }
        delivered
    }

    /// Decode and relay one text frame received from a viewer
    pub async fn handle_client_frame(&self, text: &str) -> Result<usize, RelayError> {
        let envelope: ChatEnvelope =
            serde_json::from_str(text).map_err(|e| RelayError::UnsupportedFrame(e.to_string()))?;
        Ok(self.relay_from_client(&envelope).await)
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind relay on {}", addr))
    }

    /// Accept viewers forever; each connection runs on its own task
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("Relay listener has no local address")?;
        info!("Relay listening on ws://{}", local);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = relay.handle_connection(stream, addr).await {
                            warn!("Viewer {} failed: {:#}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept viewer: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let ws_stream = accept_async(stream)
            .await
            .with_context(|| format!("WebSocket handshake with {} failed", addr))?;
        info!("Viewer connected from {}", addr);

        let (mut write, mut read) = ws_stream.split();
        let (id, mut outgoing) = self.register(Some(addr)).await;

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                if let Err(e) = write.send(message).await {
                    debug!("Write to viewer {} failed: {}", id, e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        while let Some(frame) = read.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("Ignoring non-UTF-8 binary frame from {}", addr);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Viewer {} error: {}", addr, e);
                    break;
                }
            };

            match self.handle_client_frame(&text).await {
                Ok(delivered) => debug!("Relayed frame from {} to {} viewers", addr, delivered),
                Err(e) => warn!("Failed to process frame from {}: {}", addr, e),
            }
        }

        self.unregister(id).await;
        writer.abort();
        info!("Viewer disconnected from {}", addr);
        Ok(())
    }
}

#[async_trait]
impl ChatSink for BroadcastRelay {
    /// The producer is a relay client like any viewer: its usernames are logged too
    async fn publish(&self, envelopes: &[ChatEnvelope]) -> usize {
        let mut delivered = 0;
        for envelope in envelopes {
            delivered += self.relay_from_client(envelope).await;
        }
        delivered
    }
}
