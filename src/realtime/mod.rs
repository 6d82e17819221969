//! Room-scoped realtime fan-out
//!
//! Maintains the table of live connections and the rooms they belong to,
//! and pushes alert payloads to every member of a room. This is a
//! best-effort low-latency channel, not the system of record: a
//! broadcast into an empty room is a no-op, and a staff client that
//! joins late picks the alert up from the listing API.
//!
//! Membership is owned exclusively by the router; other components only
//! hold an `Arc<RealtimeRouter>` and go through its API.

use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Room for platform-wide administrators.
pub const ADMIN_ROOM: &str = "admin";

/// Room key for counselors of one organization.
pub fn org_room(organization_id: &str) -> String {
    format!("org:{}", organization_id)
}

/// Room key for one user's own connections.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Write side of a live connection.
///
/// Implementations wrap whatever transport carries the push (websocket,
/// SSE, in-process channel). `send` should return promptly; the router
/// applies its own write timeout on top.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Push one event to the connection.
    async fn send(&self, event: &str, payload: &serde_json::Value) -> Result<()>;
}

/// A message delivered to a room member.
#[derive(Debug, Clone)]
pub struct RoomMessage {
    /// Event name (e.g. `crisis_alert`)
    pub event: String,
    /// JSON payload
    pub payload: serde_json::Value,
}

/// In-process sink backed by an unbounded channel.
///
/// The embedding layer forwards received messages onto its transport;
/// tests read them directly.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RoomMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RoomMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConnectionSink for ChannelSink {
    async fn send(&self, event: &str, payload: &serde_json::Value) -> Result<()> {
        self.tx
            .send(RoomMessage {
                event: event.to_string(),
                payload: payload.clone(),
            })
            .map_err(|_| Error::Handler("connection closed".to_string()))
    }
}

/// Router owning connection registry and room membership.
pub struct RealtimeRouter {
    connections: RwLock<HashMap<String, Arc<dyn ConnectionSink>>>,
    rooms: RwLock<HashMap<String, HashSet<String>>>,
    write_timeout: Duration,
}

impl RealtimeRouter {
    /// Create a router with the given configuration.
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    /// Register a live connection. Call once on connect, before `join`.
    pub async fn register(&self, connection_id: &str, sink: Arc<dyn ConnectionSink>) {
        tracing::info!(connection_id, "Connection registered");
        let mut connections = self.connections.write().await;
        connections.insert(connection_id.to_string(), sink);
    }

    /// Add a registered connection to a room.
    pub async fn join(&self, connection_id: &str, room: &str) -> Result<()> {
        {
            let connections = self.connections.read().await;
            if !connections.contains_key(connection_id) {
                return Err(Error::NotFound(format!(
                    "connection {} is not registered",
                    connection_id
                )));
            }
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
        tracing::debug!(connection_id, room, "Joined room");
        Ok(())
    }

    /// Remove a connection from one room. A no-op when it is not a member.
    pub async fn leave(&self, connection_id: &str, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Drop a connection from every room and the registry.
    /// Invoked on disconnect and on write failure.
    pub async fn disconnect(&self, connection_id: &str) {
        {
            let mut rooms = self.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(connection_id);
                !members.is_empty()
            });
        }
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id).is_some()
        };
        if removed {
            tracing::info!(connection_id, "Connection dropped");
        }
    }

    /// Push an event to every member of a room.
    ///
    /// Fire-and-forget: returns the number of successful deliveries and
    /// never errors, even for an empty room. Writes run concurrently;
    /// a member that errors or exceeds the write timeout is dropped from
    /// all rooms rather than retried.
    pub async fn broadcast(
        &self,
        room: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> usize {
        let members: Vec<(String, Arc<dyn ConnectionSink>)> = {
            let rooms = self.rooms.read().await;
            let connections = self.connections.read().await;
            match rooms.get(room) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| {
                        connections.get(id).map(|sink| (id.clone(), Arc::clone(sink)))
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        if members.is_empty() {
            tracing::debug!(room, event, "Broadcast into empty room");
            return 0;
        }

        let write_timeout = self.write_timeout;
        let writes = members.into_iter().map(|(id, sink)| {
            let event = event.to_string();
            let payload = payload.clone();
            async move {
                match tokio::time::timeout(write_timeout, sink.send(&event, &payload)).await {
                    Ok(Ok(())) => (id, true),
                    Ok(Err(e)) => {
                        tracing::warn!(connection_id = %id, error = %e, "Push failed");
                        (id, false)
                    }
                    Err(_) => {
                        tracing::warn!(
                            connection_id = %id,
                            timeout_ms = write_timeout.as_millis() as u64,
                            "Push timed out"
                        );
                        (id, false)
                    }
                }
            }
        });

        let mut delivered = 0;
        for (id, ok) in futures::future::join_all(writes).await {
            if ok {
                delivered += 1;
            } else {
                self.disconnect(&id).await;
            }
        }

        tracing::debug!(room, event, delivered, "Broadcast complete");
        delivered
    }

    /// Number of members currently in a room.
    pub async fn member_count(&self, room: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(HashSet::len).unwrap_or(0)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
