//! Connection Session Management
//!
//! Maps player identity to exactly one open channel. A second authenticated
//! connection for the same identity force-closes the first with a distinct
//! "superseded" reason. A background reaper compares each channel's last
//! heartbeat against a timeout and force-closes any that have gone silent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::network::protocol::ServerEvent;

/// Why the manager closed a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection authenticated for the same player.
    Superseded,
    /// No heartbeat within the timeout window.
    IdleTimeout,
}

impl CloseReason {
    /// WebSocket close code for this reason.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Superseded => 4001,
            CloseReason::IdleTimeout => 4002,
        }
    }

    /// Human-readable close reason.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Superseded => "superseded by a newer session",
            CloseReason::IdleTimeout => "heartbeat timeout",
        }
    }
}

struct ClientHandle {
    conn_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
    close_tx: watch::Sender<Option<CloseReason>>,
    last_seen: Instant,
}

/// Owns the player-id → channel mapping for the whole process.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, ClientHandle>>,
}

impl ConnectionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for a player, force-closing any existing one.
    /// Returns this connection's id, used to scope later disconnects.
    pub async fn connect(
        &self,
        player_id: &str,
        sender: mpsc::Sender<ServerEvent>,
        close_tx: watch::Sender<Option<CloseReason>>,
    ) -> Uuid {
        let conn_id = Uuid::new_v4();
        let mut connections = self.connections.write().await;

        if let Some(existing) = connections.remove(player_id) {
            info!(player = %player_id, "Existing session superseded");
            let _ = existing.close_tx.send(Some(CloseReason::Superseded));
        }

        connections.insert(
            player_id.to_string(),
            ClientHandle {
                conn_id,
                sender,
                close_tx,
                last_seen: Instant::now(),
            },
        );
        debug!(player = %player_id, total = connections.len(), "Session registered");
        conn_id
    }

    /// Unregister a channel, but only if it is still the registered one.
    pub async fn disconnect(&self, player_id: &str, conn_id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections
            .get(player_id)
            .is_some_and(|h| h.conn_id == conn_id)
        {
            connections.remove(player_id);
            debug!(player = %player_id, total = connections.len(), "Session unregistered");
        }
    }

    /// Record channel activity for the reaper.
    pub async fn heartbeat(&self, player_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(handle) = connections.get_mut(player_id) {
            handle.last_seen = Instant::now();
        }
    }

    /// Best-effort personal send; a failed send unregisters the channel.
    pub async fn send_personal(&self, event: ServerEvent, player_id: &str) {
        let target = {
            let connections = self.connections.read().await;
            connections
                .get(player_id)
                .map(|h| (h.conn_id, h.sender.clone()))
        };

        if let Some((conn_id, sender)) = target {
            if sender.send(event).await.is_err() {
                warn!(player = %player_id, "Send failed, dropping channel");
                self.disconnect(player_id, conn_id).await;
            }
        }
    }

    /// Fan an event out to every registered channel; per-channel failures
    /// are isolated.
    pub async fn broadcast(&self, event: ServerEvent) {
        let targets: Vec<(String, Uuid, mpsc::Sender<ServerEvent>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, h)| (id.clone(), h.conn_id, h.sender.clone()))
                .collect()
        };

        for (player_id, conn_id, sender) in targets {
            if sender.send(event.clone()).await.is_err() {
                warn!(player = %player_id, "Broadcast send failed, dropping channel");
                self.disconnect(&player_id, conn_id).await;
            }
        }
    }

    /// Whether a player currently has a registered channel.
    pub async fn is_connected(&self, player_id: &str) -> bool {
        self.connections.read().await.contains_key(player_id)
    }

    /// Number of registered channels.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Force-close every channel silent longer than `timeout`.
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut connections = self.connections.write().await;
        let stale: Vec<String> = connections
            .iter()
            .filter(|(_, h)| now.duration_since(h.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for player_id in &stale {
            if let Some(handle) = connections.remove(player_id) {
                info!(player = %player_id, "Reaped idle session");
                let _ = handle.close_tx.send(Some(CloseReason::IdleTimeout));
            }
        }
        stale.len()
    }

    /// Spawn the process-wide reaper task.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        period: Duration,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                manager.reap_idle(timeout).await;
            }
        })
    }
}
