//! Connection Registry
//!
//! Owns the table of live connections. Each entry maps a connection id to
//! its optional user identity, the set of rooms it has joined, and the
//! channel used to deliver outbound events to it.
//!
//! All mutation of connection state goes through this registry; the room
//! broadcaster shares its lock (in registry → rooms order) for operations
//! that must keep room membership consistent with the table.

use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};

use super::error::{EngineError, EngineResult};
use super::events::ServerEvent;

/// Unique identifier for a connection, assigned by the transport on accept
pub type ConnectionId = String;

/// One live connection's state
pub(crate) struct ConnectionEntry {
    /// User identity, None until the connection identifies itself
    pub(crate) user_id: Option<String>,
    /// Display name resolved from the user directory (advisory only)
    pub(crate) display_name: Option<String>,
    /// Rooms this connection has joined
    pub(crate) rooms: HashSet<String>,
    /// Outbound delivery channel for this connection
    pub(crate) sender: mpsc::UnboundedSender<ServerEvent>,
}

/// State returned by `unregister` so callers can finish cleanup
#[derive(Debug)]
pub struct RemovedConnection {
    /// Last known user id, if the connection had identified
    pub user_id: Option<String>,
    /// Rooms the connection was still a member of
    pub rooms: HashSet<String>,
}

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

/// Tracks all live connections
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a new, empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Shared access to the connection table for the room broadcaster.
    ///
    /// Lock order: this table first, then the room table.
    pub(crate) fn table(&self) -> &RwLock<HashMap<ConnectionId, ConnectionEntry>> {
        &self.connections
    }

    /// Register a new connection with no identity and no rooms
    ///
    /// Fails with `DuplicateConnection` if the id is already registered
    /// (no side effects; force-replacement is the dispatcher's policy) or
    /// `AtCapacity` when the connection limit is reached.
    pub async fn register(
        &self,
        connection_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> EngineResult<()> {
        let mut connections = self.connections.write().await;

        if connections.contains_key(connection_id) {
            return Err(EngineError::DuplicateConnection);
        }
        if connections.len() >= self.config.max_connections {
            return Err(EngineError::AtCapacity {
                limit: self.config.max_connections,
            });
        }

        connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                user_id: None,
                display_name: None,
                rooms: HashSet::new(),
                sender,
            },
        );

        tracing::info!(connection_id = %connection_id, "connection registered");
        Ok(())
    }

    /// Associate a user id with a connection
    ///
    /// Idempotent for the same user id; a different user id overwrites the
    /// old one (last-write-wins). Returns the previous user id so the
    /// caller can reconcile presence.
    pub async fn identify(
        &self,
        connection_id: &str,
        user_id: &str,
    ) -> EngineResult<Option<String>> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;

        let previous = entry.user_id.replace(user_id.to_string());
        if previous.as_deref() != Some(user_id) {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %user_id,
                previous = ?previous,
                "connection identified"
            );
        }
        Ok(previous)
    }

    /// Record a display name resolved from the user directory
    pub async fn set_display_name(&self, connection_id: &str, name: &str) -> EngineResult<()> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        entry.display_name = Some(name.to_string());
        Ok(())
    }

    /// Display name previously recorded for a connection, if any
    pub async fn display_name_of(&self, connection_id: &str) -> EngineResult<Option<String>> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        Ok(entry.display_name.clone())
    }

    /// Remove a connection, returning its last known state for cleanup
    ///
    /// Fails with `UnknownConnection` if absent; disconnects can race with
    /// cleanup, so callers treat that as a no-op with a logged warning.
    pub async fn unregister(&self, connection_id: &str) -> EngineResult<RemovedConnection> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .remove(connection_id)
            .ok_or(EngineError::UnknownConnection)?;

        tracing::info!(
            connection_id = %connection_id,
            user_id = ?entry.user_id,
            "connection unregistered"
        );
        Ok(RemovedConnection {
            user_id: entry.user_id,
            rooms: entry.rooms,
        })
    }

    /// Rooms the connection has joined
    pub async fn rooms_of(&self, connection_id: &str) -> EngineResult<HashSet<String>> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        Ok(entry.rooms.clone())
    }

    /// Record a room in the connection's joined set; true if newly added
    pub async fn add_room(&self, connection_id: &str, room: &str) -> EngineResult<bool> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        Ok(entry.rooms.insert(room.to_string()))
    }

    /// Remove a room from the connection's joined set; true if it was present
    pub async fn remove_room(&self, connection_id: &str, room: &str) -> EngineResult<bool> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        Ok(entry.rooms.remove(room))
    }

    /// User id associated with a connection, if identified
    pub async fn user_of(&self, connection_id: &str) -> EngineResult<Option<String>> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        Ok(entry.user_id.clone())
    }

    /// Number of live connections currently identified as `user_id`
    pub async fn user_connection_count(&self, user_id: &str) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|entry| entry.user_id.as_deref() == Some(user_id))
            .count()
    }

    /// Whether the connection is registered
    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    /// Total number of live connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send an event directly to one connection
    ///
    /// A closed receiver means the connection is effectively gone and is
    /// reported as `UnknownConnection`.
    pub async fn send_to(&self, connection_id: &str, event: ServerEvent) -> EngineResult<()> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(connection_id)
            .ok_or(EngineError::UnknownConnection)?;
        entry
            .sender
            .send(event)
            .map_err(|_| EngineError::UnknownConnection)
    }
}
