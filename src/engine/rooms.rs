//! Room Broadcaster
//!
//! Maintains the room → member-connection mapping and fans events out to a
//! room or to every registered connection. Rooms are implicit: created on
//! first join, dropped from the table when their member set empties.
//!
//! Membership mutations hold the registry's connection table and the room
//! table together (always registry first, then rooms) so a connection id
//! never lingers in a room after leaving the registry. Broadcast paths take
//! the locks one at a time and never hold them across delivery to a slow
//! receiver; outbound events go through each connection's unbounded channel,
//! so one dead or slow recipient cannot block the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::{EngineError, EngineResult};
use super::events::ServerEvent;
use super::registry::{ConnectionId, ConnectionRegistry};

/// Room membership table and fan-out
pub struct RoomBroadcaster {
    registry: Arc<ConnectionRegistry>,
    /// Room name → member connection ids; empty-implies-absent
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl RoomBroadcaster {
    /// Create a broadcaster over the given registry
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a room. Idempotent; returns true if the
    /// connection was not already a member. Fails with `UnknownConnection`
    /// if the connection is not registered.
    pub async fn join(&self, connection_id: &str, room: &str) -> EngineResult<bool> {
        let mut connections = self.registry.table().write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;

        let newly = entry.rooms.insert(room.to_string());

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());

        if newly {
            tracing::debug!(connection_id = %connection_id, room = %room, "joined room");
        }
        Ok(newly)
    }

    /// Remove a connection from a room. Returns true if it was a member;
    /// leaving a room never joined is a no-op.
    pub async fn leave(&self, connection_id: &str, room: &str) -> EngineResult<bool> {
        let mut connections = self.registry.table().write().await;
        let entry = connections
            .get_mut(connection_id)
            .ok_or(EngineError::UnknownConnection)?;

        let was_member = entry.rooms.remove(room);

        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }

        if was_member {
            tracing::debug!(connection_id = %connection_id, room = %room, "left room");
        }
        Ok(was_member)
    }

    /// Remove a connection from every room it had joined, returning the
    /// vacated rooms. Unknown connections yield an empty list; disconnect
    /// cleanup can race with transport teardown.
    pub async fn leave_all(&self, connection_id: &str) -> Vec<String> {
        let mut connections = self.registry.table().write().await;
        let Some(entry) = connections.get_mut(connection_id) else {
            return Vec::new();
        };

        let joined: Vec<String> = entry.rooms.drain().collect();
        if joined.is_empty() {
            return Vec::new();
        }

        let mut rooms = self.rooms.write().await;
        for room in &joined {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(connection_id);
                if members.is_empty() {
                    rooms.remove(room);
                    tracing::debug!(room = %room, "room emptied");
                }
            }
        }

        joined
    }

    /// Drop a connection from the given rooms without touching the
    /// registry. For teardown of a connection that has already been
    /// unregistered: no new membership can appear for it, so this settles
    /// any membership a racing join recorded after `leave_all` ran.
    pub(crate) async fn evict(&self, connection_id: &str, vacated: &HashSet<String>) {
        let mut rooms = self.rooms.write().await;
        for room in vacated {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(connection_id);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
    }

    /// Deliver an event to every member of a room.
    ///
    /// Sending to an unknown or empty room is a successful no-op. Delivery
    /// is attempted per recipient; a closed receiver is skipped and never
    /// fails the broadcast. A member id missing from the registry breaks
    /// the no-dangling-membership invariant: it is logged at error level
    /// and pruned.
    pub async fn broadcast_to_room(&self, room: &str, event: ServerEvent) {
        let members: Vec<ConnectionId> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.iter().cloned().collect(),
                None => return,
            }
        };

        let mut dangling = Vec::new();
        let mut delivered = 0usize;
        {
            let connections = self.registry.table().read().await;
            for id in &members {
                match connections.get(id) {
                    Some(entry) => {
                        if entry.sender.send(event.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            tracing::debug!(
                                connection_id = %id,
                                room = %room,
                                "send failed, receiver gone"
                            );
                        }
                    }
                    None => dangling.push(id.clone()),
                }
            }
        }

        if !dangling.is_empty() {
            // Re-check under the registry→rooms lock order: an id observed
            // dangling above may have re-registered and re-joined since the
            // read lock was released, and must not be evicted.
            let connections = self.registry.table().read().await;
            let mut rooms = self.rooms.write().await;
            let mut pruned = Vec::new();
            if let Some(members) = rooms.get_mut(room) {
                for id in &dangling {
                    if !connections.contains_key(id) && members.remove(id) {
                        pruned.push(id.clone());
                    }
                }
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
            if !pruned.is_empty() {
                tracing::error!(
                    room = %room,
                    members = ?pruned,
                    "room members missing from registry, pruned"
                );
            }
        }

        tracing::trace!(room = %room, delivered, "room broadcast");
    }

    /// Deliver an event to every registered connection, with the same
    /// per-recipient failure isolation as room broadcasts.
    pub async fn broadcast_to_all(&self, event: ServerEvent) {
        let connections = self.registry.table().read().await;
        let mut delivered = 0usize;
        for (id, entry) in connections.iter() {
            if entry.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(connection_id = %id, "send failed, receiver gone");
            }
        }
        tracing::trace!(delivered, "global broadcast");
    }

    /// Current members of a room (empty if the room does not exist)
    pub async fn members(&self, room: &str) -> HashSet<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Names of all rooms with at least one member
    pub async fn rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
