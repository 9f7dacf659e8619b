//! Data Transfer Objects
//!
//! Response types for the REST surface, serialized to JSON.

use serde::Serialize;

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy"
    pub status: String,
    /// Number of live WebSocket connections
    pub connections: usize,
    /// Number of rooms with at least one member
    pub rooms: usize,
    /// Number of online users
    pub online_users: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
}

/// Presence snapshot response
#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    /// Online user ids, sorted
    pub users: Vec<String>,
    /// Convenience count of the above
    pub count: usize,
}

/// One message in a room's history
#[derive(Debug, Serialize)]
pub struct RoomMessage {
    /// User id of the sender
    pub sender_id: String,
    /// Message payload as it was sent (JSON text)
    pub content: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

/// Room history response, newest first
#[derive(Debug, Serialize)]
pub struct RoomHistoryResponse {
    /// The room the history belongs to
    pub room: String,
    /// Stored messages, newest first
    pub messages: Vec<RoomMessage>,
    /// Convenience count of the above
    pub count: usize,
}
