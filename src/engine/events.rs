//! Protocol Event Types
//!
//! Defines the inbound and outbound event formats exchanged with clients
//! over the WebSocket transport. All events are JSON with a `type` tag.

use serde::{Deserialize, Serialize};

/// Events sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Identify this connection with a user id
    ///
    /// Usually carried as a `?user_id=` query parameter on the upgrade
    /// request, but also accepted as an explicit event after connect.
    Connect {
        #[serde(default)]
        user_id: Option<String>,
    },
    /// Explicit disconnect (the transport closing has the same effect)
    Disconnect,
    /// Join a named room
    ///
    /// Missing fields deserialize as empty strings and are rejected with a
    /// validation error rather than a parse failure.
    JoinRoom {
        #[serde(default)]
        room: String,
        #[serde(default)]
        username: String,
    },
    /// Send a message to a previously joined room
    SendMessage {
        #[serde(default)]
        room: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection established, carries the assigned connection id
    Connected {
        connection_id: String,
    },
    /// The online-user set changed; `users` is sorted by user id
    PresenceUpdate {
        users: Vec<String>,
    },
    /// Room-scoped announcement (e.g. "alice joined general")
    SystemMessage {
        room: String,
        message: String,
    },
    /// Chat message relayed verbatim to a room
    ChatMessage {
        room: String,
        payload: serde_json::Value,
    },
    /// Error report, delivered to the originating connection only
    Error {
        kind: String,
        reason: String,
    },
}
