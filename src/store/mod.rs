//! External Collaborator Stores
//!
//! The engine treats persistent user and message data as external
//! collaborators behind two narrow traits: a `UserDirectory` for resolving
//! display info and a `MessageStore` for the chat history log. Both are
//! best-effort from the dispatcher's point of view: a failing store is
//! reported but never blocks live delivery.

mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from the user directory or message store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist
    #[error("not found")]
    NotFound,

    /// The store could not be reached or the operation failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Display information for a known user
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
}

/// Resolves user ids to display info
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id; `NotFound` if unknown
    fn lookup(&self, user_id: &str) -> StoreResult<UserProfile>;
}

/// A stored chat message, as read back from the log
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub room: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: String,
}

/// Appends chat messages to persistent history and reads it back
pub trait MessageStore: Send + Sync {
    /// Record one message. Failure is non-fatal for live delivery.
    fn append(
        &self,
        room: &str,
        sender_id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Most recent messages in a room, newest first
    fn recent(&self, room: &str, limit: usize) -> StoreResult<Vec<StoredMessage>>;
}
