//! Engine Error Types
//!
//! Every engine error is local to one connection's request: it is reported
//! back to the originating connection as an `error` event and never aborts
//! the dispatcher or corrupts state for other connections.

use thiserror::Error;

use crate::store::StoreError;

/// Errors produced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A connection id was registered twice
    #[error("connection already registered")]
    DuplicateConnection,

    /// The referenced connection is not in the registry
    #[error("connection not found")]
    UnknownConnection,

    /// A required field was missing or empty
    #[error("missing or empty field: {0}")]
    Validation(&'static str),

    /// The sender has not joined the room it is sending to
    #[error("not a member of room {room}")]
    NotInRoom { room: String },

    /// The connection limit was reached
    #[error("connection limit reached (limit: {limit})")]
    AtCapacity { limit: usize },

    /// An external collaborator (user directory / message store) failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable wire-level kind string for `error` events
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DuplicateConnection => "duplicate_connection",
            EngineError::UnknownConnection => "unknown_connection",
            EngineError::Validation(_) => "validation_error",
            EngineError::NotInRoom { .. } => "not_in_room",
            EngineError::AtCapacity { .. } => "at_capacity",
            EngineError::Store(_) => "store_unavailable",
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
