//! # Agora
//!
//! Real-time messaging backend: clients connect over WebSocket, join named
//! rooms, broadcast chat messages to room members, and receive live
//! presence updates.
//!
//! ## Features
//!
//! - **Connection engine**: registry, presence, and room broadcast with
//!   per-recipient failure isolation
//! - **Protocol state machine**: validated join/send/disconnect lifecycle
//!   with errors reported to the originating connection only
//! - **Best-effort persistence**: SQLite-backed user directory and message
//!   log that never blocks live delivery
//! - **HTTP surface**: health probes and a presence snapshot endpoint
//!
//! ## Modules
//!
//! - [`engine`]: the connection/presence/room-broadcast core
//! - [`store`]: external collaborator traits + SQLite implementation
//! - [`websocket`]: the axum WebSocket transport
//! - [`api`]: HTTP router and server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agora::api::{serve, ApiConfig, AppState};
//! use agora::store::SqliteStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::new(Path::new("./agora_data"))?);
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(config.clone(), store.clone(), store);
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod store;
pub mod websocket;

// Re-export top-level types for convenience
pub use engine::{
    ClientEvent, ConnectionRegistry, ConnectionState, EngineError, EngineResult, EventDispatcher,
    PresenceTracker, RegistryConfig, RoomBroadcaster, ServerEvent,
};

pub use store::{
    MessageStore, SqliteStore, StoreError, StoreResult, StoredMessage, UserDirectory, UserProfile,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, ServerConfig, StoreConfig};

pub use websocket::websocket_handler;
