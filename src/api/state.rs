//! Application State
//!
//! Shared state accessible by all handlers, wrapped in Arc for sharing
//! across async tasks. Owns the engine instances; they are created at
//! server start and torn down with the process, never globals.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{
    ConnectionRegistry, EventDispatcher, PresenceTracker, RegistryConfig, RoomBroadcaster,
};
use crate::store::{MessageStore, UserDirectory};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Connection registry (live connection table)
    pub registry: Arc<ConnectionRegistry>,
    /// Online-user set
    pub presence: Arc<PresenceTracker>,
    /// Room membership and fan-out
    pub rooms: Arc<RoomBroadcaster>,
    /// Protocol event dispatcher
    pub dispatcher: Arc<EventDispatcher>,
    /// Message history log, read by the REST surface
    pub store: Arc<dyn MessageStore>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Wire up the engine over the given external collaborators
    pub fn new(
        config: ApiConfig,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections: config.max_connections,
        }));
        let presence = Arc::new(PresenceTracker::new());
        let rooms = Arc::new(RoomBroadcaster::new(Arc::clone(&registry)));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&presence),
            Arc::clone(&rooms),
            users,
            Arc::clone(&store),
        ));

        Self {
            registry,
            presence,
            rooms,
            dispatcher,
            store,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent WebSocket connections
    pub max_connections: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            max_connections: 1000,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// The socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
