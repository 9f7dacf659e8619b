//! Connection/Presence/Room-Broadcast Engine
//!
//! The core of the messaging backend. Tracks live connections, the set of
//! online users, and room membership, and fans events out to the right
//! connection sets.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: owns the table of live connections (leaf)
//! - **PresenceTracker**: the online-user set with change detection
//! - **RoomBroadcaster**: room membership and fan-out with per-recipient
//!   failure isolation
//! - **EventDispatcher**: the protocol-facing state machine driving the
//!   other three
//!
//! All shared state lives behind the registry and broadcaster; no component
//! mutates it directly.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod presence;
pub mod registry;
pub mod rooms;

pub use dispatcher::{ConnectionState, EventDispatcher};
pub use error::{EngineError, EngineResult};
pub use events::{ClientEvent, ServerEvent};
pub use presence::PresenceTracker;
pub use registry::{ConnectionId, ConnectionRegistry, RegistryConfig, RemovedConnection};
pub use rooms::RoomBroadcaster;
