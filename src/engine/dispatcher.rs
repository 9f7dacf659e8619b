//! Event Dispatcher
//!
//! The protocol-facing state machine. Validates inbound events, drives the
//! registry, presence tracker, and room broadcaster, and emits outbound
//! events. Every failure is reported to the originating connection only;
//! nothing here aborts the process or touches other connections' state.
//!
//! Per-connection states: `Unidentified` (registered, no user id) →
//! `Identified` (user id known) → `Terminated` (unregistered). The state is
//! derived from registry contents rather than stored separately.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::{EngineError, EngineResult};
use super::events::{ClientEvent, ServerEvent};
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;
use super::rooms::RoomBroadcaster;
use crate::store::{MessageStore, StoreError, UserDirectory};

/// Lifecycle state of a connection, derived from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered but not yet identified with a user id
    Unidentified,
    /// Registered with a known user id
    Identified,
    /// No longer registered
    Terminated,
}

/// Maps inbound protocol events to state transitions and outbound events
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    rooms: Arc<RoomBroadcaster>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn MessageStore>,
}

impl EventDispatcher {
    /// Create a dispatcher over the engine components and collaborators
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        rooms: Arc<RoomBroadcaster>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            presence,
            rooms,
            users,
            store,
        }
    }

    /// Register a new connection and optionally identify it.
    ///
    /// A duplicate connection id means a stale session the transport never
    /// reported closed (reconnect race): the old entry gets the full
    /// disconnect treatment and the new one takes its place. `AtCapacity`
    /// is returned to the caller so the transport can refuse the socket.
    pub async fn connect(
        &self,
        connection_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
        user_id: Option<&str>,
    ) -> EngineResult<()> {
        if let Err(e) = self.registry.register(connection_id, sender.clone()).await {
            match e {
                EngineError::DuplicateConnection => {
                    tracing::error!(
                        connection_id = %connection_id,
                        "duplicate connect, force-replacing stale entry"
                    );
                    self.disconnect(connection_id).await;
                    self.registry.register(connection_id, sender).await?;
                }
                other => return Err(other),
            }
        }

        let _ = self
            .registry
            .send_to(
                connection_id,
                ServerEvent::Connected {
                    connection_id: connection_id.to_string(),
                },
            )
            .await;

        if let Some(user_id) = user_id {
            self.identify(connection_id, user_id).await?;
        }
        Ok(())
    }

    /// Associate a user id with a connection and reconcile presence.
    ///
    /// Last-write-wins on re-identification: if the previous user id has no
    /// remaining connections it drops from presence. Any presence change is
    /// broadcast to all connections as a sorted snapshot.
    pub async fn identify(&self, connection_id: &str, user_id: &str) -> EngineResult<()> {
        if user_id.is_empty() {
            return Err(EngineError::Validation("user_id"));
        }

        let previous = self.registry.identify(connection_id, user_id).await?;

        let mut changed = false;
        if let Some(prev) = previous.filter(|p| p.as_str() != user_id) {
            let has_other = self.registry.user_connection_count(&prev).await > 0;
            changed |= self.presence.mark_offline_if_last(&prev, has_other).await;
        }
        changed |= self.presence.mark_online(user_id).await;

        // Display info is advisory; an absent or unreachable directory
        // never fails the identify.
        match self.users.lookup(user_id) {
            Ok(profile) => {
                let _ = self
                    .registry
                    .set_display_name(connection_id, &profile.username)
                    .await;
            }
            Err(StoreError::NotFound) => {
                tracing::debug!(user_id = %user_id, "no directory entry for user");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "user directory lookup failed");
            }
        }

        if changed {
            self.broadcast_presence().await;
        }
        Ok(())
    }

    /// Join a room and announce it to the room's members.
    ///
    /// Re-joining is a no-op for membership but still re-announces.
    pub async fn join_room(
        &self,
        connection_id: &str,
        room: &str,
        username: &str,
    ) -> EngineResult<()> {
        if room.is_empty() {
            return Err(EngineError::Validation("room"));
        }
        if username.is_empty() {
            return Err(EngineError::Validation("username"));
        }

        self.rooms.join(connection_id, room).await?;

        self.rooms
            .broadcast_to_room(
                room,
                ServerEvent::SystemMessage {
                    room: room.to_string(),
                    message: format!("{} joined {}", username, room),
                },
            )
            .await;
        Ok(())
    }

    /// Relay a message verbatim to a room the sender has joined.
    ///
    /// The sender is a room member and receives its own message. Identified
    /// senders get their message appended to the store first; a store
    /// failure is reported to the sender and logged but never blocks the
    /// live broadcast.
    pub async fn send_message(
        &self,
        connection_id: &str,
        room: &str,
        payload: serde_json::Value,
    ) -> EngineResult<()> {
        if room.is_empty() {
            return Err(EngineError::Validation("room"));
        }

        let joined = self.registry.rooms_of(connection_id).await?;
        if !joined.contains(room) {
            return Err(EngineError::NotInRoom {
                room: room.to_string(),
            });
        }

        if let Some(user_id) = self.registry.user_of(connection_id).await? {
            let content = payload.to_string();
            if let Err(e) = self
                .store
                .append(room, &user_id, &content, chrono::Utc::now())
            {
                tracing::warn!(
                    room = %room,
                    user_id = %user_id,
                    error = %e,
                    "message persistence failed, delivering live"
                );
                self.report_error(connection_id, &EngineError::Store(e)).await;
            }
        }

        self.rooms
            .broadcast_to_room(
                room,
                ServerEvent::ChatMessage {
                    room: room.to_string(),
                    payload,
                },
            )
            .await;
        Ok(())
    }

    /// Tear down a connection: vacate its rooms, reconcile presence, then
    /// unregister it last (cleanup reads need the pre-removal state).
    ///
    /// Idempotent: a disconnect for an unknown connection is a logged
    /// no-op, since read errors and explicit closes can both trigger it.
    pub async fn disconnect(&self, connection_id: &str) {
        if !self.registry.contains(connection_id).await {
            tracing::warn!(connection_id = %connection_id, "disconnect for unknown connection ignored");
            return;
        }

        let vacated = self.rooms.leave_all(connection_id).await;
        if !vacated.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                rooms = ?vacated,
                "left rooms on disconnect"
            );
        }

        let user_id = self.registry.user_of(connection_id).await.ok().flatten();
        let mut presence_changed = false;
        if let Some(ref user_id) = user_id {
            // This connection is still registered, so more than one entry
            // means another live connection carries the same user id.
            let has_other = self.registry.user_connection_count(user_id).await > 1;
            presence_changed = self
                .presence
                .mark_offline_if_last(user_id, has_other)
                .await;
        }

        match self.registry.unregister(connection_id).await {
            Ok(removed) => {
                // A join from another task can slip in between leave_all and
                // the unregister above. Once the registry entry is gone no
                // new membership can appear, so evicting what the entry
                // still listed settles both tables.
                if !removed.rooms.is_empty() {
                    self.rooms.evict(connection_id, &removed.rooms).await;
                }
            }
            Err(_) => {
                tracing::warn!(connection_id = %connection_id, "connection vanished during cleanup");
            }
        }

        if presence_changed {
            self.broadcast_presence().await;
        }
    }

    /// Apply one inbound event, reporting any failure to the origin only
    pub async fn dispatch(&self, connection_id: &str, event: ClientEvent) {
        let result = match event {
            ClientEvent::Connect { user_id } => match user_id.as_deref() {
                Some(user_id) => self.identify(connection_id, user_id).await,
                None => Ok(()),
            },
            ClientEvent::Disconnect => {
                self.disconnect(connection_id).await;
                Ok(())
            }
            ClientEvent::JoinRoom { room, username } => {
                self.join_room(connection_id, &room, &username).await
            }
            ClientEvent::SendMessage { room, payload } => {
                self.send_message(connection_id, &room, payload).await
            }
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %connection_id, error = %e, "event rejected");
            self.report_error(connection_id, &e).await;
        }
    }

    /// Send an `error` event to one connection
    pub async fn report_error(&self, connection_id: &str, error: &EngineError) {
        self.send_to(
            connection_id,
            ServerEvent::Error {
                kind: error.kind().to_string(),
                reason: error.to_string(),
            },
        )
        .await;
    }

    /// Send an event directly to one connection; a gone connection is
    /// silently skipped (it is already being torn down)
    pub async fn send_to(&self, connection_id: &str, event: ServerEvent) {
        let _ = self.registry.send_to(connection_id, event).await;
    }

    /// Lifecycle state of a connection
    pub async fn state_of(&self, connection_id: &str) -> ConnectionState {
        match self.registry.user_of(connection_id).await {
            Ok(Some(_)) => ConnectionState::Identified,
            Ok(None) => ConnectionState::Unidentified,
            Err(_) => ConnectionState::Terminated,
        }
    }

    async fn broadcast_presence(&self) {
        let users = self.presence.snapshot().await;
        self.rooms
            .broadcast_to_all(ServerEvent::PresenceUpdate { users })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::RegistryConfig;
    use crate::store::{StoreResult, StoredMessage, UserProfile};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory user directory double
    struct StaticDirectory(HashMap<String, String>);

    impl StaticDirectory {
        fn empty() -> Self {
            Self(HashMap::new())
        }
    }

    impl UserDirectory for StaticDirectory {
        fn lookup(&self, user_id: &str) -> StoreResult<UserProfile> {
            self.0
                .get(user_id)
                .map(|username| UserProfile {
                    user_id: user_id.to_string(),
                    username: username.clone(),
                })
                .ok_or(StoreError::NotFound)
        }
    }

    /// In-memory message store double that can be switched to failing
    struct RecordingStore {
        messages: Mutex<Vec<(String, String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl MessageStore for RecordingStore {
        fn append(
            &self,
            room: &str,
            sender_id: &str,
            content: &str,
            _timestamp: chrono::DateTime<chrono::Utc>,
        ) -> StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("store down".to_string()));
            }
            self.messages.lock().unwrap().push((
                room.to_string(),
                sender_id.to_string(),
                content.to_string(),
            ));
            Ok(())
        }

        fn recent(&self, room: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|(r, _, _)| r == room)
                .take(limit)
                .map(|(room, sender_id, content)| StoredMessage {
                    room: room.clone(),
                    sender_id: sender_id.clone(),
                    content: content.clone(),
                    timestamp: String::new(),
                })
                .collect())
        }
    }

    struct TestEngine {
        dispatcher: Arc<EventDispatcher>,
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        rooms: Arc<RoomBroadcaster>,
        store: Arc<RecordingStore>,
    }

    fn engine() -> TestEngine {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let presence = Arc::new(PresenceTracker::new());
        let rooms = Arc::new(RoomBroadcaster::new(Arc::clone(&registry)));
        let store = Arc::new(RecordingStore::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&presence),
            Arc::clone(&rooms),
            Arc::new(StaticDirectory::empty()),
            Arc::clone(&store) as Arc<dyn MessageStore>,
        ));
        TestEngine {
            dispatcher,
            registry,
            presence,
            rooms,
            store,
        }
    }

    async fn connect(
        engine: &TestEngine,
        id: &str,
        user_id: Option<&str>,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.dispatcher.connect(id, tx, user_id).await.unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_without_user_id_stays_unidentified() {
        let engine = engine();
        let mut rx = connect(&engine, "c1", None).await;

        assert_eq!(
            engine.dispatcher.state_of("c1").await,
            ConnectionState::Unidentified
        );
        assert!(engine.presence.is_empty().await);

        // Only the ack, no presence update
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Connected { .. }));
    }

    #[tokio::test]
    async fn test_connect_with_user_id_broadcasts_presence() {
        let engine = engine();
        let mut rx = connect(&engine, "c1", Some("alice")).await;

        assert_eq!(
            engine.dispatcher.state_of("c1").await,
            ConnectionState::Identified
        );
        assert!(engine.presence.contains("alice").await);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::PresenceUpdate { users } if users == &vec!["alice".to_string()]
        )));
    }

    #[tokio::test]
    async fn test_presence_round_trip() {
        let engine = engine();
        let _rx1 = connect(&engine, "c1", Some("alice")).await;
        let _rx2 = connect(&engine, "c2", Some("bob")).await;
        let _rx3 = connect(&engine, "c3", Some("carol")).await;

        assert_eq!(engine.presence.snapshot().await, vec!["alice", "bob", "carol"]);

        engine.dispatcher.disconnect("c1").await;
        engine.dispatcher.disconnect("c2").await;
        engine.dispatcher.disconnect("c3").await;

        // All connections gone: presence is exactly empty
        assert!(engine.presence.is_empty().await);
        assert_eq!(engine.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_same_user_two_connections() {
        let engine = engine();
        let _rx1 = connect(&engine, "c1", Some("alice")).await;
        let _rx2 = connect(&engine, "c2", Some("alice")).await;

        engine.dispatcher.disconnect("c1").await;
        // Still online via the second connection
        assert!(engine.presence.contains("alice").await);

        engine.dispatcher.disconnect("c2").await;
        assert!(!engine.presence.contains("alice").await);
    }

    #[tokio::test]
    async fn test_identify_last_write_wins_reconciles_presence() {
        let engine = engine();
        let _rx = connect(&engine, "c1", Some("alice")).await;

        engine.dispatcher.identify("c1", "bob").await.unwrap();

        // alice had no other connection: dropped; bob online
        assert!(!engine.presence.contains("alice").await);
        assert!(engine.presence.contains("bob").await);
    }

    #[tokio::test]
    async fn test_join_announces_to_room() {
        let engine = engine();
        let mut rx1 = connect(&engine, "c1", Some("alice")).await;
        let mut rx2 = connect(&engine, "c2", Some("bob")).await;

        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        engine
            .dispatcher
            .join_room("c2", "general", "bob")
            .await
            .unwrap();

        // Both room members see the announcement; the wording matches the
        // outbound contract.
        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert!(events.iter().any(|e| matches!(
                e,
                ServerEvent::SystemMessage { room, message }
                    if room == "general" && message == "bob joined general"
            )));
        }
    }

    #[tokio::test]
    async fn test_rejoin_reannounces() {
        let engine = engine();
        let mut rx = connect(&engine, "c1", Some("alice")).await;

        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();
        drain(&mut rx);

        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::SystemMessage { .. })));
        assert_eq!(engine.rooms.members("general").await.len(), 1);
    }

    #[tokio::test]
    async fn test_join_validation_errors() {
        let engine = engine();
        let _rx = connect(&engine, "c1", Some("alice")).await;

        assert!(matches!(
            engine.dispatcher.join_room("c1", "", "alice").await,
            Err(EngineError::Validation("room"))
        ));
        assert!(matches!(
            engine.dispatcher.join_room("c1", "general", "").await,
            Err(EngineError::Validation("username"))
        ));
        // Nothing joined
        assert_eq!(engine.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_before_join_fails_without_broadcast() {
        let engine = engine();
        let mut rx1 = connect(&engine, "c1", Some("alice")).await;
        let mut rx2 = connect(&engine, "c2", Some("bob")).await;
        engine
            .dispatcher
            .join_room("c2", "general", "bob")
            .await
            .unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let result = engine
            .dispatcher
            .send_message("c1", "general", json!({"text": "hi"}))
            .await;
        assert!(matches!(result, Err(EngineError::NotInRoom { .. })));

        // No chat message reached the room
        assert!(drain(&mut rx2)
            .iter()
            .all(|e| !matches!(e, ServerEvent::ChatMessage { .. })));
    }

    #[tokio::test]
    async fn test_chat_scenario_with_echo_to_self() {
        let engine = engine();
        let mut alice = connect(&engine, "c1", Some("alice")).await;
        let mut bob = connect(&engine, "c2", Some("bob")).await;
        let mut carol = connect(&engine, "c3", Some("carol")).await;

        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();
        engine
            .dispatcher
            .join_room("c2", "general", "bob")
            .await
            .unwrap();
        engine
            .dispatcher
            .join_room("c3", "random", "carol")
            .await
            .unwrap();
        drain(&mut alice);
        drain(&mut bob);
        drain(&mut carol);

        engine
            .dispatcher
            .send_message("c1", "general", json!({"text": "hi"}))
            .await
            .unwrap();

        // Both general members receive the payload verbatim, including the
        // sender (echo-to-self).
        for rx in [&mut alice, &mut bob] {
            let events = drain(rx);
            assert!(events.iter().any(|e| matches!(
                e,
                ServerEvent::ChatMessage { room, payload }
                    if room == "general" && payload == &json!({"text": "hi"})
            )));
        }

        // No other room is affected
        assert!(drain(&mut carol).is_empty());

        // Identified sender: the message was persisted
        let stored = engine.store.messages.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, "general");
        assert_eq!(stored[0].1, "alice");
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_delivery() {
        let engine = engine();
        let mut alice = connect(&engine, "c1", Some("alice")).await;
        let mut bob = connect(&engine, "c2", Some("bob")).await;
        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();
        engine
            .dispatcher
            .join_room("c2", "general", "bob")
            .await
            .unwrap();
        drain(&mut alice);
        drain(&mut bob);

        engine.store.fail.store(true, Ordering::SeqCst);

        engine
            .dispatcher
            .send_message("c1", "general", json!({"text": "hi"}))
            .await
            .unwrap();

        // Sender gets the store error, both still get the live message
        let alice_events = drain(&mut alice);
        assert!(alice_events.iter().any(|e| matches!(
            e,
            ServerEvent::Error { kind, .. } if kind == "store_unavailable"
        )));
        assert!(alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatMessage { .. })));
        assert!(drain(&mut bob)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatMessage { .. })));
    }

    #[tokio::test]
    async fn test_unidentified_sender_delivers_without_persisting() {
        let engine = engine();
        let mut rx = connect(&engine, "c1", None).await;
        engine
            .dispatcher
            .join_room("c1", "general", "guest")
            .await
            .unwrap();
        drain(&mut rx);

        engine
            .dispatcher
            .send_message("c1", "general", json!({"text": "hi"}))
            .await
            .unwrap();

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatMessage { .. })));
        assert!(engine.store.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_vacates_rooms_and_forgets_empty_ones() {
        let engine = engine();
        let mut rx1 = connect(&engine, "c1", Some("alice")).await;
        let mut rx2 = connect(&engine, "c2", Some("bob")).await;

        engine
            .dispatcher
            .join_room("c1", "a", "alice")
            .await
            .unwrap();
        engine
            .dispatcher
            .join_room("c1", "b", "alice")
            .await
            .unwrap();
        engine.dispatcher.join_room("c2", "b", "bob").await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        engine.dispatcher.disconnect("c1").await;

        assert_eq!(
            engine.dispatcher.state_of("c1").await,
            ConnectionState::Terminated
        );
        // Sole-member room "a" is unobservable; broadcasting to it is a
        // no-op, not an error.
        assert!(!engine.rooms.rooms().await.contains(&"a".to_string()));
        engine
            .rooms
            .broadcast_to_room(
                "a",
                ServerEvent::SystemMessage {
                    room: "a".to_string(),
                    message: "anyone?".to_string(),
                },
            )
            .await;

        // "b" still has bob
        assert!(engine.rooms.members("b").await.contains("c2"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let engine = engine();
        let _rx = connect(&engine, "c1", Some("alice")).await;

        engine.dispatcher.disconnect("c1").await;
        // Second trigger (read error racing explicit close) is absorbed
        engine.dispatcher.disconnect("c1").await;

        assert!(!engine.presence.contains("alice").await);
        assert_eq!(engine.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_connect_force_replaces() {
        let engine = engine();
        let _rx1 = connect(&engine, "c1", Some("alice")).await;
        engine
            .dispatcher
            .join_room("c1", "general", "alice")
            .await
            .unwrap();

        // Same connection id reconnects as bob before the old transport
        // reported closure
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        engine
            .dispatcher
            .connect("c1", tx2, Some("bob"))
            .await
            .unwrap();

        // Old entry fully cleaned up, new one live
        assert_eq!(engine.registry.connection_count().await, 1);
        assert!(!engine.presence.contains("alice").await);
        assert!(engine.presence.contains("bob").await);
        assert!(engine.rooms.members("general").await.is_empty());
        assert!(drain(&mut rx2)
            .iter()
            .any(|e| matches!(e, ServerEvent::Connected { .. })));
    }

    #[tokio::test]
    async fn test_dispatch_reports_errors_to_origin_only() {
        let engine = engine();
        let mut rx1 = connect(&engine, "c1", Some("alice")).await;
        let mut rx2 = connect(&engine, "c2", Some("bob")).await;
        drain(&mut rx1);
        drain(&mut rx2);

        engine
            .dispatcher
            .dispatch(
                "c1",
                ClientEvent::SendMessage {
                    room: "general".to_string(),
                    payload: json!({"text": "hi"}),
                },
            )
            .await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Error { kind, .. } if kind == "not_in_room"
        )));
        // Other connections unaffected
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_connect_event_identifies() {
        let engine = engine();
        let _rx = connect(&engine, "c1", None).await;

        engine
            .dispatcher
            .dispatch(
                "c1",
                ClientEvent::Connect {
                    user_id: Some("alice".to_string()),
                },
            )
            .await;

        assert_eq!(
            engine.dispatcher.state_of("c1").await,
            ConnectionState::Identified
        );
        assert!(engine.presence.contains("alice").await);
    }

    #[tokio::test]
    async fn test_dispatch_explicit_disconnect() {
        let engine = engine();
        let _rx = connect(&engine, "c1", Some("alice")).await;

        engine.dispatcher.dispatch("c1", ClientEvent::Disconnect).await;

        assert_eq!(
            engine.dispatcher.state_of("c1").await,
            ConnectionState::Terminated
        );
        assert!(!engine.presence.contains("alice").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_and_disconnect_settle_consistently() {
        // Joins from several tasks race a disconnect of the same
        // connection. Whatever the interleaving, teardown must leave no
        // room listing an unregistered connection.
        for _ in 0..16 {
            let engine = engine();
            let (tx, _rx) = mpsc::unbounded_channel();
            engine
                .dispatcher
                .connect("c1", tx, Some("alice"))
                .await
                .unwrap();
            let _bob = connect(&engine, "c2", Some("bob")).await;
            engine
                .dispatcher
                .join_room("c2", "room0", "bob")
                .await
                .unwrap();

            let mut handles = Vec::new();
            for i in 0..4 {
                let dispatcher = Arc::clone(&engine.dispatcher);
                handles.push(tokio::spawn(async move {
                    let room = format!("room{}", i);
                    for _ in 0..32 {
                        // Fails with UnknownConnection once c1 is gone
                        let _ = dispatcher.join_room("c1", &room, "alice").await;
                    }
                }));
            }
            let dispatcher = Arc::clone(&engine.dispatcher);
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                dispatcher.disconnect("c1").await;
            }));
            for handle in handles {
                handle.await.unwrap();
            }

            assert!(!engine.registry.contains("c1").await);
            assert!(!engine.presence.contains("alice").await);
            for room in engine.rooms.rooms().await {
                for id in engine.rooms.members(&room).await {
                    assert!(
                        engine.registry.contains(&id).await,
                        "room {} lists unregistered connection {}",
                        room,
                        id
                    );
                }
            }
            // Bystander membership untouched
            assert!(engine.rooms.members("room0").await.contains("c2"));
        }
    }

    #[tokio::test]
    async fn test_connect_at_capacity_is_refused() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections: 1,
        }));
        let presence = Arc::new(PresenceTracker::new());
        let rooms = Arc::new(RoomBroadcaster::new(Arc::clone(&registry)));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&registry),
            presence,
            rooms,
            Arc::new(StaticDirectory::empty()),
            Arc::new(RecordingStore::new()),
        );

        let (tx1, _rx1) = mpsc::unbounded_channel();
        dispatcher.connect("c1", tx1, None).await.unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let result = dispatcher.connect("c2", tx2, None).await;
        assert!(matches!(result, Err(EngineError::AtCapacity { limit: 1 })));
    }
}
