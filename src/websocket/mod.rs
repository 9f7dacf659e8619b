//! WebSocket Transport
//!
//! Bridges the axum WebSocket upgrade to the event dispatcher.
//!
//! ## Lifecycle
//!
//! - Clients connect to `/ws`, optionally with `?user_id=` to identify
//!   immediately (the server answers with a `connected` ack and, when
//!   identified, a `presence_update` to everyone)
//! - Inbound frames are JSON `ClientEvent`s; malformed JSON gets an `error`
//!   event back without closing the socket
//! - The socket closing (close frame, read error, or send failure) drives
//!   the disconnect transition exactly once
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8082/ws?user_id=alice');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'join_room', room: 'general', username: 'alice'}));
//!   ws.send(JSON.stringify({type: 'send_message', room: 'general', payload: {text: 'hi'}}));
//! };
//! ```

mod handler;

pub use handler::websocket_handler;
