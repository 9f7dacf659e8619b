//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and pumps frames between the socket
//! and the event dispatcher.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::AppState;
use crate::engine::{ClientEvent, EngineError, EventDispatcher, ServerEvent};

/// Query parameters accepted on the upgrade request
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Identify the connection immediately, as if a `connect` event with
    /// this user id had been sent
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler, the entry point for `/ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dispatcher = Arc::clone(&state.dispatcher);
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, query.user_id))
}

/// Handle an established WebSocket connection until it closes
async fn handle_socket(
    socket: WebSocket,
    dispatcher: Arc<EventDispatcher>,
    user_id: Option<String>,
) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Channel the engine delivers outbound events through
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Empty query values identify nobody
    let user_id = user_id.filter(|id| !id.is_empty());

    if let Err(e) = dispatcher
        .connect(&connection_id, tx, user_id.as_deref())
        .await
    {
        tracing::warn!(connection_id = %connection_id, error = %e, "connection refused");
        let refusal = ServerEvent::Error {
            kind: e.kind().to_string(),
            reason: e.to_string(),
        };
        if let Ok(text) = serde_json::to_string(&refusal) {
            let _ = sender.send(Message::Text(text)).await;
        }
        // AtCapacity never registered; anything else still needs cleanup
        if !matches!(e, EngineError::AtCapacity { .. }) {
            dispatcher.disconnect(&connection_id).await;
        }
        return;
    }

    let send_conn_id = connection_id.clone();

    // Forward engine events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        tracing::debug!(
                            connection_id = %send_conn_id,
                            "socket send failed, closing connection"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound event");
                }
            }
        }
    });

    let recv_dispatcher = Arc::clone(&dispatcher);
    let recv_conn_id = connection_id.clone();

    // Feed socket frames into the dispatcher, in arrival order
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(message) => {
                    if !handle_frame(&recv_dispatcher, &recv_conn_id, message).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %recv_conn_id,
                        error = %e,
                        "socket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Runs exactly once per connection task; a second trigger from an
    // explicit disconnect event is absorbed as a no-op.
    dispatcher.disconnect(&connection_id).await;
}

/// Handle a single received frame
///
/// Returns false if the connection should be closed.
async fn handle_frame(
    dispatcher: &Arc<EventDispatcher>,
    connection_id: &str,
    message: Message,
) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    let closing = matches!(event, ClientEvent::Disconnect);
                    dispatcher.dispatch(connection_id, event).await;
                    !closing
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "invalid client event"
                    );
                    // Report but keep the connection open
                    dispatcher
                        .send_to(
                            connection_id,
                            ServerEvent::Error {
                                kind: "validation_error".to_string(),
                                reason: format!("invalid event: {}", e),
                            },
                        )
                        .await;
                    true
                }
            }
        }
        Message::Binary(_) => {
            dispatcher
                .send_to(
                    connection_id,
                    ServerEvent::Error {
                        kind: "validation_error".to_string(),
                        reason: "binary frames not supported".to_string(),
                    },
                )
                .await;
            true
        }
        // Axum answers pings automatically
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "client requested close");
            false
        }
    }
}
