//! Presence Routes
//!
//! Read-only REST view of the online-user set, for debugging and for
//! clients that poll state over HTTP instead of holding a socket open.
//!
//! - GET /api/v1/presence - Sorted list of online user ids

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::PresenceResponse;
use crate::api::state::AppState;

/// GET /api/v1/presence
pub async fn presence_snapshot(State(state): State<Arc<AppState>>) -> Json<PresenceResponse> {
    let users = state.presence.snapshot().await;
    let count = users.len();
    Json(PresenceResponse { users, count })
}
