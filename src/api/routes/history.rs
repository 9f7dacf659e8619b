//! Room History Routes
//!
//! Read-only REST view of the persisted chat log, so clients can backfill
//! a room before (or without) holding a socket open.
//!
//! - GET /api/v1/rooms/:room/messages - Recent messages, newest first

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::dto::{RoomHistoryResponse, RoomMessage};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::store::MessageStore;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of messages to return (capped)
    pub limit: Option<usize>,
}

/// GET /api/v1/rooms/:room/messages
pub async fn room_history(
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<RoomHistoryResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let messages: Vec<RoomMessage> = state
        .store
        .recent(&room, limit)?
        .into_iter()
        .map(|m| RoomMessage {
            sender_id: m.sender_id,
            content: m.content,
            timestamp: m.timestamp,
        })
        .collect();

    let count = messages.len();
    Ok(Json(RoomHistoryResponse {
        room,
        messages,
        count,
    }))
}
