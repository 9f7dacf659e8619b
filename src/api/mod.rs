//! Agora HTTP/WebSocket API
//!
//! HTTP layer for the messaging backend, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - The messaging connection (optionally `?user_id=` to
//!   identify immediately)
//!
//! ## Presence
//! - `GET /api/v1/presence` - Sorted list of online user ids
//!
//! ## History
//! - `GET /api/v1/rooms/:room/messages` - Recent messages in a room,
//!   newest first (`?limit=` to cap the count)
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status with engine gauges
//!
//! # Example
//!
//! ```rust,ignore
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

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::websocket::websocket_handler;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/presence", get(routes::presence::presence_snapshot))
        .route("/rooms/:room/messages", get(routes::history::room_history));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()) // Configure properly in production
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Agora listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Agora shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path()).unwrap());
        let config = ApiConfig::default();

        let state = AppState::new(config, store.clone(), store.clone());
        let router = build_router(state);

        (router, store, dir)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _store, _dir) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let (app, _store, _dir) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _store, _dir) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["connections"], 0);
    }

    #[tokio::test]
    async fn test_presence_empty() {
        let (app, _store, _dir) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/presence")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let presence: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(presence["count"], 0);
        assert_eq!(presence["users"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_room_history_returns_recent_messages() {
        use crate::store::MessageStore;

        let (app, store, _dir) = create_test_app();
        store
            .append("general", "u1", r#"{"text":"hi"}"#, chrono::Utc::now())
            .unwrap();
        store
            .append("general", "u2", r#"{"text":"hey"}"#, chrono::Utc::now())
            .unwrap();
        store
            .append("random", "u1", r#"{"text":"elsewhere"}"#, chrono::Utc::now())
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/rooms/general/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let history: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(history["room"], "general");
        assert_eq!(history["count"], 2);
        // Newest first; the other room's message is not included
        assert_eq!(history["messages"][0]["sender_id"], "u2");
        assert_eq!(history["messages"][1]["sender_id"], "u1");
    }

    #[tokio::test]
    async fn test_room_history_respects_limit() {
        use crate::store::MessageStore;

        let (app, store, _dir) = create_test_app();
        for i in 0..5 {
            store
                .append("general", "u1", &format!(r#"{{"n":{}}}"#, i), chrono::Utc::now())
                .unwrap();
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/rooms/general/messages?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let history: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(history["count"], 2);
    }

    #[tokio::test]
    async fn test_room_history_unknown_room_is_empty() {
        let (app, _store, _dir) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/rooms/nowhere/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let history: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(history["count"], 0);
        assert_eq!(history["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (app, _store, _dir) = create_test_app();

        // A plain GET without the upgrade headers is rejected, not a 404
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }
}
