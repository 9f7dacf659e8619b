//! Agora Server
//!
//! Run with: cargo run
//!
//! # Configuration
//!
//! Loaded from `config.toml` (see `config::load_default` for search paths)
//! with environment overrides:
//! - `AGORA_HOST`: Host to bind to (default: 0.0.0.0)
//! - `AGORA_PORT`: Port to listen on (default: 8082)
//! - `AGORA_MAX_CONNECTIONS`: Connection limit (default: 1000)
//! - `AGORA_DATA_DIR`: Database directory
//! - `AGORA_LOG_LEVEL` / `AGORA_LOG_FORMAT`: Logging (RUST_LOG also works)

use agora::api::{serve, ApiConfig, AppState};
use agora::config::Config;
use agora::store::SqliteStore;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_default();

    init_tracing(&config);

    tracing::info!("Starting Agora v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.store.data_dir);

    let store = Arc::new(SqliteStore::new(Path::new(&config.store.data_dir))?);

    let api_config = ApiConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        max_connections: config.server.max_connections,
    };

    let state = AppState::new(api_config.clone(), store.clone(), store);

    tracing::info!("Starting server on {}", api_config.addr());
    serve(state, &api_config).await?;

    tracing::info!("Agora stopped");
    Ok(())
}

/// Initialize the tracing subscriber from the logging config
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("agora={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
