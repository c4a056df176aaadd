//! Room Controller binary.
//!
//! Startup flow:
//!
//! 1. Initialize tracing from `RUST_LOG` (default: debug for this crate)
//! 2. Load configuration from environment
//! 3. Install the Prometheus metrics recorder
//! 4. Spawn the room registry actor
//! 5. Serve HTTP + WebSocket until ctrl-c, then cancel the registry so
//!    every open room broadcasts `room_closed` before exit

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::config::Config;
use room_controller::http::{self, AppState};
use room_controller::observability::HealthState;
use room_controller::registry::RoomRegistryHandle;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting room controller");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        e
    })?;
    info!(
        bind_address = %config.bind_address,
        bcrypt_cost = config.bcrypt_cost,
        "configuration loaded"
    );

    PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "failed to install metrics recorder");
        format!("failed to install metrics recorder: {e}")
    })?;

    let health = Arc::new(HealthState::new());
    let registry = RoomRegistryHandle::new(config.clone());

    let state = AppState {
        registry: registry.clone(),
        config: Arc::new(config.clone()),
        health: Arc::clone(&health),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(bind_address = %config.bind_address, "listening");
    health.set_ready();

    let shutdown_registry = registry.clone();
    let shutdown_health = Arc::clone(&health);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_health.set_not_ready();
            shutdown_registry.cancel();
        })
        .await?;

    info!("room controller stopped");
    Ok(())
}
