//! Peplike Assistant - peptide research chat backend
//!
//! Hosts one conversation thread per session and forwards completions to
//! an HTTP inference gateway.

mod api;
mod gateway;
mod runtime;
mod state_machine;
mod thread;

use api::{create_router, AppState};
use gateway::GatewayConfig;
use runtime::RuntimeSettings;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peplike_assistant=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let port: u16 = std::env::var("PEPLIKE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let settings = RuntimeSettings::from_env();
    tracing::info!(
        completion_timeout_secs = settings.completion_timeout.as_secs(),
        session_idle_secs = settings.session_idle_timeout.as_secs(),
        "Runtime settings loaded"
    );

    let gateway_config = GatewayConfig::from_env();
    match &gateway_config.url {
        Some(url) => tracing::info!(url = %url, "Inference gateway configured"),
        None => tracing::warn!("No inference gateway configured. Set PEPLIKE_GATEWAY_URL."),
    }
    // The client gives up together with the runtime
    let gateway = gateway_config.build(settings.completion_timeout)?;

    // Create application state
    let state = AppState::new(gateway, settings);
    let sessions = state.sessions.clone();
    sessions.spawn_reaper();

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Peplike Assistant listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
