//! ssh-tunnel-gateway server entry point.
//!
//! Starts the Axum HTTP server with the SSH control endpoints and the
//! WebSocket streaming endpoint.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ssh_tunnel_gateway::api;
use ssh_tunnel_gateway::app_state::AppState;
use ssh_tunnel_gateway::config::{GatewayConfig, LogFormat};
use ssh_tunnel_gateway::domain::SessionRegistry;
use ssh_tunnel_gateway::protocol::CodecChain;
use ssh_tunnel_gateway::ssh::{RusshConnector, SshBridge};
use ssh_tunnel_gateway::ws::handler::ws_ssh_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting ssh-tunnel-gateway");

    // Build domain and bridge
    let codec = CodecChain::default();
    let registry = Arc::new(SessionRegistry::new(config.idle_settings(), codec.clone()));
    let bridge = Arc::new(SshBridge::new(
        Arc::new(RusshConnector::new()),
        config.bridge_settings(),
        codec,
    ));

    // Build application state
    let app_state = AppState::new(Arc::clone(&registry), bridge)
        .with_socket_queue_capacity(config.socket_queue_capacity);

    // Build router; the timeout only applies to plain HTTP routes
    let http = api::build_router().layer(TimeoutLayer::new(config.request_timeout()));
    let app = Router::new()
        .merge(http)
        .route("/ws/ssh/{id}", get(ws_ssh_handler));

    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        app.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
