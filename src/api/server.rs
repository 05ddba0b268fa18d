use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    acknowledge, drain_actions, end_downtime, evaluate_rule, force_check, get_host, get_service,
    health_check, list_entities, notification_completed, pending_actions, recent_log,
    remove_acknowledgement, start_downtime, submit_result, AppState,
};
use crate::engine::Engine;
use crate::worker::TickWorker;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tick_interval_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Create a server config from environment variables
    /// VIGIL_HOST=0.0.0.0
    /// VIGIL_PORT=8080
    /// VIGIL_TICK_MS=1000
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("VIGIL_HOST").unwrap_or(defaults.host);
        let port = std::env::var("VIGIL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let tick_interval_ms = std::env::var("VIGIL_TICK_MS")
            .ok()
            .and_then(|t| t.parse().ok())
            .filter(|t| *t > 0)
            .unwrap_or(defaults.tick_interval_ms);

        Self {
            host,
            port,
            tick_interval_ms,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Inspection
        .route("/entities", get(list_entities))
        .route("/entities/:host", get(get_host))
        .route("/entities/:host/:service", get(get_service))
        .route("/log", get(recent_log))
        .route("/rules/evaluate", post(evaluate_rule))
        // Results and operator commands
        .route("/results", post(submit_result))
        .route("/acknowledgements", post(acknowledge))
        .route("/acknowledgements/remove", post(remove_acknowledgement))
        .route("/downtimes/start", post(start_downtime))
        .route("/downtimes/end", post(end_downtime))
        .route("/checks", post(force_check))
        // Executor side
        .route("/actions", get(pending_actions))
        .route("/actions/drain", post(drain_actions))
        .route("/notifications/completed", post(notification_completed))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server and the scheduling loop over `engine`
pub async fn run_server(
    config: ServerConfig,
    engine: Engine,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Mutex::new(engine));
    let state = Arc::new(AppState {
        engine: Arc::clone(&engine),
    });

    // Start background worker
    let worker = Arc::new(TickWorker::new(
        Arc::clone(&engine),
        Duration::from_millis(config.tick_interval_ms),
    ));
    let worker_handle = Arc::clone(&worker).start();

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Vigil server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&worker)))
        .await?;

    worker_handle.abort();

    tracing::info!("Vigil server stopped");
    Ok(())
}

async fn shutdown_signal(worker: Arc<TickWorker>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("Shutdown signal received, stopping worker...");
    worker.stop();
}
