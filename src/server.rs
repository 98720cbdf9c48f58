//! Protected rewards API server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Json, Router, middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gate::{ResourceGate, ValidatedToken, require_bearer};
use crate::oauth::{DiscoveryResolver, http_client};
use crate::{Error, Result};

/// Payload served to authorized callers
pub const REWARDS_DATA: &str = "RewardsApi data";

/// Create the router
///
/// `/api/rewards` sits behind the bearer gate; `/health` is public.
pub fn create_router(gate: Arc<ResourceGate>) -> Router {
    let protected = Router::new()
        .route("/api/rewards", get(rewards_handler))
        .layer(middleware::from_fn_with_state(gate, require_bearer));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Build the gate from configuration
///
/// # Errors
///
/// Returns [`Error::Config`] if the HTTP client or gate cannot be built.
pub fn build_gate(config: &Config) -> Result<Arc<ResourceGate>> {
    let http = http_client(&config.discovery)?;
    let resolver = Arc::new(DiscoveryResolver::new(http, &config.discovery));
    let gate = ResourceGate::new(&config.resource, resolver, &config.discovery)?;
    Ok(Arc::new(gate))
}

/// Run the API server until Ctrl+C or SIGTERM
///
/// # Errors
///
/// Returns an error if the address is invalid, the port cannot be bound, or
/// the server fails.
pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
        config.server.port,
    );

    let gate = build_gate(&config)?;
    let app = create_router(gate);
    let listener = TcpListener::bind(addr).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %listener.local_addr()?,
        authority = %config.resource.authority,
        required_scope = config.resource.required_scope.as_deref().unwrap_or("-"),
        introspection = config.resource.api_secret.is_some(),
        "Rewards API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

/// GET /api/rewards
async fn rewards_handler(Extension(token): Extension<ValidatedToken>) -> impl IntoResponse {
    debug!(
        client_id = token.client_id.as_deref().unwrap_or("-"),
        scopes = ?token.scopes,
        "Serving rewards"
    );
    Json(REWARDS_DATA)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
