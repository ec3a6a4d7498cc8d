//! Liveness HTTP routes.
//!
//! Hosting platforms that expect a web process probe these to decide the bot
//! is up. The server shares no state with the bot.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

const SERVICE: &str = "parley";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    bot: &'static str,
    service: &'static str,
    version: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

async fn banner() -> &'static str {
    "🤖 Parley is running! This endpoint only answers liveness probes."
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "alive",
        bot: "running",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Router
// ============================================================================

/// Build the liveness router.
pub fn build_router() -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
}

/// Serve the liveness router on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Liveness server listening on {}", addr);
    axum::serve(listener, build_router())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
