//! Management HTTP server built on axum.
//!
//! Routes:
//! - `GET /health` (database and gateway status)
//! - `GET /stats` (store counters)
//! - `GET /bot`, `POST /bot/enabled` (inspect and toggle the bot)
//! - `POST /webhook` (inbound messages from outside the gateway)

pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{base::types::Void, runtime::Runtime};

/// Builds the router over a shared [`Runtime`].
pub fn router(runtime: Runtime) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/stats", get(handlers::get_stats))
        .route("/bot", get(handlers::get_bot))
        .route("/bot/enabled", post(handlers::post_bot_enabled))
        .route("/webhook", post(handlers::post_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

/// Serves the management API on `listener` until the process exits.
pub async fn serve(listener: TcpListener, runtime: Runtime) -> Void {
    axum::serve(listener, router(runtime)).await?;

    Ok(())
}

// Tests.
