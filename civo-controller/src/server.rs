//! HTTP endpoint exposing metrics and liveness.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics::ControllerMetrics;

pub fn create_router(metrics: Arc<ControllerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(get_health))
        .with_state(metrics)
}

async fn get_metrics(State(metrics): State<Arc<ControllerMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn get_health() -> &'static str {
    "ok"
}

/// Serve until `shutdown` changes.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<ControllerMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics listening on {}", addr);
    }
    axum::serve(listener, create_router(metrics))
        .with_graceful_shutdown(async move {
            shutdown.changed().await.ok();
        })
        .await
}
