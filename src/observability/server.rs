//! # Metrics and Probe Server
//!
//! HTTP endpoints for Prometheus scraping and Kubernetes liveness/readiness probes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::metrics;

/// Shared probe state
#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once the probe server is bound and accepting connections
    pub is_listening: AtomicBool,
    /// Set once the initial watch synchronization completed
    pub is_ready: AtomicBool,
}

impl ServerState {
    pub fn mark_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }
}

/// Router serving `/metrics`, `/healthz` and `/readyz`
pub fn probe_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Bind the probe server and serve until the process exits
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    info!("Metrics and probe server listening on {}", addr);
    state.is_listening.store(true, Ordering::Relaxed);

    axum::serve(listener, probe_router(state))
        .await
        .context("Metrics server failed")
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for watch caches to sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status_of(router: Router, path: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_readiness_follows_sync_state() {
        let state = Arc::new(ServerState::default());
        assert_eq!(
            status_of(probe_router(Arc::clone(&state)), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.mark_ready();
        assert_eq!(
            status_of(probe_router(Arc::clone(&state)), "/readyz").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_liveness_and_metrics() {
        let state = Arc::new(ServerState::default());
        assert_eq!(
            status_of(probe_router(Arc::clone(&state)), "/healthz").await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(probe_router(state), "/metrics").await,
            StatusCode::OK
        );
    }
}
