//! # Metadata Server
//!
//! The HTTP surface impersonating the instance metadata service.
//!
//! - `GET`/`PUT` `/{version}/meta-data/iam/security-credentials[/]` - role of the calling pod
//! - `GET`/`PUT` `/{version}/meta-data/iam/security-credentials/{role}` - credentials for a role
//! - everything else - relayed to the real metadata service
//!
//! The caller is identified by the peer address of the connection.

pub mod credentials;
pub mod handlers;
pub mod proxy;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::iam::{CredentialBroker, RoleResolver};

pub use credentials::CredentialDocument;
pub use proxy::{should_clear_caller_address, MetadataProxy};

/// State shared by every metadata handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub resolver: RoleResolver,
    pub broker: Arc<CredentialBroker>,
    pub proxy: MetadataProxy,
    /// Requested lifetime of minted credentials
    pub session_ttl: Duration,
}

/// Build the metadata router
pub fn router(state: AppState) -> Router {
    let instance_role = get(handlers::instance_role)
        .put(handlers::instance_role)
        .fallback(proxy::forward);
    let role_credentials = get(handlers::role_credentials)
        .put(handlers::role_credentials)
        .fallback(proxy::forward);

    Router::new()
        .route(
            "/{version}/meta-data/iam/security-credentials",
            instance_role.clone(),
        )
        .route(
            "/{version}/meta-data/iam/security-credentials/",
            instance_role,
        )
        .route(
            "/{version}/meta-data/iam/security-credentials/{role}",
            role_credentials,
        )
        .fallback(proxy::forward)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the metadata router on `port` until the process exits
pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metadata server on {addr}"))?;

    info!(
        "Listening on {} (metadata service {})",
        addr,
        state.proxy.base_url()
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Metadata server failed")
}

/// Caller address as recorded in the identity cache
pub(crate) fn caller_address(remote: &SocketAddr) -> String {
    remote.ip().to_canonical().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_address_unmaps_ipv4() {
        let mapped: SocketAddr = "[::ffff:10.0.0.5]:43210".parse().unwrap();
        assert_eq!(caller_address(&mapped), "10.0.0.5");

        let plain: SocketAddr = "10.0.0.5:43210".parse().unwrap();
        assert_eq!(caller_address(&plain), "10.0.0.5");
    }
}
