//! # Metadata Handlers
//!
//! Instance-role and credentials-by-role endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::credentials::CredentialDocument;
use super::{caller_address, AppState};
use crate::constants::METADATA_SERVER_HEADER;
use crate::observability::metrics;

/// Role assigned to the calling pod, without the base prefix when it carries one
pub async fn instance_role(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let caller = caller_address(&remote);
    info!("Processing request for instance role ip: {}", caller);

    let response = match state.resolver.resolve(&caller).await {
        Ok(mapping) => {
            let base = state.resolver.base_role_arn();
            let role = match mapping.role_arn.strip_prefix(base) {
                Some(name) if !base.is_empty() => name,
                _ => mapping.role_arn.as_str(),
            };
            (
                StatusCode::OK,
                [(header::SERVER, METADATA_SERVER_HEADER)],
                role.to_string(),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Unable to resolve role for {}: {}", caller, e);
            e.into_response()
        }
    };

    metrics::increment_http_responses("instance_role", response.status().as_u16());
    response
}

/// Credentials for the requested role
pub async fn role_credentials(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path((_version, role)): Path<(String, String)>,
) -> Response {
    let caller = caller_address(&remote);
    let role_arn = state.resolver.role_identifier_for(&role);
    let external_id = state.resolver.external_id_for(&caller, &role_arn).await;

    let response = match state
        .broker
        .assume_role(&role_arn, external_id.as_deref(), &caller, state.session_ttl)
        .await
    {
        Ok(credential) => {
            debug!(
                pod.iam.role = %role,
                "Retrieved credentials from sts endpoint: {}",
                state.broker.endpoint()
            );
            (
                StatusCode::OK,
                [(header::SERVER, METADATA_SERVER_HEADER)],
                Json(CredentialDocument::from_cached(&credential, Utc::now())),
            )
                .into_response()
        }
        Err(e) => {
            error!(pod.iam.role = %role, "Error assuming role: {}", e);
            e.into_response()
        }
    };

    metrics::increment_http_responses("role_credentials", response.status().as_u16());
    response
}
