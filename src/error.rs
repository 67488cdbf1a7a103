//! # Error Types
//!
//! Errors surfaced by the role-resolution and credential-minting pipeline.
//!
//! Every failure is local to a single request. The variants carry their text
//! as owned strings so that one failed upstream fetch can be handed to every
//! waiter attached to it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::constants::METADATA_SERVER_HEADER;

/// Errors returned by the persistent identity store collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No record is stored under the key
    #[error("no record found for key {0}")]
    NotFound(String),

    /// The backing store could not be reached
    #[error("identity store unavailable: {0}")]
    Unavailable(String),

    /// A record did not match its typed schema
    #[error("invalid record for key {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}

/// Broker error with an HTTP classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// No identity recorded for the caller address
    #[error("unable to find role mapping for address {address}")]
    MappingNotFound { address: String },

    /// The resolved role is not permitted by the namespace policy
    #[error("role {role} is not allowed in namespace {namespace}")]
    NamespaceRoleDenied { role: String, namespace: String },

    /// The persistent identity store is unreachable
    #[error("{0}")]
    StoreUnavailable(String),

    /// A stored record failed validation
    #[error("{0}")]
    InvalidRecord(String),

    /// A role identifier failed the structural check
    #[error("invalid role identifier: {0}")]
    Validation(String),

    /// The upstream assume-role call failed
    #[error("error assuming role: {0}")]
    UpstreamCredential(String),

    /// A pod has neither a role annotation nor a default role
    #[error("unable to find role for address {address}")]
    RoleNotResolved { address: String },

    /// The real metadata service could not be reached by the pass-through proxy
    #[error("metadata service unavailable: {0}")]
    MetadataUnavailable(String),
}

impl BrokerError {
    /// HTTP status surfaced to metadata clients
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::MappingNotFound { .. } => StatusCode::NOT_FOUND,
            BrokerError::NamespaceRoleDenied { .. } => StatusCode::FORBIDDEN,
            BrokerError::StoreUnavailable(_) | BrokerError::UpstreamCredential(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerError::MetadataUnavailable(_) => StatusCode::BAD_GATEWAY,
            BrokerError::InvalidRecord(_) | BrokerError::RoleNotResolved { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerError::MappingNotFound { .. } => "mapping_not_found",
            BrokerError::NamespaceRoleDenied { .. } => "namespace_role_denied",
            BrokerError::StoreUnavailable(_) => "store_unavailable",
            BrokerError::InvalidRecord(_) => "invalid_record",
            BrokerError::Validation(_) => "validation",
            BrokerError::UpstreamCredential(_) => "upstream_credential",
            BrokerError::RoleNotResolved { .. } => "role_not_resolved",
            BrokerError::MetadataUnavailable(_) => "metadata_unavailable",
        }
    }
}

impl From<StoreError> for BrokerError {
    fn from(error: StoreError) -> Self {
        match error {
            // Callers that can turn a miss into MappingNotFound match on NotFound first
            StoreError::NotFound(key) => BrokerError::MappingNotFound { address: key },
            StoreError::Unavailable(_) => BrokerError::StoreUnavailable(error.to_string()),
            StoreError::InvalidRecord { .. } => BrokerError::InvalidRecord(error.to_string()),
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [("server", METADATA_SERVER_HEADER)],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_found = BrokerError::MappingNotFound {
            address: "10.0.0.5".to_string(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let denied = BrokerError::NamespaceRoleDenied {
            role: "arn:aws:iam::123456789012:role/admin".to_string(),
            namespace: "billing".to_string(),
        };
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);

        assert_eq!(
            BrokerError::UpstreamCredential("throttled".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            BrokerError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: BrokerError = StoreError::NotFound("10.0.0.5".to_string()).into();
        assert_eq!(
            err,
            BrokerError::MappingNotFound {
                address: "10.0.0.5".to_string()
            }
        );

        let err: BrokerError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, BrokerError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_text_is_descriptive() {
        let err = BrokerError::MappingNotFound {
            address: "10.0.0.5".to_string(),
        };
        assert_eq!(err.to_string(), "unable to find role mapping for address 10.0.0.5");
    }
}
