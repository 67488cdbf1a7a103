//! # STS Client
//!
//! The cloud STS collaborator: issues `AssumeRole` calls for the credential broker.
//!
//! The broker only depends on the [`StsClient`] trait so that tests can count and
//! script upstream calls. [`AwsStsClient`] is the production implementation backed
//! by the official AWS SDK, configured with a short operation timeout and no retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::constants::{DEFAULT_STS_ENDPOINT, STS_CALL_TIMEOUT};
use crate::error::BrokerError;

/// Region whose signing scope matches the global STS endpoint
const GLOBAL_STS_REGION: &str = "us-east-1";

/// Parameters of a single assume-role call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub external_id: Option<String>,
    pub session_name: String,
    pub duration: Duration,
}

/// Temporary credentials returned by STS
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Cloud STS collaborator
#[async_trait]
pub trait StsClient: Send + Sync + std::fmt::Debug {
    /// Endpoint the client sends requests to
    fn endpoint(&self) -> &str;

    /// Issue one `AssumeRole` call. Implementations must not retry.
    async fn assume_role(&self, request: AssumeRoleRequest)
        -> Result<IssuedCredentials, BrokerError>;
}

/// Select the STS endpoint
///
/// A private (VPC) endpoint wins; otherwise a regional endpoint is built from the
/// region when requested; otherwise the global endpoint is used.
pub fn sts_endpoint(region: &str, use_regional: bool, vpc_endpoint: &str) -> String {
    if !vpc_endpoint.trim().is_empty() {
        return vpc_endpoint.trim().to_string();
    }
    if use_regional {
        if region.is_empty() {
            warn!("Regional STS endpoint requested but AWS_REGION is not set, using the global endpoint");
        } else {
            return endpoint_from_region(region);
        }
    }
    DEFAULT_STS_ENDPOINT.to_string()
}

/// Standard STS endpoint URL for a region
pub fn endpoint_from_region(region: &str) -> String {
    // China partition regions live under a separate DNS suffix
    if region.starts_with("cn-") {
        format!("https://sts.{region}.amazonaws.com.cn")
    } else {
        format!("https://sts.{region}.amazonaws.com")
    }
}

/// STS client backed by the AWS SDK
pub struct AwsStsClient {
    client: aws_sdk_sts::Client,
    endpoint: String,
}

impl std::fmt::Debug for AwsStsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsStsClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl AwsStsClient {
    /// Create the client from the broker configuration and the default credential chain
    pub async fn new(config: &BrokerConfig) -> Self {
        let endpoint = sts_endpoint(
            &config.aws_region,
            config.use_regional_sts_endpoint,
            &config.sts_vpc_endpoint,
        );

        // The global endpoint only accepts requests signed for us-east-1
        let region = if endpoint == DEFAULT_STS_ENDPOINT || config.aws_region.is_empty() {
            GLOBAL_STS_REGION.to_string()
        } else {
            config.aws_region.clone()
        };

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(STS_CALL_TIMEOUT)
                    .build(),
            )
            .load()
            .await;

        let sts_config = aws_sdk_sts::config::Builder::from(&sdk_config)
            .endpoint_url(&endpoint)
            .build();

        info!(
            "STS client configured: endpoint={}, signing region={}, timeout={}ms",
            endpoint,
            region,
            STS_CALL_TIMEOUT.as_millis()
        );

        Self {
            client: aws_sdk_sts::Client::from_conf(sts_config),
            endpoint,
        }
    }
}

#[async_trait]
impl StsClient for AwsStsClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn assume_role(
        &self,
        request: AssumeRoleRequest,
    ) -> Result<IssuedCredentials, BrokerError> {
        let duration_seconds = i32::try_from(request.duration.as_secs()).unwrap_or(i32::MAX);

        let mut call = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(duration_seconds);
        // Only inject the external id if one was provided with the request
        if let Some(external_id) = request.external_id.as_deref().filter(|id| !id.is_empty()) {
            call = call.external_id(external_id);
        }

        let start = Instant::now();
        let result = call.send().await;
        info!(
            "Time taken to complete the assume role: {}ms",
            start.elapsed().as_millis()
        );

        let output = result.map_err(|e| {
            let message = DisplayErrorContext(&e).to_string();
            error!("AssumeRole for {} failed: {}", request.role_arn, message);
            BrokerError::UpstreamCredential(message)
        })?;

        let credentials = output.credentials().ok_or_else(|| {
            BrokerError::UpstreamCredential("AssumeRole response carried no credentials".to_string())
        })?;

        let expiration = DateTime::from_timestamp(credentials.expiration().secs(), 0)
            .ok_or_else(|| {
                BrokerError::UpstreamCredential(format!(
                    "AssumeRole returned an out-of-range expiration for {}",
                    request.role_arn
                ))
            })?;

        debug!(
            "Retrieved credentials for {} from {}, expiring at {}",
            request.role_arn, self.endpoint, expiration
        );

        Ok(IssuedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_endpoint_by_default() {
        assert_eq!(sts_endpoint("eu-west-1", false, ""), "https://sts.amazonaws.com");
    }

    #[test]
    fn test_regional_endpoint() {
        assert_eq!(
            sts_endpoint("eu-west-1", true, ""),
            "https://sts.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            sts_endpoint("cn-north-1", true, ""),
            "https://sts.cn-north-1.amazonaws.com.cn"
        );
    }

    #[test]
    fn test_regional_endpoint_without_region_falls_back_to_global() {
        assert_eq!(sts_endpoint("", true, ""), "https://sts.amazonaws.com");
    }

    #[test]
    fn test_private_endpoint_is_preferred() {
        let vpc = "https://vpce-0123.sts.eu-west-1.vpce.amazonaws.com";
        assert_eq!(sts_endpoint("eu-west-1", true, vpc), vpc);
        assert_eq!(sts_endpoint("eu-west-1", false, vpc), vpc);
    }

    #[test]
    fn test_issued_credentials_debug_hides_secrets() {
        let credentials = IssuedCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "very-secret".to_string(),
            session_token: "token".to_string(),
            expiration: Utc::now(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("ASIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
    }
}
