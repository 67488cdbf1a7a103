//! # Broker Configuration
//!
//! Broker settings loaded from environment variables (populated from a ConfigMap).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use super::duration::parse_duration;
use crate::constants::*;
use crate::iam::arn::is_valid_base_arn;

/// Pattern syntax of namespace allow-list entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceRestrictionFormat {
    /// Shell-style wildcards (`arn:aws:iam::*:role/billing-*`)
    #[default]
    Glob,
    /// Regular expressions matched against the full role identifier
    Regexp,
}

impl FromStr for NamespaceRestrictionFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "glob" => Ok(Self::Glob),
            "regexp" | "regex" => Ok(Self::Regexp),
            other => Err(anyhow::anyhow!(
                "Invalid namespace restriction format '{}'. Expected 'glob' or 'regexp'",
                other
            )),
        }
    }
}

/// Broker configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Port serving the metadata surface
    pub app_port: u16,
    /// Port serving metrics and health probes
    pub metrics_port: u16,
    /// Real metadata service (`host` or `host:port`)
    pub metadata_address: String,
    /// Prefix prepended to bare role names; empty disables prefixing
    pub base_role_arn: String,
    /// Role used for pods without a role annotation; empty means no fallback
    pub default_role: String,
    pub iam_role_key: String,
    pub iam_external_id_key: String,
    pub namespace_key: String,
    /// Enforce namespace allow-lists when resolving roles
    pub namespace_restriction: bool,
    pub namespace_restriction_format: NamespaceRestrictionFormat,
    /// Period after which every known pod is replayed to the bridge
    pub cache_resync_period: Duration,
    /// Requested lifetime of minted credentials
    pub session_ttl: Duration,
    /// Build the STS endpoint from the region
    pub use_regional_sts_endpoint: bool,
    /// Private (VPC) STS endpoint; takes precedence over every other endpoint
    pub sts_vpc_endpoint: String,
    /// Skip host-network pods, which share the node address
    pub resolve_duplicate_ips: bool,
    /// Restrict the pod watch to this node; empty watches every pod
    pub node_name: String,
    pub aws_region: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            app_port: DEFAULT_APP_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            metadata_address: DEFAULT_METADATA_ADDRESS.to_string(),
            base_role_arn: String::new(),
            default_role: String::new(),
            iam_role_key: DEFAULT_IAM_ROLE_KEY.to_string(),
            iam_external_id_key: DEFAULT_IAM_EXTERNAL_ID_KEY.to_string(),
            namespace_key: DEFAULT_NAMESPACE_KEY.to_string(),
            namespace_restriction: false,
            namespace_restriction_format: NamespaceRestrictionFormat::default(),
            cache_resync_period: DEFAULT_CACHE_RESYNC_PERIOD,
            session_ttl: DEFAULT_IAM_ROLE_SESSION_TTL,
            use_regional_sts_endpoint: false,
            sts_vpc_endpoint: String::new(),
            resolve_duplicate_ips: false,
            node_name: String::new(),
            aws_region: String::new(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string_or = |key: &str, default: String| lookup(key).unwrap_or(default);

        let namespace_restriction_format = match lookup("NAMESPACE_RESTRICTION_FORMAT") {
            Some(value) => value.parse()?,
            None => defaults.namespace_restriction_format,
        };

        let cache_resync_period = match lookup("CACHE_RESYNC_PERIOD") {
            Some(value) => parse_duration(&value).unwrap_or_else(|e| {
                tracing::warn!("Invalid CACHE_RESYNC_PERIOD '{}', using default: {}", value, e);
                defaults.cache_resync_period
            }),
            None => defaults.cache_resync_period,
        };

        let session_ttl = match lookup("IAM_ROLE_SESSION_TTL") {
            Some(value) => parse_duration(&value).context("Invalid IAM_ROLE_SESSION_TTL")?,
            None => defaults.session_ttl,
        };

        let config = Self {
            app_port: parsed_or(&lookup, "APP_PORT", defaults.app_port),
            metrics_port: parsed_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            metadata_address: string_or("METADATA_ADDRESS", defaults.metadata_address),
            base_role_arn: string_or("BASE_ROLE_ARN", defaults.base_role_arn),
            default_role: string_or("DEFAULT_ROLE", defaults.default_role),
            iam_role_key: string_or("IAM_ROLE_KEY", defaults.iam_role_key),
            iam_external_id_key: string_or("IAM_EXTERNAL_ID_KEY", defaults.iam_external_id_key),
            namespace_key: string_or("NAMESPACE_KEY", defaults.namespace_key),
            namespace_restriction: parsed_or(
                &lookup,
                "NAMESPACE_RESTRICTION",
                defaults.namespace_restriction,
            ),
            namespace_restriction_format,
            cache_resync_period,
            session_ttl,
            use_regional_sts_endpoint: parsed_or(
                &lookup,
                "USE_REGIONAL_STS_ENDPOINT",
                defaults.use_regional_sts_endpoint,
            ),
            sts_vpc_endpoint: string_or("STS_VPC_ENDPOINT", defaults.sts_vpc_endpoint),
            resolve_duplicate_ips: parsed_or(
                &lookup,
                "RESOLVE_DUPLICATE_IPS",
                defaults.resolve_duplicate_ips,
            ),
            node_name: string_or("NODE_NAME", defaults.node_name),
            aws_region: string_or("AWS_REGION", defaults.aws_region),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check settings that cannot fall back to a default
    pub fn validate(&self) -> Result<()> {
        if !self.base_role_arn.is_empty() && !is_valid_base_arn(&self.base_role_arn) {
            return Err(anyhow::anyhow!(
                "Invalid BASE_ROLE_ARN '{}'",
                self.base_role_arn
            ));
        }

        if self.session_ttl < MIN_IAM_ROLE_SESSION_TTL
            || self.session_ttl > MAX_IAM_ROLE_SESSION_TTL
        {
            return Err(anyhow::anyhow!(
                "IAM_ROLE_SESSION_TTL must be between {}s and {}s, got {}s",
                MIN_IAM_ROLE_SESSION_TTL.as_secs(),
                MAX_IAM_ROLE_SESSION_TTL.as_secs(),
                self.session_ttl.as_secs()
            ));
        }

        if self.metadata_address.trim().is_empty() {
            return Err(anyhow::anyhow!("METADATA_ADDRESS cannot be empty"));
        }

        Ok(())
    }
}

/// Read a variable and parse it, or return the default value
fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.app_port, 8181);
        assert_eq!(config.metadata_address, "169.254.169.254");
        assert_eq!(config.iam_role_key, "iam.amazonaws.com/role");
        assert_eq!(config.session_ttl, Duration::from_secs(900));
        assert_eq!(config.cache_resync_period, Duration::from_secs(1800));
        assert_eq!(
            config.namespace_restriction_format,
            NamespaceRestrictionFormat::Glob
        );
        assert!(!config.namespace_restriction);
    }

    #[test]
    fn test_overrides() {
        let config = BrokerConfig::from_lookup(lookup_from(&[
            ("APP_PORT", "9000"),
            ("BASE_ROLE_ARN", "arn:aws:iam::123456789012:role/"),
            ("NAMESPACE_RESTRICTION", "true"),
            ("NAMESPACE_RESTRICTION_FORMAT", "regexp"),
            ("IAM_ROLE_SESSION_TTL", "1h"),
            ("RESOLVE_DUPLICATE_IPS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.app_port, 9000);
        assert_eq!(config.base_role_arn, "arn:aws:iam::123456789012:role/");
        assert!(config.namespace_restriction);
        assert_eq!(
            config.namespace_restriction_format,
            NamespaceRestrictionFormat::Regexp
        );
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert!(config.resolve_duplicate_ips);
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config = BrokerConfig::from_lookup(lookup_from(&[
            ("APP_PORT", "not-a-port"),
            ("NAMESPACE_RESTRICTION", "maybe"),
        ]))
        .unwrap();
        assert_eq!(config.app_port, DEFAULT_APP_PORT);
        assert!(!config.namespace_restriction);
    }

    #[test]
    fn test_invalid_base_arn_is_rejected() {
        let result = BrokerConfig::from_lookup(lookup_from(&[("BASE_ROLE_ARN", "my-roles/")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_restriction_format_is_rejected() {
        let result = BrokerConfig::from_lookup(lookup_from(&[(
            "NAMESPACE_RESTRICTION_FORMAT",
            "wildcard",
        )]));
        assert!(result.is_err());
    }

    #[test]
    fn test_session_ttl_bounds() {
        assert!(BrokerConfig::from_lookup(lookup_from(&[("IAM_ROLE_SESSION_TTL", "5m")])).is_err());
        assert!(BrokerConfig::from_lookup(lookup_from(&[("IAM_ROLE_SESSION_TTL", "13h")])).is_err());
        assert!(BrokerConfig::from_lookup(lookup_from(&[("IAM_ROLE_SESSION_TTL", "12h")])).is_ok());
    }
}
