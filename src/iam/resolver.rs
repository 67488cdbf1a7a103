//! # Role Resolver
//!
//! Turns a caller address into the fully-qualified role it may assume, using the
//! pod identity cache and, when enabled, the namespace allow-lists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use glob::Pattern;
use regex::Regex;
use tracing::{debug, warn};

use super::arn::role_arn;
use crate::config::{BrokerConfig, NamespaceRestrictionFormat};
use crate::error::{BrokerError, StoreError};
use crate::store::PodIdentityCache;

/// Result of resolving a caller address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapping {
    pub role_arn: String,
    pub namespace: String,
    pub external_id: Option<String>,
}

/// Resolves caller addresses to role ARNs
#[derive(Debug, Clone)]
pub struct RoleResolver {
    cache: PodIdentityCache,
    base_role_arn: String,
    default_role: String,
    namespace_restriction: bool,
    restriction_format: NamespaceRestrictionFormat,
    /// Compiled allow-list patterns; `None` marks a pattern that failed to compile
    patterns: Arc<Mutex<HashMap<String, Option<Arc<RolePattern>>>>>,
}

impl RoleResolver {
    pub fn new(cache: PodIdentityCache, config: &BrokerConfig) -> Self {
        Self {
            cache,
            base_role_arn: config.base_role_arn.clone(),
            default_role: config.default_role.clone(),
            namespace_restriction: config.namespace_restriction,
            restriction_format: config.namespace_restriction_format,
            patterns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configured base prefix; empty when prefixing is disabled
    pub fn base_role_arn(&self) -> &str {
        &self.base_role_arn
    }

    /// Fully-qualified role ARN for an explicitly requested role name
    pub fn role_identifier_for(&self, role: &str) -> String {
        role_arn(&self.base_role_arn, role)
    }

    /// Fully-qualified default role, if one is configured
    pub fn default_role_arn(&self) -> Option<String> {
        (!self.default_role.is_empty()).then(|| self.role_identifier_for(&self.default_role))
    }

    /// Resolve the role assigned to the pod at `caller_address`
    pub async fn resolve(&self, caller_address: &str) -> Result<RoleMapping, BrokerError> {
        let identity = match self.cache.get(caller_address).await {
            Ok(identity) => identity,
            Err(StoreError::NotFound(_)) => {
                return Err(BrokerError::MappingNotFound {
                    address: caller_address.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let role_arn = self.role_identifier_for(&identity.role);

        if self.namespace_restriction {
            self.check_role_for_namespace(&role_arn, &identity.namespace)
                .await?;
        }

        Ok(RoleMapping {
            role_arn,
            namespace: identity.namespace,
            external_id: identity.external_id,
        })
    }

    /// External id recorded for the caller, when the caller is mapped to `role_arn`
    pub async fn external_id_for(&self, caller_address: &str, role_arn: &str) -> Option<String> {
        let identity = self.cache.get(caller_address).await.ok()?;
        if self.role_identifier_for(&identity.role) != role_arn {
            return None;
        }
        identity.external_id
    }

    /// Verify that `role_arn` is permitted by the allow-list of `namespace`
    ///
    /// The default role is always permitted. A namespace without a policy
    /// permits nothing else.
    pub async fn check_role_for_namespace(
        &self,
        role_arn: &str,
        namespace: &str,
    ) -> Result<(), BrokerError> {
        if self.default_role_arn().as_deref() == Some(role_arn) {
            return Ok(());
        }

        let denied = || BrokerError::NamespaceRoleDenied {
            role: role_arn.to_string(),
            namespace: namespace.to_string(),
        };

        let policy = match self.cache.get_policy(namespace).await {
            Ok(policy) => policy,
            Err(StoreError::NotFound(_)) => {
                debug!("No role policy recorded for namespace {}", namespace);
                return Err(denied());
            }
            Err(e) => return Err(e.into()),
        };

        if policy
            .allowed_roles
            .iter()
            .any(|pattern| self.pattern_matches(pattern, role_arn))
        {
            debug!("Role {} is allowed in namespace {}", role_arn, namespace);
            Ok(())
        } else {
            Err(denied())
        }
    }

    fn pattern_matches(&self, pattern: &str, role_arn: &str) -> bool {
        self.compiled_pattern(pattern)
            .is_some_and(|compiled| compiled.matches(role_arn, &self.base_role_arn))
    }

    /// Compiled form of an allow-list pattern, built once per distinct pattern
    fn compiled_pattern(&self, pattern: &str) -> Option<Arc<RolePattern>> {
        let mut patterns = self.patterns.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = patterns.get(pattern) {
            return compiled.clone();
        }
        let compiled = self.compile(pattern).map(Arc::new);
        patterns.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    fn compile(&self, pattern: &str) -> Option<RolePattern> {
        match self.restriction_format {
            NamespaceRestrictionFormat::Glob => {
                match Pattern::new(&self.role_identifier_for(pattern)) {
                    Ok(glob) => Some(RolePattern::Glob(glob)),
                    Err(e) => {
                        warn!("Ignoring invalid glob role pattern '{}': {}", pattern, e);
                        None
                    }
                }
            }
            NamespaceRestrictionFormat::Regexp => match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => Some(RolePattern::Regexp(regex)),
                Err(e) => {
                    warn!("Ignoring invalid regexp role pattern '{}': {}", pattern, e);
                    None
                }
            },
        }
    }
}

/// A compiled namespace allow-list entry
#[derive(Debug)]
enum RolePattern {
    /// Glob over the prefixed role ARN
    Glob(Pattern),
    /// Anchored regexp over the full ARN or the bare role name
    Regexp(Regex),
}

impl RolePattern {
    fn matches(&self, role_arn: &str, base_role_arn: &str) -> bool {
        match self {
            Self::Glob(glob) => glob.matches(role_arn),
            Self::Regexp(regex) => {
                regex.is_match(role_arn)
                    || role_arn
                        .strip_prefix(base_role_arn)
                        .filter(|_| !base_role_arn.is_empty())
                        .is_some_and(|name| regex.is_match(name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryIdentityStore, NamespaceRolePolicy};

    const BASE: &str = "arn:aws:iam::123456789012:role/";

    fn resolver_with(config: BrokerConfig) -> (PodIdentityCache, RoleResolver) {
        let cache = PodIdentityCache::new(Arc::new(MemoryIdentityStore::new()));
        let resolver = RoleResolver::new(cache.clone(), &config);
        (cache, resolver)
    }

    fn base_config() -> BrokerConfig {
        BrokerConfig {
            base_role_arn: BASE.to_string(),
            ..BrokerConfig::default()
        }
    }

    fn restricted_config(format: NamespaceRestrictionFormat) -> BrokerConfig {
        BrokerConfig {
            namespace_restriction: true,
            namespace_restriction_format: format,
            default_role: "default-role".to_string(),
            ..base_config()
        }
    }

    #[tokio::test]
    async fn test_resolve_prefixes_bare_roles() {
        let (cache, resolver) = resolver_with(base_config());
        cache.put("10.0.0.5", "billing", "billing-role").await.unwrap();

        let mapping = resolver.resolve("10.0.0.5").await.unwrap();
        assert_eq!(mapping.role_arn, format!("{BASE}billing-role"));
        assert_eq!(mapping.namespace, "billing");
    }

    #[tokio::test]
    async fn test_resolve_keeps_qualified_roles() {
        let (cache, resolver) = resolver_with(base_config());
        let cross_account = "arn:aws:iam::999999999999:role/shared";
        cache.put("10.0.0.5", "billing", cross_account).await.unwrap();

        let mapping = resolver.resolve("10.0.0.5").await.unwrap();
        assert_eq!(mapping.role_arn, cross_account);
    }

    #[tokio::test]
    async fn test_resolve_unknown_address() {
        let (_, resolver) = resolver_with(base_config());
        assert_eq!(
            resolver.resolve("10.0.0.5").await.unwrap_err(),
            BrokerError::MappingNotFound {
                address: "10.0.0.5".to_string()
            }
        );
    }

    #[test]
    fn test_role_identifier_for() {
        let (_, resolver) = resolver_with(base_config());
        assert_eq!(resolver.role_identifier_for("app"), format!("{BASE}app"));
        assert_eq!(
            resolver.role_identifier_for("arn:aws:iam::1:role/x"),
            "arn:aws:iam::1:role/x"
        );
    }

    #[test]
    fn test_glob_patterns_match_full_arn() {
        let (_, resolver) = resolver_with(restricted_config(NamespaceRestrictionFormat::Glob));

        assert!(resolver.pattern_matches("billing-*", &format!("{BASE}billing-role")));
        assert!(resolver.pattern_matches("app-?", &format!("{BASE}app-1")));
        assert!(!resolver.pattern_matches("app-?", &format!("{BASE}app-12")));
        assert!(resolver.pattern_matches("app-[ab]", &format!("{BASE}app-a")));
        assert!(!resolver.pattern_matches("app-[!ab]", &format!("{BASE}app-a")));
        assert!(resolver.pattern_matches(
            "arn:aws:iam::999999999999:role/*",
            "arn:aws:iam::999999999999:role/team/shared"
        ));
        assert!(!resolver.pattern_matches("app-[", &format!("{BASE}app-[")));
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        let (_, resolver) = resolver_with(restricted_config(NamespaceRestrictionFormat::Regexp));
        let role = format!("{BASE}billing-reader");

        for _ in 0..3 {
            assert!(resolver.pattern_matches("billing-(reader|writer)", &role));
            assert!(!resolver.pattern_matches("billing-(", &role));
        }

        let patterns = resolver.patterns.lock().unwrap();
        assert_eq!(patterns.len(), 2);
        assert!(patterns["billing-(reader|writer)"].is_some());
        assert!(patterns["billing-("].is_none());
    }

    #[tokio::test]
    async fn test_namespace_restriction_glob() {
        let (cache, resolver) = resolver_with(restricted_config(NamespaceRestrictionFormat::Glob));
        cache
            .put_policy(&NamespaceRolePolicy::new(
                "billing",
                vec!["billing-*".to_string()],
            ))
            .await
            .unwrap();

        cache.put("10.0.0.5", "billing", "billing-role").await.unwrap();
        assert!(resolver.resolve("10.0.0.5").await.is_ok());

        cache.put("10.0.0.6", "billing", "admin").await.unwrap();
        assert!(matches!(
            resolver.resolve("10.0.0.6").await,
            Err(BrokerError::NamespaceRoleDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_namespace_restriction_regexp() {
        let (cache, resolver) =
            resolver_with(restricted_config(NamespaceRestrictionFormat::Regexp));
        cache
            .put_policy(&NamespaceRolePolicy::new(
                "billing",
                vec!["billing-(reader|writer)".to_string()],
            ))
            .await
            .unwrap();

        cache.put("10.0.0.5", "billing", "billing-reader").await.unwrap();
        assert!(resolver.resolve("10.0.0.5").await.is_ok());

        cache.put("10.0.0.6", "billing", "billing-reader-admin").await.unwrap();
        assert!(resolver.resolve("10.0.0.6").await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_without_policy_denies_all_but_default() {
        let (cache, resolver) = resolver_with(restricted_config(NamespaceRestrictionFormat::Glob));

        cache.put("10.0.0.5", "payments", "billing-role").await.unwrap();
        assert!(matches!(
            resolver.resolve("10.0.0.5").await,
            Err(BrokerError::NamespaceRoleDenied { .. })
        ));

        cache.put("10.0.0.6", "payments", "default-role").await.unwrap();
        assert!(resolver.resolve("10.0.0.6").await.is_ok());
    }

    #[tokio::test]
    async fn test_external_id_only_for_own_role() {
        let (cache, resolver) = resolver_with(base_config());
        let mut identity =
            crate::store::PodIdentity::new("10.0.0.5", "billing", &format!("{BASE}billing-role"));
        identity.external_id = Some("ext-123".to_string());
        cache.put_identity(&identity).await.unwrap();

        assert_eq!(
            resolver
                .external_id_for("10.0.0.5", &format!("{BASE}billing-role"))
                .await
                .as_deref(),
            Some("ext-123")
        );
        assert_eq!(
            resolver
                .external_id_for("10.0.0.5", &format!("{BASE}other-role"))
                .await,
            None
        );
        assert_eq!(
            resolver
                .external_id_for("10.0.0.9", &format!("{BASE}billing-role"))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_restriction_disabled_allows_any_role() {
        let (cache, resolver) = resolver_with(base_config());
        cache.put("10.0.0.5", "payments", "admin").await.unwrap();
        assert!(resolver.resolve("10.0.0.5").await.is_ok());
    }
}
