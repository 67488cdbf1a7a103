//! # Credential Broker
//!
//! Mints role credentials through the STS collaborator and caches them per role.
//!
//! The cache key is the role ARN alone: every caller assuming the same role shares
//! one credential. A miss creates a pending flight for the role; concurrent callers
//! for that role attach to the flight instead of issuing their own upstream call
//! and all of them receive the same credential or the same failure. Completed
//! credentials are kept with an explicit expiry that always falls before the
//! expiration reported by STS.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::arn::{is_valid_role_arn, role_name};
use super::sts::{AssumeRoleRequest, IssuedCredentials, StsClient};
use crate::constants::{CREDENTIAL_REFRESH_MARGIN, MAX_SESSION_NAME_LENGTH};
use crate::error::BrokerError;
use crate::observability::metrics;

/// A minted credential held by the broker cache
#[derive(Debug, Clone)]
pub struct CachedCredential {
    pub role_arn: String,
    pub credentials: IssuedCredentials,
    pub minted_at: DateTime<Utc>,
    cache_ttl: Duration,
    cached_until: Instant,
}

impl CachedCredential {
    fn new(role_arn: String, credentials: IssuedCredentials) -> Self {
        let minted_at = Utc::now();
        let cache_ttl = effective_cache_ttl(minted_at, credentials.expiration);
        Self {
            role_arn,
            credentials,
            minted_at,
            cache_ttl,
            cached_until: Instant::now() + cache_ttl,
        }
    }

    /// How long the broker serves this credential from cache
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.cached_until
    }
}

/// Cache lifetime for a credential minted at `minted_at`
///
/// The lifetime is the remaining validity minus a refresh margin, so a cached
/// credential is never served up to its reported expiration.
pub fn effective_cache_ttl(minted_at: DateTime<Utc>, expiration: DateTime<Utc>) -> Duration {
    let remaining = (expiration - minted_at).to_std().unwrap_or(Duration::ZERO);
    let margin = CREDENTIAL_REFRESH_MARGIN.min(remaining / 2);
    remaining.saturating_sub(margin)
}

/// Deterministic STS session name for a caller and role
///
/// Hash of the caller address followed by the role's final path segment, bounded
/// by the STS session-name length limit.
pub fn session_name(role_arn: &str, caller_address: &str) -> String {
    let digest = Sha256::digest(caller_address.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    let name = format!("{}-{}", hash, role_name(role_arn));
    let session: String = name.chars().take(MAX_SESSION_NAME_LENGTH).collect();
    debug!(
        "Session for role {} caller {}: {}",
        role_arn, caller_address, session
    );
    session
}

type FlightResult = Result<Arc<CachedCredential>, BrokerError>;

/// Shared handle for one outstanding upstream fetch
#[derive(Debug, Default)]
struct Flight {
    result: OnceCell<FlightResult>,
}

#[derive(Debug)]
enum Slot {
    Ready(Arc<CachedCredential>),
    Pending(Arc<Flight>),
}

/// Role-keyed credential cache with single-flight upstream fetches
#[derive(Debug)]
pub struct CredentialBroker {
    sts: Arc<dyn StsClient>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl CredentialBroker {
    pub fn new(sts: Arc<dyn StsClient>) -> Self {
        Self {
            sts,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Endpoint of the underlying STS client
    pub fn endpoint(&self) -> &str {
        self.sts.endpoint()
    }

    /// Return credentials for `role_arn`, from cache or from a single upstream call
    pub async fn assume_role(
        &self,
        role_arn: &str,
        external_id: Option<&str>,
        caller_address: &str,
        session_ttl: Duration,
    ) -> Result<Arc<CachedCredential>, BrokerError> {
        if !is_valid_role_arn(role_arn) {
            return Err(BrokerError::Validation(format!(
                "{role_arn} does not match the role ARN pattern"
            )));
        }

        let flight = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(role_arn) {
                Some(Slot::Ready(cached)) if cached.is_fresh(Instant::now()) => {
                    metrics::increment_credential_cache_hits();
                    debug!("Serving cached credentials for {}", role_arn);
                    return Ok(Arc::clone(cached));
                }
                Some(Slot::Pending(flight)) => {
                    debug!("Attaching to in-flight credential fetch for {}", role_arn);
                    Arc::clone(flight)
                }
                _ => {
                    metrics::increment_credential_cache_misses();
                    let flight = Arc::new(Flight::default());
                    slots.insert(role_arn.to_string(), Slot::Pending(Arc::clone(&flight)));
                    flight
                }
            }
        };

        let request = AssumeRoleRequest {
            role_arn: role_arn.to_string(),
            external_id: external_id.map(str::to_string),
            session_name: session_name(role_arn, caller_address),
            duration: session_ttl,
        };

        flight
            .result
            .get_or_init(|| self.fetch(&flight, request))
            .await
            .clone()
    }

    /// Perform the upstream call for a flight and publish its outcome
    async fn fetch(&self, flight: &Arc<Flight>, request: AssumeRoleRequest) -> FlightResult {
        let role_arn = request.role_arn.clone();
        info!(
            "Assuming role {} via {} (session {})",
            role_arn,
            self.sts.endpoint(),
            request.session_name
        );

        let timer = std::time::Instant::now();
        let result = self.sts.assume_role(request).await;
        metrics::observe_sts_request_duration(timer.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(credentials) => {
                metrics::increment_assume_role_results("success");
                let cached = Arc::new(CachedCredential::new(role_arn.clone(), credentials));
                debug!(
                    "Caching credentials for {} for {}s",
                    role_arn,
                    cached.cache_ttl().as_secs()
                );
                Ok(cached)
            }
            Err(e) => {
                metrics::increment_assume_role_results(e.as_str());
                warn!("Failed to assume role {}: {}", role_arn, e);
                Err(e)
            }
        };

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only publish if this flight still owns the slot
        let owns_slot =
            matches!(slots.get(&role_arn), Some(Slot::Pending(p)) if Arc::ptr_eq(p, flight));
        if owns_slot {
            match &outcome {
                Ok(cached) => {
                    slots.insert(role_arn, Slot::Ready(Arc::clone(cached)));
                }
                Err(_) => {
                    slots.remove(&role_arn);
                }
            }
        }

        outcome
    }

    /// Drop every cached credential
    ///
    /// Pending flights are kept, so callers arriving during a flush still attach
    /// to the outstanding upstream call for their role.
    pub fn flush(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| matches!(slot, Slot::Pending(_)));
        info!("Flushed {} credential cache entries", before - slots.len());
    }

    /// Number of roles with a cached or pending credential
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
