//! # Constants
//!
//! Default values for broker configuration, annotation keys and metadata-service
//! protocol details.

use std::time::Duration;

/// Default port for the metadata proxy
pub const DEFAULT_APP_PORT: u16 = 8181;

/// Default port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 9620;

/// Address of the real instance metadata service
pub const DEFAULT_METADATA_ADDRESS: &str = "169.254.169.254";

/// Pod annotation carrying the IAM role
pub const DEFAULT_IAM_ROLE_KEY: &str = "iam.amazonaws.com/role";

/// Pod annotation carrying the STS external id
pub const DEFAULT_IAM_EXTERNAL_ID_KEY: &str = "iam.amazonaws.com/external-id";

/// Namespace annotation listing the roles its pods may assume (JSON array)
pub const DEFAULT_NAMESPACE_KEY: &str = "iam.amazonaws.com/allowed-roles";

/// Pattern syntax used by namespace allow-lists
pub const DEFAULT_NAMESPACE_RESTRICTION_FORMAT: &str = "glob";

/// Resync period for the pod and namespace watches
pub const DEFAULT_CACHE_RESYNC_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Requested lifetime of minted credentials
pub const DEFAULT_IAM_ROLE_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// STS rejects `DurationSeconds` outside of [15m, 12h]
pub const MIN_IAM_ROLE_SESSION_TTL: Duration = Duration::from_secs(15 * 60);
pub const MAX_IAM_ROLE_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Number of attempts to wait for the initial watch synchronization
pub const DEFAULT_CACHE_SYNC_ATTEMPTS: u32 = 10;

/// Time allowed for each cache sync attempt
pub const DEFAULT_CACHE_SYNC_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side timeout for a single assume-role call.
/// The call sits in the synchronous request path; SDK callers retry on their own.
pub const STS_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Global STS endpoint, used when neither a regional nor a private endpoint is configured
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.amazonaws.com";

/// Upper bound on a cached credential's remaining validity margin
pub const CREDENTIAL_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// STS limit on `RoleSessionName`
pub const MAX_SESSION_NAME_LENGTH: usize = 64;

/// Capacity of the queue between the informer adapters and the watch bridges
pub const WATCH_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Header carrying an IMDSv2 session token
pub const METADATA_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

/// `Server` header value returned by the real metadata service
pub const METADATA_SERVER_HEADER: &str = "EC2ws";

/// Timestamp format used in credential documents
pub const CREDENTIAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
