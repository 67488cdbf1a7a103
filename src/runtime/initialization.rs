//! # Initialization
//!
//! Broker initialization: tracing, rustls setup, metrics, probe server startup,
//! and construction of the Kubernetes, store and STS clients.

use crate::config::BrokerConfig;
use crate::constants;
use crate::iam::{AwsStsClient, CredentialBroker, RoleResolver};
use crate::observability;
use crate::observability::{start_server, ServerState};
use crate::server::MetadataProxy;
use crate::store::{MemoryIdentityStore, PodIdentityCache};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing every component the broker runs with
pub struct InitializationResult {
    pub config: BrokerConfig,
    /// Kubernetes client
    pub client: Client,
    /// Pod and namespace records shared by the watch bridges and the resolver
    pub cache: PodIdentityCache,
    pub resolver: RoleResolver,
    pub broker: Arc<CredentialBroker>,
    pub proxy: MetadataProxy,
    /// Probe state; marked ready once the watch caches are synced
    pub server_state: Arc<ServerState>,
}

/// Initialize the broker runtime
///
/// This function handles:
/// - Tracing subscriber setup
/// - rustls crypto provider setup
/// - Metrics registration
/// - Probe server startup
/// - Kubernetes client creation
/// - Identity store, resolver and credential broker setup
pub async fn initialize(config: BrokerConfig) -> Result<InitializationResult> {
    init_tracing();

    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting kube-iam-broker v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: base_role_arn='{}', default_role='{}', namespace_restriction={} ({:?}), session_ttl={}s, node='{}'",
        config.base_role_arn,
        config.default_role,
        config.namespace_restriction,
        config.namespace_restriction_format,
        config.session_ttl.as_secs(),
        config.node_name
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = server_state.clone();
    let metrics_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("Metrics server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let cache = PodIdentityCache::new(Arc::new(MemoryIdentityStore::new()));
    let resolver = RoleResolver::new(cache.clone(), &config);
    let sts = AwsStsClient::new(&config).await;
    let broker = Arc::new(CredentialBroker::new(Arc::new(sts)));
    let proxy = MetadataProxy::new(&config.metadata_address)?;

    info!("Broker initialized, starting pod and namespace watches...");

    Ok(InitializationResult {
        config,
        client,
        cache,
        resolver,
        broker,
        proxy,
        server_state,
    })
}

fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kube_iam_broker=info".into()),
        )
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Wait for the probe server to bind
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout =
        std::time::Duration::from_secs(constants::DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval =
        std::time::Duration::from_millis(constants::DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("Metrics server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("Metrics server is accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "Metrics server failed to start within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
