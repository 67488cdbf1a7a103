//! # Runtime Module
//!
//! Process bootstrap: initialization, watch startup with the bounded cache
//! sync wait, and serving the metadata surface.

pub mod initialization;
pub mod sync;

pub use initialization::*;
pub use sync::*;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::BrokerConfig;
use crate::constants::{DEFAULT_CACHE_SYNC_ATTEMPTS, DEFAULT_CACHE_SYNC_ATTEMPT_TIMEOUT};
use crate::iam::CredentialBroker;
use crate::server::{self, AppState};

/// Run the broker until the metadata server stops
///
/// Proxy traffic is only served after both watches have applied their initial
/// lists; failing to sync is fatal.
pub async fn run(config: BrokerConfig) -> Result<()> {
    let init = initialize(config).await?;

    let mut signals = start_watches(&init.client, &init.config, &init.cache);
    wait_for_cache_sync(
        &mut signals,
        DEFAULT_CACHE_SYNC_ATTEMPTS,
        DEFAULT_CACHE_SYNC_ATTEMPT_TIMEOUT,
    )
    .await?;
    init.server_state.mark_ready();
    flush_credentials_on_hangup(Arc::clone(&init.broker))?;

    info!(
        "Serving metadata on port {} with sts endpoint {}",
        init.config.app_port,
        init.broker.endpoint()
    );

    let state = AppState {
        resolver: init.resolver,
        broker: init.broker,
        proxy: init.proxy,
        session_ttl: init.config.session_ttl,
    };
    server::serve(init.config.app_port, state).await
}

/// Flush the credential cache every time the process receives SIGHUP
///
/// Lets operators drop credentials minted before an IAM policy change without
/// restarting the broker and losing its pod mappings.
#[cfg(unix)]
fn flush_credentials_on_hangup(broker: Arc<CredentialBroker>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup =
        signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, flushing credential cache");
            broker.flush();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn flush_credentials_on_hangup(_broker: Arc<CredentialBroker>) -> Result<()> {
    Ok(())
}
