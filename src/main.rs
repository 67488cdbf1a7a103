//! # kube-iam-broker
//!
//! Per-pod IAM credentials for Kubernetes workloads.
//!
//! ## Overview
//!
//! The broker runs on every node and receives the pods' instance metadata
//! traffic. It:
//!
//! 1. **Watches pods and namespaces** - Keeps pod address -> role mappings and namespace allow-lists current
//! 2. **Answers role queries** - Returns the role assigned to the calling pod
//! 3. **Mints credentials** - Assumes the requested role through STS, one call per role at a time, cached
//! 4. **Proxies the rest** - Relays every other request to the real metadata service
//!
//! Settings come from environment variables (see `BrokerConfig`); the flags
//! below override the most common ones.

use anyhow::Result;
use clap::Parser;

use kube_iam_broker::config::{BrokerConfig, NamespaceRestrictionFormat};
use kube_iam_broker::runtime;

#[derive(Debug, Parser)]
#[command(name = "kube-iam-broker")]
#[command(about = "Per-pod IAM credential broker for Kubernetes", long_about = None)]
struct Cli {
    /// Port serving the metadata surface
    #[arg(long)]
    app_port: Option<u16>,

    /// Port serving metrics and health probes
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Prefix prepended to bare role names
    #[arg(long)]
    base_role_arn: Option<String>,

    /// Role for pods without a role annotation
    #[arg(long)]
    default_role: Option<String>,

    /// Enforce namespace role allow-lists
    #[arg(long)]
    namespace_restriction: bool,

    /// Pattern syntax of namespace allow-lists (glob or regexp)
    #[arg(long)]
    namespace_restriction_format: Option<NamespaceRestrictionFormat>,

    /// Real metadata service address
    #[arg(long)]
    metadata_address: Option<String>,

    /// Only watch pods scheduled on this node
    #[arg(long)]
    node: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut BrokerConfig) {
        if let Some(port) = self.app_port {
            config.app_port = port;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(base_role_arn) = self.base_role_arn {
            config.base_role_arn = base_role_arn;
        }
        if let Some(default_role) = self.default_role {
            config.default_role = default_role;
        }
        if self.namespace_restriction {
            config.namespace_restriction = true;
        }
        if let Some(format) = self.namespace_restriction_format {
            config.namespace_restriction_format = format;
        }
        if let Some(address) = self.metadata_address {
            config.metadata_address = address;
        }
        if let Some(node) = self.node {
            config.node_name = node;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BrokerConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    runtime::run(config).await
}
