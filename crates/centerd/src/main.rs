//! centerd — the humpback-center daemon.
//!
//! Wires the orchestration engine to its external collaborators: the
//! discovery backend, the per-host agents, and the site group catalog.
//!
//! ```text
//! centerd --config /etc/humpback-center/centerd.toml
//! ```

mod config;
mod remote;
mod site;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use center_cluster::{AgentConnector, Cluster, Discovery, DiscoveryBackend};

use crate::config::CenterConfig;
use crate::remote::{HttpAgentConnector, HttpDiscoveryBackend};
use crate::site::{sync_groups, SiteClient};

#[derive(Parser)]
#[command(name = "centerd", about = "humpback-center daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "/etc/humpback-center/centerd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,centerd=debug,center_cluster=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = CenterConfig::from_file(&cli.config)?;
    info!(config = ?cli.config, "centerd starting");

    let backend = Arc::new(HttpDiscoveryBackend::new(
        config.cluster.discovery.uris.clone(),
        config.cluster.discovery.cluster.clone(),
    )?);
    let discovery = Discovery::new(
        backend as Arc<dyn DiscoveryBackend>,
        config.discovery_heartbeat()?,
    )?;

    let connector = Arc::new(HttpAgentConnector::new(config.agent.port));
    let cluster = Cluster::new(
        config.cluster_opts()?,
        discovery,
        connector as Arc<dyn AgentConnector>,
    )?;
    cluster.start();

    // Seed groups from the site catalog, then keep them converging.
    let site = SiteClient::new(&config.site_api)?;
    sync_groups(&cluster, &site, None).await;

    let sync_interval = config.group_sync_interval()?;
    let sync_cluster = Arc::clone(&cluster);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sync_interval).await;
            reconcile_groups(&sync_cluster, &site).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cluster.stop();
    info!("centerd stopped");
    Ok(())
}

/// Converge cluster groups with the site catalog: refresh what the site
/// lists and retire what it no longer does.
async fn reconcile_groups(cluster: &Cluster, site: &SiteClient) {
    let listed = match site.get_cluster_groups(None).await {
        Ok(groups) => groups,
        Err(e) => {
            tracing::error!(error = %e, "get cluster group storedata error");
            return;
        }
    };

    let listed_ids: std::collections::HashSet<&str> =
        listed.iter().map(|g| g.id.as_str()).collect();
    for group in &listed {
        cluster
            .set_group(&group.id, group.servers.clone(), &group.contact_info)
            .await;
    }
    for known in cluster.groups().await {
        if !listed_ids.contains(known.id.as_str()) {
            site::apply_group_event(cluster, site, &known.id, site::GROUP_REMOVE_EVENT).await;
        }
    }
}
