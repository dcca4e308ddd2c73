//! PendEngines — background rediscovery of announced nodes.
//!
//! Holds the deduplicated set of `{IP, Name}` hints that are known from
//! discovery or group membership but not yet probed into live engines. A
//! single background loop retries each entry at the discovery heartbeat;
//! a successful probe installs the engine through the injected registry
//! and drops the pending entry, so a node is never pending and live at
//! the same time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use center_types::{select_ip_or_name, Server};

use crate::agent::AgentConnector;
use crate::engine::Engine;

/// Where probed engines are installed.
///
/// Implemented by the cluster's shared state; pending-engine logic never
/// sees the facade itself.
#[async_trait]
pub trait EngineRegistry: Send + Sync {
    /// Register a live engine under its IP.
    async fn install_engine(&self, engine: Arc<Engine>);

    /// True if a live engine already covers the given endpoint.
    async fn has_engine(&self, ip: &str, name: &str) -> bool;
}

pub struct PendEngines {
    heartbeat: Duration,
    connector: Arc<dyn AgentConnector>,
    registry: Arc<dyn EngineRegistry>,
    pending: RwLock<HashMap<String, Server>>,
    shutdown_tx: watch::Sender<bool>,
}

impl PendEngines {
    pub fn new(
        heartbeat: Duration,
        connector: Arc<dyn AgentConnector>,
        registry: Arc<dyn EngineRegistry>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            heartbeat,
            connector,
            registry,
            pending: RwLock::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Queue an endpoint for probing. No-op if it is already pending or
    /// already live.
    pub async fn add_engine(&self, ip: &str, name: &str) {
        let key = select_ip_or_name(ip, name).to_string();
        if key.is_empty() {
            return;
        }
        if self.registry.has_engine(ip, name).await {
            debug!(%ip, %name, "engine already live, not queued");
            return;
        }
        let mut pending = self.pending.write().await;
        if pending
            .insert(key, Server::new(ip, name))
            .is_none()
        {
            info!(%ip, %name, "engine queued for rediscovery");
        }
    }

    /// Drop an endpoint from the pending set. Idempotent.
    pub async fn remove_engine(&self, ip: &str, name: &str) {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        let identity = select_ip_or_name(ip, name);
        pending.retain(|key, server| !(server.matches(ip, name) || key.as_str() == identity));
        if pending.len() != before {
            info!(%ip, %name, "engine dropped from rediscovery");
        }
    }

    pub async fn contains(&self, ip: &str, name: &str) -> bool {
        self.pending
            .read()
            .await
            .values()
            .any(|server| server.matches(ip, name))
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Spawn the probe loop. Terminates cleanly on `close`.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let pend = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            debug!(heartbeat = ?pend.heartbeat, "pending engine loop started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(pend.heartbeat) => {
                        pend.probe_pending().await;
                    }
                    _ = shutdown.changed() => {
                        debug!("pending engine loop stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the probe loop.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One pass over the pending set.
    pub async fn probe_pending(&self) {
        let snapshot: Vec<Server> = self.pending.read().await.values().cloned().collect();
        for server in snapshot {
            let client = self.connector.connect(&server.ip, &server.name);
            match Engine::connect(&server.ip, &server.name, client).await {
                Ok(engine) => {
                    info!(ip = %engine.ip, name = %engine.name, "engine discovered");
                    self.registry.install_engine(engine).await;
                    self.pending
                        .write()
                        .await
                        .remove(server.identity());
                }
                Err(e) => {
                    debug!(ip = %server.ip, name = %server.name, error = %e, "engine probe pending");
                }
            }
        }
    }
}
