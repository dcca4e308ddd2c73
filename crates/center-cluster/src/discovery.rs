//! Discovery watch plumbing.
//!
//! The backend itself is an external collaborator: anything that can
//! return the current set of announced nodes. The watcher polls it at
//! the configured heartbeat, diffs consecutive snapshots by key, and
//! emits add/remove events on a channel for the cluster to apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::error::{ClusterError, ClusterResult};

/// Minimum allowed watch heartbeat.
pub const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// One raw discovery entry: an opaque key plus the announced payload
/// (JSON-encoded `NodeData`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub data: Vec<u8>,
}

/// A batch of membership changes between two snapshots.
#[derive(Debug, Default)]
pub struct WatchEvent {
    pub added: Vec<Entry>,
    pub removed: Vec<Entry>,
}

/// The pluggable discovery source.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Return the complete current set of announced entries.
    async fn fetch(&self) -> anyhow::Result<Vec<Entry>>;
}

/// Polls a backend and turns snapshot diffs into watch events.
pub struct Discovery {
    backend: Arc<dyn DiscoveryBackend>,
    heartbeat: Duration,
}

impl Discovery {
    /// Validates the heartbeat floor; an invalid configuration is fatal
    /// to startup.
    pub fn new(backend: Arc<dyn DiscoveryBackend>, heartbeat: Duration) -> ClusterResult<Self> {
        if heartbeat < MIN_HEARTBEAT {
            return Err(ClusterError::DiscoveryInvalid);
        }
        Ok(Self { backend, heartbeat })
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Spawn the watch loop; events arrive on the returned channel until
    /// the shutdown signal fires.
    pub fn watch(&self, mut shutdown: watch::Receiver<bool>) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(16);
        let backend = Arc::clone(&self.backend);
        let heartbeat = self.heartbeat;

        tokio::spawn(async move {
            info!(?heartbeat, "discovery service watching");
            let mut known: HashMap<String, Entry> = HashMap::new();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(heartbeat) => {
                        let entries = match backend.fetch().await {
                            Ok(entries) => entries,
                            Err(e) => {
                                error!(error = %e, "discovery watch error");
                                continue;
                            }
                        };

                        let next: HashMap<String, Entry> = entries
                            .into_iter()
                            .map(|e| (e.key.clone(), e))
                            .collect();

                        let added: Vec<Entry> = next
                            .values()
                            .filter(|e| known.get(&e.key) != Some(*e))
                            .cloned()
                            .collect();
                        let removed: Vec<Entry> = known
                            .values()
                            .filter(|e| !next.contains_key(&e.key))
                            .cloned()
                            .collect();

                        if added.is_empty() && removed.is_empty() {
                            continue;
                        }
                        debug!(added = added.len(), removed = removed.len(), "discovery watch");
                        known = next;
                        if tx.send(WatchEvent { added, removed }).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("discovery service closed");
                        break;
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::MockBackend;

    fn entry(key: &str, ip: &str) -> Entry {
        Entry {
            key: key.to_string(),
            data: format!(r#"{{"IP":"{ip}","Name":"node"}}"#).into_bytes(),
        }
    }

    #[test]
    fn heartbeat_floor_is_enforced() {
        let backend = MockBackend::new();
        let result = Discovery::new(backend, Duration::from_millis(500));
        assert!(matches!(result, Err(ClusterError::DiscoveryInvalid)));

        let backend = MockBackend::new();
        assert!(Discovery::new(backend, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn watch_emits_adds_and_removes() {
        let backend = MockBackend::new();
        backend.set_entries(vec![entry("k1", "10.0.0.1")]);

        let discovery =
            Discovery::new(Arc::clone(&backend) as Arc<dyn DiscoveryBackend>, Duration::from_secs(1))
                .unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut events = discovery.watch(shutdown_rx);

        let first = events.recv().await.unwrap();
        assert_eq!(first.added.len(), 1);
        assert!(first.removed.is_empty());

        backend.set_entries(vec![entry("k2", "10.0.0.2")]);
        let second = events.recv().await.unwrap();
        assert_eq!(second.added.len(), 1);
        assert_eq!(second.added[0].key, "k2");
        assert_eq!(second.removed.len(), 1);
        assert_eq!(second.removed[0].key, "k1");
    }

    #[tokio::test(start_paused = true)]
    async fn watch_stops_on_shutdown() {
        let backend = MockBackend::new();
        let discovery =
            Discovery::new(backend as Arc<dyn DiscoveryBackend>, Duration::from_secs(1)).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut events = discovery.watch(shutdown_rx);

        shutdown_tx.send(true).unwrap();
        // Sender side closes once the loop exits.
        assert!(events.recv().await.is_none());
    }
}
