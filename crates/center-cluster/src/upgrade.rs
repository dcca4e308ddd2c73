//! UpgradeQueue — serialized, delay-batched image-tag upgrades.
//!
//! One upgrade may be in flight per meta; a duplicate request while one
//! is pending is rejected with `ContainersUpgrading`. After the
//! coalescing delay the task is handed to the cluster's upgrade worker
//! over a channel; the queue itself never touches engines, so no
//! back-reference to the facade exists.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use center_types::Container;

use crate::error::{ClusterError, ClusterResult};

/// One container slated for replacement, pinned to its home engine.
#[derive(Debug, Clone)]
pub struct UpgradeTarget {
    pub engine_ip: String,
    pub container: Container,
}

/// A due upgrade handed to the worker.
#[derive(Debug)]
pub struct UpgradeTask {
    pub meta_id: String,
    pub image_tag: String,
    pub targets: Vec<UpgradeTarget>,
}

pub struct UpgradeQueue {
    delay: Duration,
    metas: Mutex<HashSet<String>>,
    tx: mpsc::UnboundedSender<UpgradeTask>,
}

impl UpgradeQueue {
    /// Build the queue and the receiving end consumed by the worker.
    pub fn new(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<UpgradeTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                delay,
                metas: Mutex::new(HashSet::new()),
                tx,
            }),
            rx,
        )
    }

    /// Enqueue an upgrade for a meta. Rejects a duplicate while one is
    /// still in flight.
    pub fn upgrade(
        &self,
        meta_id: &str,
        image_tag: &str,
        targets: Vec<UpgradeTarget>,
    ) -> ClusterResult<()> {
        {
            let mut metas = self.metas.lock().expect("upgrade queue lock poisoned");
            if !metas.insert(meta_id.to_string()) {
                return Err(ClusterError::ContainersUpgrading);
            }
        }

        info!(%meta_id, %image_tag, containers = targets.len(), delay = ?self.delay, "upgrade queued");
        let task = UpgradeTask {
            meta_id: meta_id.to_string(),
            image_tag: image_tag.to_string(),
            targets,
        };
        let tx = self.tx.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                debug!("upgrade worker gone, task dropped");
            }
        });
        Ok(())
    }

    /// True while an upgrade for the meta is queued or running.
    pub fn contains(&self, meta_id: &str) -> bool {
        self.metas
            .lock()
            .expect("upgrade queue lock poisoned")
            .contains(meta_id)
    }

    /// Mark a task finished, releasing the meta for new work.
    pub fn finish(&self, meta_id: &str) {
        self.metas
            .lock()
            .expect("upgrade queue lock poisoned")
            .remove(meta_id);
        debug!(%meta_id, "upgrade finished");
    }
}
