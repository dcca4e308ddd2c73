//! MigrateQueue — debounced recovery of lost capacity.
//!
//! When an engine disconnects, each meta that lost replicas gets one
//! debounced task. The debounce window lets a flapping engine come back;
//! if its containers reappear before the timer fires the task is
//! canceled, otherwise it is handed to the cluster's migrate worker. At
//! most one task per meta is outstanding; further disconnects coalesce
//! into the existing timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// A due migration handed to the worker.
#[derive(Debug)]
pub struct MigrateTask {
    pub meta_id: String,
}

pub struct MigrateQueue {
    delay: Duration,
    tasks: Mutex<HashMap<String, watch::Sender<bool>>>,
    tx: mpsc::UnboundedSender<MigrateTask>,
}

impl MigrateQueue {
    /// Build the queue and the receiving end consumed by the worker.
    pub fn new(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<MigrateTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                delay,
                tasks: Mutex::new(HashMap::new()),
                tx,
            }),
            rx,
        )
    }

    /// Schedule recovery for a meta that lost replicas. Coalesces into an
    /// existing timer if one is already pending.
    pub fn engine_down(&self, meta_id: &str) {
        let cancel_rx = {
            let mut tasks = self.tasks.lock().expect("migrate queue lock poisoned");
            if tasks.contains_key(meta_id) {
                debug!(%meta_id, "migration already pending, coalesced");
                return;
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tasks.insert(meta_id.to_string(), cancel_tx);
            cancel_rx
        };

        info!(%meta_id, delay = ?self.delay, "migration scheduled");
        let task = MigrateTask {
            meta_id: meta_id.to_string(),
        };
        let tx = self.tx.clone();
        let delay = self.delay;
        let mut cancel_rx = cancel_rx;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if tx.send(task).is_err() {
                        debug!("migrate worker gone, task dropped");
                    }
                }
                _ = cancel_rx.changed() => {
                    debug!(meta_id = %task.meta_id, "migration canceled");
                }
            }
        });
    }

    /// Cancel a pending migration (the engine returned in time).
    pub fn cancel(&self, meta_id: &str) {
        let mut tasks = self.tasks.lock().expect("migrate queue lock poisoned");
        if let Some(cancel_tx) = tasks.remove(meta_id) {
            let _ = cancel_tx.send(true);
            info!(%meta_id, "migration canceled, engine returned");
        }
    }

    /// True while a migration for the meta is pending or running.
    pub fn contains(&self, meta_id: &str) -> bool {
        self.tasks
            .lock()
            .expect("migrate queue lock poisoned")
            .contains_key(meta_id)
    }

    /// Mark a task finished, releasing the meta for new work.
    pub fn finish(&self, meta_id: &str) {
        self.tasks
            .lock()
            .expect("migrate queue lock poisoned")
            .remove(meta_id);
        debug!(%meta_id, "migration finished");
    }
}
