//! NodeCache — last-known discovery observations.
//!
//! Maps a discovery key to the `{IP, Name}` it announced. One key holds
//! at most one live entry; re-announcement replaces the previous value.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use center_types::NodeData;

#[derive(Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<String, NodeData>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation under its discovery key.
    pub fn add(&self, node: NodeData) {
        self.exclusive().insert(node.key.clone(), node);
    }

    /// Drop the entry for a discovery key.
    pub fn remove(&self, key: &str) -> Option<NodeData> {
        self.exclusive().remove(key)
    }

    /// Find an entry by IP or by Name.
    pub fn get(&self, ip_or_name: &str) -> Option<NodeData> {
        if ip_or_name.is_empty() {
            return None;
        }
        self.shared()
            .values()
            .find(|n| n.ip == ip_or_name || n.name == ip_or_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.shared().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared().is_empty()
    }

    fn shared(&self) -> RwLockReadGuard<'_, HashMap<String, NodeData>> {
        self.nodes.read().expect("node cache lock poisoned")
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, HashMap<String, NodeData>> {
        self.nodes.write().expect("node cache lock poisoned")
    }
}
