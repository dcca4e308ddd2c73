//! center-cluster — the cluster orchestration engine.
//!
//! Keeps a declared set of container workloads placed, healthy and
//! upgradeable across a dynamically-changing set of engine nodes
//! organized into named groups.
//!
//! # Architecture
//!
//! ```text
//! Discovery ──▶ NodeCache ──▶ PendEngines ──▶ Engine (per host agent)
//!                                               │
//! Catalog service ──▶ Cluster.groups ───────────┤  scheduling pool
//!                                               ▼
//! MetaCatalog ──▶ Cluster ──▶ EngineSelector ──▶ per-container placement
//!                    │
//!                    ├──▶ UpgradeQueue (serialized image-tag upgrades)
//!                    └──▶ MigrateQueue (debounced capacity recovery)
//! ```
//!
//! Every subsystem receives the narrow capabilities it needs at
//! construction; nothing holds a reference back to the facade.

mod agent;
mod cluster;
mod config;
mod discovery;
mod engine;
mod error;
mod migrate;
mod node_cache;
mod pend_engines;
mod upgrade;

#[cfg(test)]
pub(crate) mod testsupport;

pub use agent::{AgentClient, AgentConnector, AgentError};
pub use cluster::Cluster;
pub use config::{
    parse_duration, ClusterOpts, DEFAULT_CREATE_RETRY, DEFAULT_MIGRATE_DELAY,
    DEFAULT_OVERCOMMIT_RATIO, DEFAULT_UPGRADE_DELAY,
};
pub use discovery::{Discovery, DiscoveryBackend, Entry, WatchEvent, MIN_HEARTBEAT};
pub use engine::{Engine, EngineState, RefreshDiff, ENGINE_FAILURE_THRESHOLD};
pub use error::{ClusterError, ClusterResult};
pub use migrate::{MigrateQueue, MigrateTask};
pub use node_cache::NodeCache;
pub use pend_engines::{EngineRegistry, PendEngines};
pub use upgrade::{UpgradeQueue, UpgradeTarget, UpgradeTask};
