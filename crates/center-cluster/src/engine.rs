//! Engine — the state machine for one host agent.
//!
//! An engine owns its container list and last-known resources, and
//! mediates every agent call. Lifecycle: `Pending → Healthy` on the first
//! successful probe; `Healthy ↔ Unhealthy` driven by the periodic
//! refresh (downgrade only after a failure threshold); any state
//! `→ Disconnected` on explicit removal. Only healthy engines accept new
//! containers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use center_scheduler::EngineSlot;
use center_types::{
    Container, ContainerConfig, ContainerOperate, ContainerSpec, EngineResources,
};

use crate::agent::{AgentClient, AgentError};

/// Consecutive failed probes before a healthy engine is downgraded.
pub const ENGINE_FAILURE_THRESHOLD: u32 = 3;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Pending,
    Healthy,
    Unhealthy,
    Disconnected,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EngineState::Pending => "Pending",
            EngineState::Healthy => "Healthy",
            EngineState::Unhealthy => "Unhealthy",
            EngineState::Disconnected => "Disconnected",
        };
        f.write_str(text)
    }
}

/// Container list changes observed by one refresh.
#[derive(Debug, Default)]
pub struct RefreshDiff {
    pub added: Vec<Container>,
    pub removed: Vec<Container>,
}

struct EngineInner {
    state: EngineState,
    resources: EngineResources,
    containers: HashMap<String, Container>,
    failures: u32,
}

/// One live host agent, registered under its IP.
pub struct Engine {
    pub ip: String,
    pub name: String,
    inner: Mutex<EngineInner>,
    client: Arc<dyn AgentClient>,
}

impl Engine {
    /// Build an engine in `Pending` state around an agent client.
    pub fn new(ip: impl Into<String>, name: impl Into<String>, client: Arc<dyn AgentClient>) -> Self {
        Self {
            ip: ip.into(),
            name: name.into(),
            inner: Mutex::new(EngineInner {
                state: EngineState::Pending,
                resources: EngineResources::default(),
                containers: HashMap::new(),
                failures: 0,
            }),
            client,
        }
    }

    /// Probe the agent and build a `Healthy` engine from the result.
    ///
    /// Used by the rediscovery loop to upgrade an `{IP, Name}` hint into a
    /// live engine; fails if either the probe or the container inspection
    /// fails.
    pub async fn connect(
        ip: &str,
        name_hint: &str,
        client: Arc<dyn AgentClient>,
    ) -> Result<Arc<Engine>, AgentError> {
        let specs = client.probe().await?;
        let containers = client.inspect_containers().await?;

        let name = if specs.name.is_empty() {
            name_hint.to_string()
        } else {
            specs.name
        };

        let engine = Engine::new(ip, name, client);
        {
            let mut inner = engine.lock();
            inner.state = EngineState::Healthy;
            inner.resources = specs.resources;
            inner.containers = containers
                .into_iter()
                .map(|c| (c.info.id.clone(), c))
                .collect();
        }
        Ok(Arc::new(engine))
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn set_state(&self, state: EngineState) {
        self.lock().state = state;
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == EngineState::Healthy
    }

    pub fn resources(&self) -> EngineResources {
        self.lock().resources
    }

    /// Snapshot for the engine selector.
    pub fn slot(&self) -> EngineSlot {
        let inner = self.lock();
        EngineSlot {
            ip: self.ip.clone(),
            name: self.name.clone(),
            healthy: inner.state == EngineState::Healthy,
            total_memory: inner.resources.total_memory,
            free_memory: inner.resources.free_memory(),
            total_cpus: inner.resources.total_cpus,
            used_cpus: inner.resources.used_cpus,
        }
    }

    /// A single container by ID.
    pub fn container(&self, container_id: &str) -> Option<Container> {
        self.lock().containers.get(container_id).cloned()
    }

    /// The engine's containers belonging to one meta, identified by the
    /// env stamp embedded at creation.
    pub fn containers(&self, meta_id: &str) -> Vec<Container> {
        let mut list: Vec<Container> = self
            .lock()
            .containers
            .values()
            .filter(|c| c.config.container.meta_id() == Some(meta_id))
            .cloned()
            .collect();
        // Stable order keeps batch envelopes deterministic.
        list.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        list
    }

    pub fn all_containers(&self) -> Vec<Container> {
        self.lock().containers.values().cloned().collect()
    }

    /// Count of containers per meta, for migration residuals.
    pub fn meta_residuals(&self) -> HashMap<String, usize> {
        let inner = self.lock();
        let mut residuals: HashMap<String, usize> = HashMap::new();
        for container in inner.containers.values() {
            if let Some(meta_id) = container.config.container.meta_id() {
                *residuals.entry(meta_id.to_string()).or_insert(0) += 1;
            }
        }
        residuals
    }

    /// Probe the agent, refreshing resources and the container list.
    ///
    /// A successful refresh replaces the container map wholesale and
    /// returns the diff; a failure only counts toward the downgrade
    /// threshold.
    pub async fn refresh(&self) -> RefreshDiff {
        let probe = self.client.probe().await;
        let specs = match probe {
            Ok(specs) => specs,
            Err(e) => {
                let mut inner = self.lock();
                inner.failures += 1;
                if inner.failures >= ENGINE_FAILURE_THRESHOLD
                    && inner.state == EngineState::Healthy
                {
                    warn!(ip = %self.ip, failures = inner.failures, error = %e, "engine unhealthy");
                    inner.state = EngineState::Unhealthy;
                } else {
                    debug!(ip = %self.ip, failures = inner.failures, error = %e, "engine probe failed");
                }
                return RefreshDiff::default();
            }
        };

        let containers = match self.client.inspect_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                debug!(ip = %self.ip, error = %e, "engine inspect failed");
                return RefreshDiff::default();
            }
        };

        let mut inner = self.lock();
        inner.failures = 0;
        inner.resources = specs.resources;
        if inner.state == EngineState::Pending || inner.state == EngineState::Unhealthy {
            debug!(ip = %self.ip, "engine healthy");
            inner.state = EngineState::Healthy;
        }

        let next: HashMap<String, Container> = containers
            .into_iter()
            .map(|c| (c.info.id.clone(), c))
            .collect();
        let added = next
            .values()
            .filter(|c| !inner.containers.contains_key(&c.info.id))
            .cloned()
            .collect();
        let removed = inner
            .containers
            .values()
            .filter(|c| !next.contains_key(&c.info.id))
            .cloned()
            .collect();
        inner.containers = next;

        RefreshDiff { added, removed }
    }

    /// Submit a create to the agent and record the result locally.
    pub async fn create_container(&self, spec: ContainerSpec) -> Result<Container, AgentError> {
        let info = self.client.create_container(&spec).await?;
        let meta_id = spec.meta_id().unwrap_or_default().to_string();
        let container = Container {
            info,
            config: ContainerConfig {
                container: spec,
                meta_id,
            },
        };
        self.lock()
            .containers
            .insert(container.info.id.clone(), container.clone());
        Ok(container)
    }

    /// Remove a container on the agent and drop it locally.
    pub async fn remove_container(&self, container_id: &str) -> Result<(), AgentError> {
        self.client.remove_container(container_id).await?;
        self.lock().containers.remove(container_id);
        Ok(())
    }

    /// Forward a lifecycle action to the agent.
    pub async fn operate_container(&self, operate: ContainerOperate) -> Result<(), AgentError> {
        self.client.operate_container(operate).await
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().expect("engine lock poisoned")
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("ip", &self.ip)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.ip, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::MockAgent;
    use center_types::ENV_META_ID;

    fn stamped_spec(name: &str, meta_id: &str) -> ContainerSpec {
        let mut spec = ContainerSpec {
            name: name.to_string(),
            image: "nginx:1.25".to_string(),
            ..Default::default()
        };
        spec.push_env(ENV_META_ID, meta_id);
        spec
    }

    #[tokio::test]
    async fn connect_builds_healthy_engine() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        assert_eq!(engine.state(), EngineState::Healthy);
        assert_eq!(engine.name, "node-1");
        assert!(engine.all_containers().is_empty());
    }

    #[tokio::test]
    async fn connect_fails_when_probe_fails() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        agent.set_reachable(false);

        let result = Engine::connect("10.0.0.1", "", agent.client()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_records_container_locally() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        let created = engine
            .create_container(stamped_spec("g1-web-0", "meta-1"))
            .await
            .unwrap();

        assert_eq!(engine.containers("meta-1").len(), 1);
        assert!(engine.container(&created.info.id).is_some());
        assert_eq!(created.config.meta_id, "meta-1");
    }

    #[tokio::test]
    async fn containers_filters_by_meta_stamp() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        engine
            .create_container(stamped_spec("g1-web-0", "meta-1"))
            .await
            .unwrap();
        engine
            .create_container(stamped_spec("g1-api-0", "meta-2"))
            .await
            .unwrap();

        assert_eq!(engine.containers("meta-1").len(), 1);
        assert_eq!(engine.containers("meta-2").len(), 1);
        assert!(engine.containers("meta-3").is_empty());

        let residuals = engine.meta_residuals();
        assert_eq!(residuals.get("meta-1"), Some(&1));
        assert_eq!(residuals.get("meta-2"), Some(&1));
    }

    #[tokio::test]
    async fn single_failure_does_not_downgrade() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        agent.set_reachable(false);
        engine.refresh().await;
        assert_eq!(engine.state(), EngineState::Healthy);
    }

    #[tokio::test]
    async fn failure_threshold_downgrades_then_refresh_recovers() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        agent.set_reachable(false);
        for _ in 0..ENGINE_FAILURE_THRESHOLD {
            engine.refresh().await;
        }
        assert_eq!(engine.state(), EngineState::Unhealthy);

        agent.set_reachable(true);
        engine.refresh().await;
        assert_eq!(engine.state(), EngineState::Healthy);
    }

    #[tokio::test]
    async fn refresh_replaces_container_map_and_diffs() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        let created = engine
            .create_container(stamped_spec("g1-web-0", "meta-1"))
            .await
            .unwrap();

        // Simulate the container dying agent-side.
        agent.drop_container(&created.info.id);
        let diff = engine.refresh().await;

        assert!(diff.added.is_empty());
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].info.id, created.info.id);
        assert!(engine.containers("meta-1").is_empty());
    }

    #[tokio::test]
    async fn disconnected_engine_reports_state_text() {
        let agent = MockAgent::healthy("node-1", 8 << 30);
        let engine = Engine::connect("10.0.0.1", "", agent.client())
            .await
            .unwrap();

        engine.set_state(EngineState::Disconnected);
        assert_eq!(engine.state().to_string(), "Disconnected");
        assert!(!engine.is_healthy());
    }
}
