//! Shared harness for cluster integration tests: scripted agents, a
//! scripted discovery backend, and a fully wired cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use center_cluster::{
    AgentClient, AgentConnector, AgentError, Cluster, ClusterOpts, Discovery, DiscoveryBackend,
    Entry,
};
use center_types::{
    select_ip_or_name, Container, ContainerConfig, ContainerInfo, ContainerOperate, ContainerSpec,
    EngineResources, EngineSpecs, NodeData,
};

struct AgentState {
    reachable: bool,
    fail_create: bool,
    resources: EngineResources,
    containers: HashMap<String, Container>,
    seq: u32,
}

/// A scripted agent the tests can break at will.
pub struct MockAgent {
    name: String,
    state: Mutex<AgentState>,
}

impl MockAgent {
    pub fn new(name: &str, total_memory: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(AgentState {
                reachable: true,
                fail_create: false,
                resources: EngineResources {
                    total_memory,
                    used_memory: 0,
                    total_cpus: 4,
                    used_cpus: 0,
                },
                containers: HashMap::new(),
                seq: 0,
            }),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn images(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .map(|c| c.config.container.image.clone())
            .collect()
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn probe(&self) -> Result<EngineSpecs, AgentError> {
        let state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(AgentError::Unreachable("probe refused".to_string()));
        }
        Ok(EngineSpecs {
            name: self.name.clone(),
            resources: state.resources,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerInfo, AgentError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(AgentError::Unreachable("create refused".to_string()));
        }
        if state.fail_create {
            return Err(AgentError::Request("create refused".to_string()));
        }
        state.seq += 1;
        let id = format!("{}-c{}", self.name, state.seq);
        let info = ContainerInfo {
            id: id.clone(),
            state: "running".to_string(),
        };
        state.containers.insert(
            id,
            Container {
                info: info.clone(),
                config: ContainerConfig {
                    meta_id: spec.meta_id().unwrap_or_default().to_string(),
                    container: spec.clone(),
                },
            },
        );
        Ok(info)
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(AgentError::Unreachable("remove refused".to_string()));
        }
        state
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| AgentError::Request(format!("no such container {container_id}")))
    }

    async fn operate_container(&self, operate: ContainerOperate) -> Result<(), AgentError> {
        let state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(AgentError::Unreachable("operate refused".to_string()));
        }
        if state.containers.contains_key(&operate.container) {
            Ok(())
        } else {
            Err(AgentError::Request(format!(
                "no such container {}",
                operate.container
            )))
        }
    }

    async fn inspect_containers(&self) -> Result<Vec<Container>, AgentError> {
        let state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(AgentError::Unreachable("inspect refused".to_string()));
        }
        Ok(state.containers.values().cloned().collect())
    }
}

struct DeadAgent;

#[async_trait]
impl AgentClient for DeadAgent {
    async fn probe(&self) -> Result<EngineSpecs, AgentError> {
        Err(AgentError::Unreachable("no route".to_string()))
    }
    async fn create_container(&self, _: &ContainerSpec) -> Result<ContainerInfo, AgentError> {
        Err(AgentError::Unreachable("no route".to_string()))
    }
    async fn remove_container(&self, _: &str) -> Result<(), AgentError> {
        Err(AgentError::Unreachable("no route".to_string()))
    }
    async fn operate_container(&self, _: ContainerOperate) -> Result<(), AgentError> {
        Err(AgentError::Unreachable("no route".to_string()))
    }
    async fn inspect_containers(&self) -> Result<Vec<Container>, AgentError> {
        Err(AgentError::Unreachable("no route".to_string()))
    }
}

pub struct MockConnector {
    agents: Mutex<HashMap<String, Arc<MockAgent>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            agents: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_agent(&self, ip: &str, name: &str, total_memory: u64) -> Arc<MockAgent> {
        let agent = MockAgent::new(name, total_memory);
        let mut agents = self.agents.lock().unwrap();
        agents.insert(ip.to_string(), Arc::clone(&agent));
        if !name.is_empty() {
            agents.insert(name.to_string(), Arc::clone(&agent));
        }
        agent
    }
}

impl AgentConnector for MockConnector {
    fn connect(&self, ip: &str, name: &str) -> Arc<dyn AgentClient> {
        let agents = self.agents.lock().unwrap();
        agents
            .get(select_ip_or_name(ip, name))
            .or_else(|| agents.get(name))
            .map(|a| Arc::clone(a) as Arc<dyn AgentClient>)
            .unwrap_or_else(|| Arc::new(DeadAgent))
    }
}

pub struct MockBackend {
    entries: Mutex<Vec<Entry>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    #[allow(dead_code)]
    pub fn set_entries(&self, entries: Vec<Entry>) {
        *self.entries.lock().unwrap() = entries;
    }
}

#[async_trait]
impl DiscoveryBackend for MockBackend {
    async fn fetch(&self) -> anyhow::Result<Vec<Entry>> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// A started cluster plus the scripted collaborators behind it.
pub struct Harness {
    pub cluster: Arc<Cluster>,
    pub connector: Arc<MockConnector>,
    _cache_root: tempfile::TempDir,
}

impl Harness {
    /// Wire a cluster with short workflow delays and a seeded scheduler.
    pub fn start(tweak: impl FnOnce(ClusterOpts) -> ClusterOpts) -> Harness {
        let cache_root = tempfile::tempdir().unwrap();
        let opts = tweak(
            ClusterOpts::new(cache_root.path())
                .with_scheduler_seed(7)
                .with_upgrade_delay(Duration::from_millis(50))
                .with_migrate_delay(Duration::from_millis(100)),
        );

        let connector = MockConnector::new();
        let backend = MockBackend::new();
        let discovery = Discovery::new(
            Arc::clone(&backend) as Arc<dyn DiscoveryBackend>,
            Duration::from_secs(1),
        )
        .unwrap();
        let cluster = Cluster::new(
            opts,
            discovery,
            Arc::clone(&connector) as Arc<dyn AgentConnector>,
        )
        .unwrap();
        cluster.start();

        Harness {
            cluster,
            connector,
            _cache_root: cache_root,
        }
    }

    /// Register an agent, announce it, and probe it into a live engine.
    pub async fn add_live_engine(&self, ip: &str, name: &str, total_memory: u64) -> Arc<MockAgent> {
        let agent = self.connector.add_agent(ip, name, total_memory);
        self.cluster.node_cache().add(NodeData {
            key: format!("nodes/{ip}"),
            ip: ip.to_string(),
            name: name.to_string(),
        });
        self.cluster.pend_engines().add_engine(ip, name).await;
        self.cluster.pend_engines().probe_pending().await;
        agent
    }
}

/// A plain workload template.
pub fn spec(name: &str, memory: u64) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: "nginx:1.25".to_string(),
        memory,
        ..Default::default()
    }
}
