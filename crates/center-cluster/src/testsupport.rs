//! Scripted in-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use center_types::{
    Container, ContainerConfig, ContainerInfo, ContainerOperate, ContainerSpec, EngineResources,
    EngineSpecs, select_ip_or_name,
};

use crate::agent::{AgentClient, AgentConnector, AgentError};
use crate::discovery::{DiscoveryBackend, Entry};
use crate::engine::Engine;
use crate::pend_engines::EngineRegistry;

struct MockState {
    reachable: bool,
    resources: EngineResources,
    containers: HashMap<String, Container>,
    seq: u32,
}

/// A scripted agent: containers live in memory, failures are toggled by
/// the test.
pub struct MockAgent {
    name: String,
    state: Mutex<MockState>,
}

impl MockAgent {
    pub fn healthy(name: &str, total_memory: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                reachable: true,
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

    pub fn client(self: &Arc<Self>) -> Arc<dyn AgentClient> {
        Arc::clone(self) as Arc<dyn AgentClient>
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn drop_container(&self, container_id: &str) {
        self.state.lock().unwrap().containers.remove(container_id);
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

/// An agent that never answers.
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

/// Connector backed by a table of scripted agents.
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
        let agent = MockAgent::healthy(name, total_memory);
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

/// Plain engine registry for pending-engine tests.
pub struct TestRegistry {
    engines: RwLock<HashMap<String, Arc<Engine>>>,
}

impl TestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engines: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl EngineRegistry for TestRegistry {
    async fn install_engine(&self, engine: Arc<Engine>) {
        self.engines.write().await.insert(engine.ip.clone(), engine);
    }

    async fn has_engine(&self, ip: &str, name: &str) -> bool {
        let engines = self.engines.read().await;
        engines.contains_key(ip) || engines.values().any(|e| !name.is_empty() && e.name == name)
    }
}

/// Discovery backend returning whatever the test scripted.
pub struct MockBackend {
    entries: Mutex<Vec<Entry>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

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
