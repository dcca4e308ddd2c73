//! HTTP implementations of the consumed capabilities: the per-engine
//! agent client and the discovery backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use center_cluster::{
    AgentClient, AgentConnector, AgentError, ClusterError, DiscoveryBackend, Entry,
};
use center_types::{
    select_ip_or_name, Container, ContainerInfo, ContainerOperate, ContainerSpec, EngineSpecs,
    NodeData,
};

/// Per-call deadline on agent RPCs.
const AGENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent client speaking the host agent's REST surface.
pub struct HttpAgentClient {
    base: String,
    http: reqwest::Client,
}

impl HttpAgentClient {
    fn new(host: &str, port: u16) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(AGENT_TIMEOUT).build()?;
        Ok(Self {
            base: format!("http://{host}:{port}/v1"),
            http,
        })
    }
}

fn request_error(e: reqwest::Error) -> AgentError {
    if e.is_connect() || e.is_timeout() {
        AgentError::Unreachable(e.to_string())
    } else {
        AgentError::Request(e.to_string())
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Request(format!("status {status}: {body}")))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn probe(&self) -> Result<EngineSpecs, AgentError> {
        let response = self
            .http
            .get(format!("{}/specs", self.base))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerInfo, AgentError> {
        let response = self
            .http
            .post(format!("{}/containers", self.base))
            .json(spec)
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), AgentError> {
        let response = self
            .http
            .delete(format!("{}/containers/{container_id}", self.base))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response).await.map(|_| ())
    }

    async fn operate_container(&self, operate: ContainerOperate) -> Result<(), AgentError> {
        let response = self
            .http
            .put(format!("{}/containers", self.base))
            .json(&operate)
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response).await.map(|_| ())
    }

    async fn inspect_containers(&self) -> Result<Vec<Container>, AgentError> {
        let response = self
            .http
            .get(format!("{}/containers", self.base))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }
}

/// Builds agent clients from `{IP, Name}` hints.
pub struct HttpAgentConnector {
    port: u16,
}

impl HttpAgentConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl AgentConnector for HttpAgentConnector {
    fn connect(&self, ip: &str, name: &str) -> Arc<dyn AgentClient> {
        let host = select_ip_or_name(ip, name).to_string();
        match HttpAgentClient::new(&host, self.port) {
            Ok(client) => Arc::new(client),
            // An unbuildable client behaves like an unreachable agent.
            Err(_) => Arc::new(UnreachableClient),
        }
    }
}

struct UnreachableClient;

#[async_trait]
impl AgentClient for UnreachableClient {
    async fn probe(&self) -> Result<EngineSpecs, AgentError> {
        Err(AgentError::Unreachable("client unavailable".to_string()))
    }
    async fn create_container(&self, _: &ContainerSpec) -> Result<ContainerInfo, AgentError> {
        Err(AgentError::Unreachable("client unavailable".to_string()))
    }
    async fn remove_container(&self, _: &str) -> Result<(), AgentError> {
        Err(AgentError::Unreachable("client unavailable".to_string()))
    }
    async fn operate_container(&self, _: ContainerOperate) -> Result<(), AgentError> {
        Err(AgentError::Unreachable("client unavailable".to_string()))
    }
    async fn inspect_containers(&self) -> Result<Vec<Container>, AgentError> {
        Err(AgentError::Unreachable("client unavailable".to_string()))
    }
}

/// Discovery backend polling a KV endpoint that lists announced nodes as
/// JSON `NodeData` records under the configured path prefix.
pub struct HttpDiscoveryBackend {
    uris: Vec<String>,
    path: String,
    http: reqwest::Client,
}

impl HttpDiscoveryBackend {
    pub fn new(uris: Vec<String>, path: String) -> Result<Self, ClusterError> {
        if uris.is_empty() || path.is_empty() {
            return Err(ClusterError::DiscoveryInvalid);
        }
        let http = reqwest::Client::builder()
            .timeout(AGENT_TIMEOUT)
            .build()
            .map_err(|_| ClusterError::DiscoveryInvalid)?;
        Ok(Self { uris, path, http })
    }

    fn entry_key(&self, node: &NodeData) -> String {
        if node.key.is_empty() {
            format!("{}/{}", self.path, select_ip_or_name(&node.ip, &node.name))
        } else {
            node.key.clone()
        }
    }
}

#[async_trait]
impl DiscoveryBackend for HttpDiscoveryBackend {
    async fn fetch(&self) -> anyhow::Result<Vec<Entry>> {
        let mut last_error = anyhow::anyhow!("no discovery endpoint configured");
        for uri in &self.uris {
            let url = format!("{}/{}", uri.trim_end_matches('/'), self.path);
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let nodes: Vec<NodeData> = response.json().await?;
                    return nodes
                        .into_iter()
                        .map(|node| {
                            let key = self.entry_key(&node);
                            let data = serde_json::to_vec(&node)?;
                            Ok(Entry { key, data })
                        })
                        .collect();
                }
                Ok(response) => {
                    last_error = anyhow::anyhow!("discovery status {}", response.status());
                }
                Err(e) => last_error = e.into(),
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_requires_uris_and_path() {
        assert!(HttpDiscoveryBackend::new(Vec::new(), "humpback/center".to_string()).is_err());
        assert!(HttpDiscoveryBackend::new(
            vec!["http://127.0.0.1:8500".to_string()],
            String::new()
        )
        .is_err());
        assert!(HttpDiscoveryBackend::new(
            vec!["http://127.0.0.1:8500".to_string()],
            "humpback/center".to_string()
        )
        .is_ok());
    }

    #[test]
    fn entry_key_falls_back_to_identity() {
        let backend = HttpDiscoveryBackend::new(
            vec!["http://127.0.0.1:8500".to_string()],
            "humpback/center".to_string(),
        )
        .unwrap();

        let announced = NodeData {
            key: "nodes/custom".to_string(),
            ip: "10.0.0.1".to_string(),
            name: "node-1".to_string(),
        };
        assert_eq!(backend.entry_key(&announced), "nodes/custom");

        let bare = NodeData {
            key: String::new(),
            ip: "10.0.0.1".to_string(),
            name: "node-1".to_string(),
        };
        assert_eq!(backend.entry_key(&bare), "humpback/center/10.0.0.1");
    }

    #[test]
    fn connector_builds_clients() {
        let connector = HttpAgentConnector::new(8600);
        // Just exercise the constructor paths; no network involved.
        let _ = connector.connect("10.0.0.1", "node-1");
        let _ = connector.connect("", "node-1");
    }
}
