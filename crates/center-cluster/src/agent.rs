//! The host-agent capability consumed by engines.
//!
//! The cluster never speaks a wire protocol itself: every per-engine call
//! goes through an `AgentClient` obtained from the injected
//! `AgentConnector`. Agent errors surface to the caller verbatim; a single
//! failed call never changes an engine's state.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use center_types::{Container, ContainerInfo, ContainerOperate, ContainerSpec, EngineSpecs};

/// Errors produced by agent calls.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("agent unreachable: {0}")]
    Unreachable(String),

    #[error("agent request failed: {0}")]
    Request(String),

    #[error("agent response invalid: {0}")]
    InvalidResponse(String),
}

/// The per-engine agent RPC surface.
///
/// Every call carries its own deadline inside the implementation; the
/// cluster holds no lock across any of these awaits.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Identify the agent and report its resources.
    async fn probe(&self) -> Result<EngineSpecs, AgentError>;

    /// Submit a container for creation. The spec has already been
    /// name-suffixed and env-stamped by the caller.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerInfo, AgentError>;

    /// Remove a container by ID.
    async fn remove_container(&self, container_id: &str) -> Result<(), AgentError>;

    /// Forward a lifecycle action (start/stop/restart/...).
    async fn operate_container(&self, operate: ContainerOperate) -> Result<(), AgentError>;

    /// Report the agent's full container list.
    async fn inspect_containers(&self) -> Result<Vec<Container>, AgentError>;
}

/// Turns an `{IP, Name}` hint into an agent client.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, ip: &str, name: &str) -> Arc<dyn AgentClient>;
}
