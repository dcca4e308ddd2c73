//! Container template and runtime container records.
//!
//! `ContainerSpec` is the user-submitted template stored in a workload's
//! meta record; the cluster stamps a per-instance name and environment
//! before submitting it to an engine. Optional collections default to
//! empty on deserialization so the in-memory and on-wire shapes always
//! match (no `null` slices or maps survive the boundary).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Env entry naming the owning group, stamped at creation.
pub const ENV_GROUP_ID: &str = "HUMPBACK_CLUSTER_GROUPID";
/// Env entry naming the owning meta, stamped at creation.
pub const ENV_META_ID: &str = "HUMPBACK_CLUSTER_METAID";
/// Env entry carrying the allocated instance index, stamped at creation.
pub const ENV_CONTAINER_INDEX: &str = "HUMPBACK_CLUSTER_CONTAINER_INDEX";
/// Env entry carrying the full derived container name, stamped at creation.
pub const ENV_ORIGINAL_NAME: &str = "HUMPBACK_CLUSTER_CONTAINER_ORIGINALNAME";

/// A container port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "PrivatePort")]
    pub private_port: u16,
    #[serde(rename = "PublicPort", default)]
    pub public_port: u16,
    #[serde(rename = "Type", default)]
    pub proto: String,
}

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    #[serde(rename = "ContainerVolume")]
    pub container_volume: String,
    #[serde(rename = "HostVolume")]
    pub host_volume: String,
}

/// A process resource limit applied inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Soft")]
    pub soft: i64,
    #[serde(rename = "Hard")]
    pub hard: i64,
}

/// The submitted container template.
///
/// Unknown fields are preserved across read-modify-write cycles via the
/// flattened `extra` map, so a newer controller does not strip fields it
/// does not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Command", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    #[serde(rename = "Ports", default)]
    pub ports: Vec<PortBinding>,
    #[serde(rename = "Volumes", default)]
    pub volumes: Vec<VolumeBinding>,
    #[serde(rename = "DNS", default)]
    pub dns: Vec<String>,
    #[serde(rename = "ExtraHosts", default)]
    pub extra_hosts: Vec<String>,
    #[serde(rename = "Links", default)]
    pub links: Vec<String>,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "Ulimits", default)]
    pub ulimits: Vec<Ulimit>,
    /// Memory reservation in bytes; 0 means unconstrained.
    #[serde(rename = "Memory", default)]
    pub memory: u64,
    #[serde(rename = "CPUShares", default)]
    pub cpu_shares: u64,
    #[serde(rename = "NetworkMode", default, skip_serializing_if = "String::is_empty")]
    pub network_mode: String,
    #[serde(rename = "RestartPolicy", default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContainerSpec {
    /// Look up a `KEY=VALUE` env entry by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .and_then(|(k, v)| (k == key).then_some(v))
        })
    }

    /// Append a `KEY=VALUE` env entry.
    pub fn push_env(&mut self, key: &str, value: &str) {
        self.env.push(format!("{key}={value}"));
    }

    /// The meta identifier stamped at creation, if any.
    pub fn meta_id(&self) -> Option<&str> {
        self.env_value(ENV_META_ID)
    }

    /// The instance index stamped at creation, if any.
    pub fn instance_index(&self) -> Option<i32> {
        self.env_value(ENV_CONTAINER_INDEX)?.parse().ok()
    }
}

/// Identity and state of a container as reported by its engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "State", default)]
    pub state: String,
}

/// The configuration recorded for a placed container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Container")]
    pub container: ContainerSpec,
    #[serde(rename = "MetaID", default)]
    pub meta_id: String,
}

/// One placed container: agent-reported info plus the submitted config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "Info")]
    pub info: ContainerInfo,
    #[serde(rename = "Config")]
    pub config: ContainerConfig,
}

/// An action request forwarded to an engine's agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOperate {
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Container")]
    pub container: String,
}
