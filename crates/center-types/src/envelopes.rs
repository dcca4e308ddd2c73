//! Result envelopes produced by cluster operations.
//!
//! Per-item outcomes in a batch are values, never propagated errors: an
//! envelope lists each item with its own optional error string, and the
//! batch itself reports success. The `created_state`/`updated_state`
//! markers summarize a batch by comparing the requested instance count
//! with what was actually achieved.

use serde::{Deserialize, Serialize};

use crate::container::ContainerSpec;
use crate::meta::WebHooks;

/// One successfully created container and the engine that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedContainer {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Container")]
    pub container: ContainerSpec,
}

/// Batch result of a create/update operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreatedContainers(pub Vec<CreatedContainer>);

impl CreatedContainers {
    pub fn push(&mut self, ip: impl Into<String>, container: ContainerSpec) {
        self.0.push(CreatedContainer {
            ip: ip.into(),
            container,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One per-container outcome of an operate batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatedContainer {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch result of an operate operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatedContainers(pub Vec<OperatedContainer>);

impl OperatedContainers {
    pub fn push(
        &mut self,
        ip: impl Into<String>,
        id: impl Into<String>,
        action: impl Into<String>,
        error: Option<String>,
    ) {
        self.0.push(OperatedContainer {
            ip: ip.into(),
            id: id.into(),
            action: action.into(),
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One per-container outcome of an upgrade batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeContainer {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "OldID")]
    pub old_id: String,
    #[serde(rename = "NewID", default)]
    pub new_id: String,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch result of an image-tag upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeContainers(pub Vec<UpgradeContainer>);

impl UpgradeContainers {
    pub fn push(
        &mut self,
        ip: impl Into<String>,
        old_id: impl Into<String>,
        new_id: impl Into<String>,
        error: Option<String>,
    ) {
        self.0.push(UpgradeContainer {
            ip: ip.into(),
            old_id: old_id.into(),
            new_id: new_id.into(),
            error,
        });
    }

    /// True if every container in the batch was replaced cleanly.
    pub fn all_succeeded(&self) -> bool {
        self.0.iter().all(|c| c.error.is_none())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One per-container outcome of a remove batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedContainer {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch result of a remove operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemovedContainers(pub Vec<RemovedContainer>);

impl RemovedContainers {
    pub fn push(
        &mut self,
        ip: impl Into<String>,
        id: impl Into<String>,
        error: Option<String>,
    ) {
        self.0.push(RemovedContainer {
            ip: ip.into(),
            id: id.into(),
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One placed container inside a `GroupContainer` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineContainer {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "HostName")]
    pub host_name: String,
    #[serde(rename = "Container")]
    pub container: ContainerSpec,
}

/// The full view of one workload: declaration plus live containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupContainer {
    #[serde(rename = "MetaID")]
    pub meta_id: String,
    #[serde(rename = "Instances")]
    pub instances: i32,
    #[serde(rename = "WebHooks", default)]
    pub webhooks: WebHooks,
    #[serde(rename = "Config")]
    pub config: ContainerSpec,
    #[serde(rename = "Containers", default)]
    pub containers: Vec<EngineContainer>,
}

pub type GroupContainers = Vec<GroupContainer>;

/// Summary marker for a create batch.
pub fn created_state(requested: i32, achieved: usize) -> &'static str {
    if requested as usize > achieved {
        "created partial"
    } else {
        "created all"
    }
}

/// Summary marker for an update batch.
pub fn updated_state(requested: i32, achieved: usize) -> &'static str {
    if requested as usize > achieved {
        "updated partial"
    } else {
        "updated all"
    }
}
