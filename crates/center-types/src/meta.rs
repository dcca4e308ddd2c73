//! Workload meta records.
//!
//! A `MetaData` is the durable declaration of one container workload:
//! the submitted template, the requested instance count, webhook
//! registrations, and the per-instance `BaseConfig` bindings that tie an
//! allocated instance index to a real container.

use serde::{Deserialize, Serialize};

use crate::container::ContainerSpec;

/// A webhook registration attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebHook {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "SecretToken", default)]
    pub secret_token: String,
}

pub type WebHooks = Vec<WebHook>;

/// Placement constraints carried on a workload declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(rename = "Constraints", default)]
    pub constraints: Vec<String>,
}

/// The binding of one allocated instance index to a running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(rename = "Index")]
    pub index: i32,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// The declared shape of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaBase {
    #[serde(rename = "GroupID")]
    pub group_id: String,
    #[serde(rename = "MetaID")]
    pub meta_id: String,
    #[serde(rename = "IsRemoveDelay", default)]
    pub is_remove_delay: bool,
    #[serde(rename = "IsRecovery", default)]
    pub is_recovery: bool,
    #[serde(rename = "Instances")]
    pub instances: i32,
    #[serde(rename = "Placement", default)]
    pub placement: Placement,
    #[serde(rename = "WebHooks", default)]
    pub webhooks: WebHooks,
    #[serde(rename = "ImageTag", default)]
    pub image_tag: String,
    #[serde(rename = "Config")]
    pub config: ContainerSpec,
    /// Unix seconds at creation.
    #[serde(rename = "CreateAt")]
    pub create_at: i64,
    /// Unix seconds of the last mutation.
    #[serde(rename = "LastUpdateAt")]
    pub last_update_at: i64,
}

/// A `MetaBase` plus its live per-instance bindings.
///
/// Unknown top-level fields in a persisted record are preserved across
/// read-modify-write cycles through the flattened `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(flatten)]
    pub base: MetaBase,
    #[serde(rename = "BaseConfigs", default)]
    pub base_configs: Vec<BaseConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetaData {
    /// The `BaseConfig` holding the given container, if any.
    pub fn base_config_of(&self, container_id: &str) -> Option<&BaseConfig> {
        self.base_configs.iter().find(|bc| bc.id == container_id)
    }

    /// True if the given instance index is currently bound.
    pub fn index_in_use(&self, index: i32) -> bool {
        self.base_configs.iter().any(|bc| bc.index == index)
    }
}

/// Extract the tag from an image reference.
///
/// Only the segment after the final `:` counts, and only when it contains
/// no `/` (a registry port is not a tag). Untagged images yield `"latest"`.
pub fn image_tag_of(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag,
        _ => "latest",
    }
}

/// Replace (or append) the tag of an image reference.
pub fn swap_image_tag(image: &str, tag: &str) -> String {
    match image.rsplit_once(':') {
        Some((repo, old)) if !old.contains('/') => format!("{repo}:{tag}"),
        _ => format!("{image}:{tag}"),
    }
}
