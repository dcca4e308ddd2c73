//! center-types — shared domain types for humpback-center.
//!
//! These types represent container templates, workload meta records,
//! groups/servers/nodes, and the result envelopes produced by cluster
//! operations. All on-wire JSON field names are fixed (PascalCase) and
//! must not drift; the serde renames here are the contract.

pub mod container;
pub mod envelopes;
pub mod meta;
pub mod node;
pub mod server;

pub use container::{
    Container, ContainerConfig, ContainerInfo, ContainerOperate, ContainerSpec, PortBinding,
    Ulimit, VolumeBinding, ENV_CONTAINER_INDEX, ENV_GROUP_ID, ENV_META_ID, ENV_ORIGINAL_NAME,
};
pub use envelopes::{
    created_state, updated_state, CreatedContainer, CreatedContainers, EngineContainer,
    GroupContainer, GroupContainers, OperatedContainer, OperatedContainers, RemovedContainer,
    RemovedContainers, UpgradeContainer, UpgradeContainers,
};
pub use meta::{
    image_tag_of, swap_image_tag, BaseConfig, MetaBase, MetaData, Placement, WebHook, WebHooks,
};
pub use node::{EngineResources, EngineSpecs, NodeData};
pub use server::{select_ip_or_name, Group, Server};

/// Opaque identifier of one declared workload.
pub type MetaId = String;

/// Identifier of a scheduling group.
pub type GroupId = String;

/// Identifier of a container as reported by an engine's agent.
pub type ContainerId = String;
