//! Discovery node payloads and engine resource reports.

use serde::{Deserialize, Serialize};

/// A node observation from the discovery backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "IP", default)]
    pub ip: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// Resource totals and usage reported by an engine's agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineResources {
    #[serde(rename = "TotalMemory", default)]
    pub total_memory: u64,
    #[serde(rename = "UsedMemory", default)]
    pub used_memory: u64,
    #[serde(rename = "TotalCpus", default)]
    pub total_cpus: u32,
    #[serde(rename = "UsedCpus", default)]
    pub used_cpus: u32,
}

impl EngineResources {
    /// Memory not currently in use, saturating at zero.
    pub fn free_memory(&self) -> u64 {
        self.total_memory.saturating_sub(self.used_memory)
    }
}

/// The identification block returned by a successful agent probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSpecs {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Resources", default)]
    pub resources: EngineResources,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_memory_saturates() {
        let r = EngineResources {
            total_memory: 100,
            used_memory: 250,
            ..Default::default()
        };
        assert_eq!(r.free_memory(), 0);

        let r = EngineResources {
            total_memory: 1024,
            used_memory: 256,
            ..Default::default()
        };
        assert_eq!(r.free_memory(), 768);
    }

    #[test]
    fn node_data_decodes_discovery_payload() {
        let data: NodeData =
            serde_json::from_str(r#"{"IP":"10.0.0.1","Name":"node-1"}"#).unwrap();
        assert_eq!(data.ip, "10.0.0.1");
        assert_eq!(data.name, "node-1");
        assert_eq!(data.key, "");
    }
}
