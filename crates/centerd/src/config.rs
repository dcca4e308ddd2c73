//! centerd.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use center_cluster::{parse_duration, ClusterOpts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CenterConfig {
    /// Base URL of the site API answering group catalog queries.
    pub site_api: String,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Root directory for the persisted meta catalog.
    pub cacheroot: String,
    pub overcommit: Option<f64>,
    pub createretry: Option<u32>,
    pub upgradedelay: Option<String>,
    pub migratedelay: Option<String>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cacheroot: "/var/lib/humpback-center/cache".to_string(),
            overcommit: None,
            createretry: None,
            upgradedelay: None,
            migratedelay: None,
            discovery: DiscoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Discovery endpoints, e.g. `["http://127.0.0.1:8500"]`.
    pub uris: Vec<String>,
    /// Watch heartbeat; the floor is 1s.
    pub heartbeat: String,
    /// KV path prefix the agents announce under.
    pub cluster: String,
    /// How often groups are re-fetched from the site API.
    pub groupsync: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            uris: Vec::new(),
            heartbeat: "10s".to_string(),
            cluster: "humpback/center".to_string(),
            groupsync: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Port the host agents listen on.
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { port: 8600 }
    }
}

impl CenterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CenterConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Translate the file options into validated cluster options.
    pub fn cluster_opts(&self) -> anyhow::Result<ClusterOpts> {
        let mut opts = ClusterOpts::new(&self.cluster.cacheroot);
        if let Some(ratio) = self.cluster.overcommit {
            opts = opts.with_overcommit(ratio)?;
        }
        if let Some(retries) = self.cluster.createretry {
            opts = opts.with_create_retry(retries);
        }
        if let Some(delay) = &self.cluster.upgradedelay {
            opts = opts.with_upgrade_delay(parse_duration(delay)?);
        }
        if let Some(delay) = &self.cluster.migratedelay {
            opts = opts.with_migrate_delay(parse_duration(delay)?);
        }
        Ok(opts)
    }

    pub fn discovery_heartbeat(&self) -> anyhow::Result<Duration> {
        Ok(parse_duration(&self.cluster.discovery.heartbeat)?)
    }

    /// Group resync cadence; defaults to five minutes.
    pub fn group_sync_interval(&self) -> anyhow::Result<Duration> {
        match &self.cluster.discovery.groupsync {
            Some(value) => Ok(parse_duration(value)?),
            None => Ok(Duration::from_secs(300)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
site_api = "http://site.example.com/api"

[cluster]
cacheroot = "/var/lib/humpback-center/cache"
overcommit = 0.1
createretry = 2
upgradedelay = "15s"
migratedelay = "45s"

[cluster.discovery]
uris = ["http://127.0.0.1:8500"]
heartbeat = "5s"
cluster = "humpback/center"

[agent]
port = 8600
"#;

    #[test]
    fn parse_full_config() {
        let config: CenterConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.site_api, "http://site.example.com/api");
        assert_eq!(config.cluster.discovery.uris.len(), 1);
        assert_eq!(config.agent.port, 8600);

        let opts = config.cluster_opts().unwrap();
        assert_eq!(opts.overcommit_ratio, 0.1);
        assert_eq!(opts.create_retry, 2);
        assert_eq!(opts.upgrade_delay, Duration::from_secs(15));
        assert_eq!(opts.migrate_delay, Duration::from_secs(45));
        assert_eq!(config.discovery_heartbeat().unwrap(), Duration::from_secs(5));
        assert_eq!(
            config.group_sync_interval().unwrap(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: CenterConfig =
            toml::from_str(r#"site_api = "http://site""#).unwrap();
        let opts = config.cluster_opts().unwrap();
        assert_eq!(opts.overcommit_ratio, center_cluster::DEFAULT_OVERCOMMIT_RATIO);
        assert_eq!(opts.upgrade_delay, Duration::from_secs(10));
        assert_eq!(opts.migrate_delay, Duration::from_secs(30));
        assert_eq!(config.agent.port, 8600);
    }

    #[test]
    fn invalid_overcommit_is_rejected() {
        let config: CenterConfig = toml::from_str(
            r#"
site_api = "http://site"
[cluster]
cacheroot = "/tmp/cache"
overcommit = -2.0
"#,
        )
        .unwrap();
        assert!(config.cluster_opts().is_err());
    }
}
