//! Groups and the abstract server references inside them.

use serde::{Deserialize, Serialize};

/// An abstract node reference. At least one of the two fields is
/// non-empty; matching against engines prefers IP and falls back to Name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "IP", default)]
    pub ip: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

impl Server {
    pub fn new(ip: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            name: name.into(),
        }
    }

    /// The identity key used for deduplication and diffing.
    pub fn identity(&self) -> &str {
        select_ip_or_name(&self.ip, &self.name)
    }

    /// True if this reference addresses the given engine endpoint.
    pub fn matches(&self, ip: &str, name: &str) -> bool {
        if !self.ip.is_empty() {
            self.ip == ip
        } else {
            !self.name.is_empty() && self.name == name
        }
    }
}

/// A named set of servers; the scheduling scope for workloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Servers", default)]
    pub servers: Vec<Server>,
    #[serde(rename = "ContactInfo", default)]
    pub contact_info: String,
}

/// Prefer the IP as a node identity, fall back to the name.
pub fn select_ip_or_name<'a>(ip: &'a str, name: &'a str) -> &'a str {
    if !ip.is_empty() {
        ip
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_ip() {
        assert_eq!(Server::new("10.0.0.1", "node-1").identity(), "10.0.0.1");
        assert_eq!(Server::new("", "node-1").identity(), "node-1");
        assert_eq!(select_ip_or_name("", ""), "");
    }

    #[test]
    fn matches_by_ip_then_name() {
        let by_ip = Server::new("10.0.0.1", "");
        assert!(by_ip.matches("10.0.0.1", "anything"));
        assert!(!by_ip.matches("10.0.0.2", "anything"));

        let by_name = Server::new("", "node-1");
        assert!(by_name.matches("10.0.0.9", "node-1"));
        assert!(!by_name.matches("10.0.0.9", "node-2"));

        assert!(!Server::new("", "").matches("10.0.0.1", "node-1"));
    }

    #[test]
    fn group_wire_names() {
        let group = Group {
            id: "g1".to_string(),
            servers: vec![Server::new("10.0.0.1", "node-1")],
            contact_info: "ops@example.com".to_string(),
        };
        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["ID"], "g1");
        assert_eq!(value["Servers"][0]["IP"], "10.0.0.1");
        assert_eq!(value["ContactInfo"], "ops@example.com");
    }
}
