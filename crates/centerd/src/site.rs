//! Site API client — the group catalog service.
//!
//! Answers "what groups exist, and which servers are in each". Requests
//! carry the `x-get-cluster` header: the current millisecond timestamp
//! stamped into `HUMPBACK_CENTER{millis}` and base64-encoded.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{error, info};

use center_cluster::Cluster;
use center_types::Group;

/// Site API request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Group events delivered by the controller surface.
pub const GROUP_CREATE_EVENT: &str = "GROUP_CREATE_EVENT";
pub const GROUP_CHANGE_EVENT: &str = "GROUP_CHANGE_EVENT";
pub const GROUP_REMOVE_EVENT: &str = "GROUP_REMOVE_EVENT";

pub struct SiteClient {
    base: String,
    http: reqwest::Client,
}

impl SiteClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Fetch cluster groups, optionally narrowed to one group.
    pub async fn get_cluster_groups(&self, group_id: Option<&str>) -> anyhow::Result<Vec<Group>> {
        let url = format!("{}/groups/getclusters", self.base);
        let mut request = self
            .http
            .get(&url)
            .header("x-get-cluster", cluster_access_code());
        if let Some(group_id) = group_id {
            let group_id = group_id.trim();
            if !group_id.is_empty() {
                request = request.query(&[("groupid", group_id)]);
            }
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("get cluster groups status {}", response.status());
        }
        Ok(response.json().await?)
    }
}

/// The site access header value for the current instant.
fn cluster_access_code() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    STANDARD.encode(format!("HUMPBACK_CENTER{millis}"))
}

/// Pull groups from the site and push them into the cluster.
pub async fn sync_groups(cluster: &Cluster, site: &SiteClient, group_id: Option<&str>) {
    match site.get_cluster_groups(group_id).await {
        Ok(groups) => {
            info!(groups = groups.len(), "cluster groups fetched");
            for group in groups {
                cluster
                    .set_group(&group.id, group.servers, &group.contact_info)
                    .await;
            }
        }
        Err(e) => error!(error = %e, "get cluster group storedata error"),
    }
}

/// Apply one controller group event.
pub async fn apply_group_event(cluster: &Cluster, site: &SiteClient, group_id: &str, event: &str) {
    info!(group = %group_id, %event, "cluster group event");
    match event {
        GROUP_CREATE_EVENT | GROUP_CHANGE_EVENT => {
            sync_groups(cluster, site, Some(group_id)).await;
        }
        GROUP_REMOVE_EVENT => {
            cluster.remove_group(group_id).await;
        }
        _ => error!(group = %group_id, %event, "unknown group event"),
    }
}
