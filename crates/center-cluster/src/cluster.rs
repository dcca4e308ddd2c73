//! Cluster — the orchestration facade.
//!
//! Owns groups, live engines and the pending-container admissions behind
//! one read-write lock, and composes the catalog, selector, rediscovery
//! loop and the two workflow queues. The lock is only ever held for map
//! bookkeeping; every agent call happens with no lock held.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use center_catalog::MetaCatalog;
use center_scheduler::{
    select_reduce_victim, EngineSelector, EngineSlot, ReduceCandidate, ReduceContainer,
};
use center_types::{
    select_ip_or_name, BaseConfig, Container, ContainerOperate, ContainerSpec, CreatedContainers,
    EngineContainer, Group, GroupContainer, GroupContainers, MetaBase, MetaData, NodeData,
    OperatedContainers, RemovedContainers, Server, UpgradeContainers, WebHooks, ENV_CONTAINER_INDEX,
    ENV_GROUP_ID, ENV_META_ID, ENV_ORIGINAL_NAME,
};

use crate::agent::{AgentConnector, AgentError};
use crate::discovery::{Discovery, WatchEvent};
use crate::engine::{Engine, EngineState};
use crate::error::{ClusterError, ClusterResult};
use crate::migrate::{MigrateQueue, MigrateTask};
use crate::node_cache::NodeCache;
use crate::pend_engines::{EngineRegistry, PendEngines};
use crate::upgrade::{UpgradeQueue, UpgradeTarget, UpgradeTask};
use crate::ClusterOpts;

/// An in-flight create/reduce marker serializing work on a
/// `(GroupID, Name)` pair.
#[derive(Debug, Clone)]
struct PendingContainer {
    group_id: String,
    name: String,
    #[allow(dead_code)]
    config: ContainerSpec,
}

#[derive(Default)]
struct Shared {
    groups: HashMap<String, Group>,
    engines: HashMap<String, Arc<Engine>>,
    pending_containers: HashMap<(String, String), PendingContainer>,
}

/// The registry seam handed to `PendEngines`; installs probed engines
/// and cancels pending migrations for workloads that came back with
/// their engine.
struct Registry {
    shared: Arc<RwLock<Shared>>,
    migrator: Arc<MigrateQueue>,
}

#[async_trait]
impl EngineRegistry for Registry {
    async fn install_engine(&self, engine: Arc<Engine>) {
        let returned_metas: Vec<String> = engine.meta_residuals().into_keys().collect();
        {
            let mut shared = self.shared.write().await;
            shared.engines.insert(engine.ip.clone(), Arc::clone(&engine));
        }
        info!(ip = %engine.ip, name = %engine.name, "engine registered");
        for meta_id in returned_metas {
            self.migrator.cancel(&meta_id);
        }
    }

    async fn has_engine(&self, ip: &str, name: &str) -> bool {
        let shared = self.shared.read().await;
        if !ip.is_empty() && shared.engines.contains_key(ip) {
            return true;
        }
        !name.is_empty() && shared.engines.values().any(|e| e.name == name)
    }
}

/// The cluster orchestration engine.
pub struct Cluster {
    opts: ClusterOpts,
    heartbeat: Duration,
    catalog: Arc<MetaCatalog>,
    node_cache: Arc<NodeCache>,
    selector: EngineSelector,
    pend_engines: Arc<PendEngines>,
    upgrader: Arc<UpgradeQueue>,
    migrator: Arc<MigrateQueue>,
    shared: Arc<RwLock<Shared>>,
    discovery: Discovery,
    shutdown_tx: watch::Sender<bool>,
    upgrade_rx: StdMutex<Option<mpsc::UnboundedReceiver<UpgradeTask>>>,
    migrate_rx: StdMutex<Option<mpsc::UnboundedReceiver<MigrateTask>>>,
}

impl Cluster {
    /// Assemble a cluster from validated options, a discovery watcher and
    /// the agent connector.
    pub fn new(
        opts: ClusterOpts,
        discovery: Discovery,
        connector: Arc<dyn AgentConnector>,
    ) -> ClusterResult<Arc<Cluster>> {
        let catalog = Arc::new(MetaCatalog::open(&opts.cache_root)?);
        let (upgrader, upgrade_rx) = UpgradeQueue::new(opts.upgrade_delay);
        let (migrator, migrate_rx) = MigrateQueue::new(opts.migrate_delay);

        let shared = Arc::new(RwLock::new(Shared::default()));
        let registry = Arc::new(Registry {
            shared: Arc::clone(&shared),
            migrator: Arc::clone(&migrator),
        });

        let heartbeat = discovery.heartbeat();
        let pend_engines = Arc::new(PendEngines::new(heartbeat, connector, registry));

        let mut selector = EngineSelector::new(opts.overcommit_ratio);
        if let Some(seed) = opts.scheduler_seed {
            selector = selector.with_seed(seed);
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            opts,
            heartbeat,
            catalog,
            node_cache: Arc::new(NodeCache::new()),
            selector,
            pend_engines,
            upgrader,
            migrator,
            shared,
            discovery,
            shutdown_tx,
            upgrade_rx: StdMutex::new(Some(upgrade_rx)),
            migrate_rx: StdMutex::new(Some(migrate_rx)),
        }))
    }

    /// Start the background subsystems: discovery watch, pending-engine
    /// probing, the engine refresh loop and the two workflow workers.
    pub fn start(self: &Arc<Self>) {
        info!("cluster starting");

        let mut events = self.discovery.watch(self.shutdown_tx.subscribe());
        let cluster = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                cluster.apply_discovery_event(event).await;
            }
        });

        self.pend_engines.start();

        let cluster = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(heartbeat) => cluster.refresh_engines().await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        if let Some(mut rx) = self
            .upgrade_rx
            .lock()
            .expect("cluster lock poisoned")
            .take()
        {
            let cluster = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    // Different metas upgrade concurrently; containers of
                    // one meta are replaced serially inside the task.
                    let worker = Arc::clone(&cluster);
                    tokio::spawn(async move { worker.run_upgrade_task(task).await });
                }
            });
        }

        if let Some(mut rx) = self
            .migrate_rx
            .lock()
            .expect("cluster lock poisoned")
            .take()
        {
            let cluster = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    let worker = Arc::clone(&cluster);
                    tokio::spawn(async move { worker.run_migrate_task(task).await });
                }
            });
        }
    }

    /// Stop all background subsystems. In-flight upgrade and migrate
    /// tasks run to completion; new enqueues are refused by shutdown of
    /// the producing surfaces.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pend_engines.close();
        info!("cluster stopped");
    }

    pub fn catalog(&self) -> &Arc<MetaCatalog> {
        &self.catalog
    }

    pub fn node_cache(&self) -> &Arc<NodeCache> {
        &self.node_cache
    }

    pub fn pend_engines(&self) -> &Arc<PendEngines> {
        &self.pend_engines
    }

    pub fn upgrader(&self) -> &Arc<UpgradeQueue> {
        &self.upgrader
    }

    pub fn migrator(&self) -> &Arc<MigrateQueue> {
        &self.migrator
    }

    // ── Discovery ──────────────────────────────────────────────────

    /// Apply one batch of discovery changes: removed nodes lose their
    /// pending entry and live engine, added nodes enter the node cache
    /// and the rediscovery queue.
    pub async fn apply_discovery_event(&self, event: WatchEvent) {
        debug!(added = event.added.len(), removed = event.removed.len(), "discovery event");

        for entry in event.removed {
            match serde_json::from_slice::<NodeData>(&entry.data) {
                Ok(node) => {
                    info!(ip = %node.ip, name = %node.name, "discovery removed node");
                    self.remove_server(&node.ip, &node.name).await;
                    self.node_cache.remove(&entry.key);
                }
                Err(e) => error!(error = %e, "discovery removed decode error"),
            }
        }

        for entry in event.added {
            match serde_json::from_slice::<NodeData>(&entry.data) {
                Ok(mut node) => {
                    node.key = entry.key.clone();
                    info!(ip = %node.ip, name = %node.name, "discovery added node");
                    self.pend_engines.add_engine(&node.ip, &node.name).await;
                    self.node_cache.add(node);
                }
                Err(e) => error!(error = %e, "discovery added decode error"),
            }
        }
    }

    /// Retire an endpoint: drop it from rediscovery and, if a live engine
    /// exists, disconnect it and schedule migration for its residuals.
    pub async fn remove_server(&self, ip: &str, name: &str) {
        self.pend_engines.remove_engine(ip, name).await;

        let engine = {
            let mut shared = self.shared.write().await;
            let key = shared
                .engines
                .iter()
                .find(|(_, e)| {
                    (!ip.is_empty() && e.ip == ip) || (!name.is_empty() && e.name == name)
                })
                .map(|(k, _)| k.clone());
            key.and_then(|k| shared.engines.remove(&k))
        };

        if let Some(engine) = engine {
            let residuals = engine.meta_residuals();
            engine.set_state(EngineState::Disconnected);
            info!(ip = %engine.ip, name = %engine.name, "engine disconnected");
            for (meta_id, count) in residuals {
                if count > 0 {
                    self.migrator.engine_down(&meta_id);
                }
            }
        }
    }

    /// One refresh pass over all live engines.
    pub async fn refresh_engines(&self) {
        let engines: Vec<Arc<Engine>> = {
            let shared = self.shared.read().await;
            shared.engines.values().cloned().collect()
        };

        for engine in engines {
            if engine.state() == EngineState::Disconnected {
                continue;
            }
            let diff = engine.refresh().await;
            for container in &diff.added {
                if let Some(meta_id) = container.config.container.meta_id() {
                    // Containers reappeared; a pending migration for the
                    // meta is no longer needed.
                    self.migrator.cancel(meta_id);
                }
            }
        }
    }

    // ── Group management ───────────────────────────────────────────

    /// Create or reshape a group. Servers leaving the group lose their
    /// pending entry and engine unless another group still references
    /// them; new servers enter rediscovery.
    pub async fn set_group(&self, group_id: &str, servers: Vec<Server>, contact_info: &str) {
        let mut dedup: Vec<Server> = Vec::new();
        for server in servers {
            if server.identity().is_empty() {
                continue;
            }
            if !dedup
                .iter()
                .any(|d| servers_match(&self.node_cache, d, &server))
            {
                dedup.push(server);
            }
        }

        let (added, removed) = {
            let mut shared = self.shared.write().await;
            match shared.groups.entry(group_id.to_string()) {
                Entry::Vacant(slot) => {
                    info!(group = %group_id, servers = dedup.len(), "group created");
                    slot.insert(Group {
                        id: group_id.to_string(),
                        servers: dedup.clone(),
                        contact_info: contact_info.to_string(),
                    });
                    // Only servers discovery already knows can be probed.
                    let added = dedup
                        .iter()
                        .filter(|s| self.node_cache.get(s.identity()).is_some())
                        .cloned()
                        .collect();
                    (added, Vec::new())
                }
                Entry::Occupied(mut slot) => {
                    let group = slot.get_mut();
                    let origins = std::mem::replace(&mut group.servers, dedup.clone());
                    group.contact_info = contact_info.to_string();
                    info!(group = %group_id, servers = dedup.len(), "group changed");

                    let removed: Vec<Server> = origins
                        .iter()
                        .filter(|origin| {
                            !dedup
                                .iter()
                                .any(|new| servers_match(&self.node_cache, origin, new))
                        })
                        .cloned()
                        .collect();
                    let added: Vec<Server> = dedup
                        .iter()
                        .filter(|new| {
                            !origins
                                .iter()
                                .any(|origin| servers_match(&self.node_cache, origin, new))
                        })
                        .cloned()
                        .collect();
                    (added, removed)
                }
            }
        };

        for server in removed {
            if let Some(node) = self.node_cache.get(server.identity()) {
                if !self.in_groups_contains(&node.ip, &node.name).await {
                    info!(ip = %server.ip, name = %server.name, "group changed, server retired");
                    self.remove_server(&server.ip, &server.name).await;
                }
            }
        }

        for server in added {
            info!(ip = %server.ip, name = %server.name, "group changed, server queued");
            self.pend_engines.add_engine(&server.ip, &server.name).await;
        }
    }

    /// Remove a group: its workloads are torn down and servers no other
    /// group references are retired.
    pub async fn remove_group(&self, group_id: &str) -> bool {
        let (group, engines) = {
            let shared = self.shared.read().await;
            let Some(group) = shared.groups.get(group_id).cloned() else {
                warn!(group = %group_id, "remove group not found");
                return false;
            };
            let engines = group_engines_locked(&shared, &group);
            (group, engines)
        };

        for meta in self.catalog.get_group_meta_data(group_id) {
            self.remove_meta_containers(&meta, &engines).await;
        }

        {
            let mut shared = self.shared.write().await;
            shared.groups.remove(group_id);
        }
        info!(group = %group_id, servers = group.servers.len(), "group removed");

        for server in group.servers {
            let (ip, name) = match self.node_cache.get(server.identity()) {
                Some(node) => (node.ip, node.name),
                None => (server.ip.clone(), server.name.clone()),
            };
            if !self.in_groups_contains(&ip, &name).await {
                self.remove_server(&ip, &name).await;
            }
        }
        true
    }

    /// True if any group references the endpoint by IP or Name.
    pub async fn in_groups_contains(&self, ip: &str, name: &str) -> bool {
        let shared = self.shared.read().await;
        let by_ip = !ip.is_empty()
            && shared
                .groups
                .values()
                .any(|g| g.servers.iter().any(|s| s.ip == ip));
        if by_ip {
            return true;
        }
        !name.is_empty()
            && shared
                .groups
                .values()
                .any(|g| g.servers.iter().any(|s| s.name == name))
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub async fn get_engine(&self, ip: &str) -> Option<Arc<Engine>> {
        self.shared.read().await.engines.get(ip).cloned()
    }

    /// All groups currently known to the cluster.
    pub async fn groups(&self) -> Vec<Group> {
        self.shared.read().await.groups.values().cloned().collect()
    }

    /// The group's live engines, deduplicated by identity. `None` when
    /// the group does not exist.
    pub async fn get_group_engines(&self, group_id: &str) -> Option<Vec<Arc<Engine>>> {
        let shared = self.shared.read().await;
        let group = shared.groups.get(group_id)?;
        Some(group_engines_locked(&shared, group))
    }

    pub fn get_meta_data(&self, meta_id: &str) -> Option<MetaData> {
        self.catalog.get_meta_data(meta_id)
    }

    pub fn get_meta_base(&self, meta_id: &str) -> Option<MetaBase> {
        self.catalog.get_meta_base(meta_id)
    }

    /// A meta and its group's engines, or the structural error naming
    /// whichever is missing.
    pub async fn get_meta_data_engines(
        &self,
        meta_id: &str,
    ) -> ClusterResult<(MetaData, Vec<Arc<Engine>>)> {
        let meta = self
            .catalog
            .get_meta_data(meta_id)
            .ok_or(ClusterError::MetaDataNotFound)?;
        let engines = self
            .get_group_engines(&meta.base.group_id)
            .await
            .ok_or(ClusterError::GroupNotFound)?;
        Ok((meta, engines))
    }

    /// Workload views for every meta in a group.
    pub async fn get_group_all_containers(&self, group_id: &str) -> Option<GroupContainers> {
        {
            let shared = self.shared.read().await;
            shared.groups.get(group_id)?;
        }
        let mut out = GroupContainers::new();
        for meta in self.catalog.get_group_meta_data(group_id) {
            if let Some(gc) = self.get_group_containers(&meta.base.meta_id).await {
                out.push(gc);
            }
        }
        Some(out)
    }

    /// The full view of one workload: declaration plus the containers
    /// found on healthy engines.
    pub async fn get_group_containers(&self, meta_id: &str) -> Option<GroupContainer> {
        let (meta, engines) = self.get_meta_data_engines(meta_id).await.ok()?;
        let mut view = GroupContainer {
            meta_id: meta.base.meta_id.clone(),
            instances: meta.base.instances,
            webhooks: meta.base.webhooks.clone(),
            config: meta.base.config.clone(),
            containers: Vec::new(),
        };
        for base_config in &meta.base_configs {
            for engine in &engines {
                if !engine.is_healthy() {
                    continue;
                }
                if let Some(container) = engine.container(&base_config.id) {
                    view.containers.push(EngineContainer {
                        ip: engine.ip.clone(),
                        host_name: engine.name.clone(),
                        container: container.config.container.clone(),
                    });
                    break;
                }
            }
        }
        Some(view)
    }

    // ── Workload mutation ──────────────────────────────────────────

    /// Declare a workload and place its instances.
    pub async fn create_containers(
        &self,
        group_id: &str,
        instances: i32,
        webhooks: WebHooks,
        config: ContainerSpec,
    ) -> ClusterResult<(String, CreatedContainers)> {
        if instances <= 0 {
            return Err(ClusterError::ContainersInstancesInvalid);
        }
        let engines = self
            .get_group_engines(group_id)
            .await
            .ok_or(ClusterError::GroupNotFound)?;
        if engines.is_empty() {
            error!(group = %group_id, "create containers: no engine available");
            return Err(ClusterError::NoEngineAvailable);
        }

        if let Some(holder) = self.catalog.get_meta_data_of_name(&config.name) {
            if holder.base.group_id == group_id {
                error!(group = %group_id, name = %config.name, "create containers: name conflict");
                return Err(ClusterError::CreateContainerNameConflict);
            }
        }
        if !self.claim_pending(group_id, &config.name, &config).await {
            error!(group = %group_id, name = %config.name, "create containers: name pending");
            return Err(ClusterError::CreateContainerNameConflict);
        }

        let meta = match self
            .catalog
            .create_meta_data(group_id, instances, webhooks, config.clone())
        {
            Ok(meta) => meta,
            Err(e) => {
                self.release_pending(group_id, &config.name).await;
                return Err(e.into());
            }
        };

        let created = self.create_instances(&meta, instances).await;
        self.release_pending(group_id, &config.name).await;

        if created.is_empty() {
            error!(meta = %meta.base.meta_id, "create containers: every slot failed");
            if let Err(e) = self.catalog.remove_meta_data(&meta.base.meta_id) {
                error!(meta = %meta.base.meta_id, error = %e, "failed meta cleanup");
            }
            return Err(ClusterError::CreateContainerFailure);
        }
        Ok((meta.base.meta_id.clone(), created))
    }

    /// Resize a workload: grow creates the delta, shrink reduces it.
    pub async fn update_containers(
        &self,
        meta_id: &str,
        instances: i32,
        webhooks: WebHooks,
    ) -> ClusterResult<CreatedContainers> {
        if instances <= 0 {
            error!(meta = %meta_id, "update containers: instances invalid");
            return Err(ClusterError::ContainersInstancesInvalid);
        }
        let (meta, engines) = self.validate_meta_data(meta_id).await?;

        if !self
            .claim_pending(&meta.base.group_id, &meta.base.config.name, &meta.base.config)
            .await
        {
            error!(meta = %meta_id, "update containers: containers setting");
            return Err(ClusterError::ContainersSetting);
        }

        let outcome = self.catalog.set_meta_data(meta_id, instances, webhooks);
        if let Err(e) = outcome {
            self.release_pending(&meta.base.group_id, &meta.base.config.name)
                .await;
            return Err(e.into());
        }

        if !engines.is_empty() {
            let original = meta.base_configs.len() as i32;
            if original < instances {
                if let Some(updated) = self.catalog.get_meta_data(meta_id) {
                    self.create_instances(&updated, instances - original).await;
                }
            } else if original > instances {
                self.reduce_instances(&meta, original - instances).await;
            }
        }
        self.release_pending(&meta.base.group_id, &meta.base.config.name)
            .await;

        let mut created = CreatedContainers::default();
        if let Some(engines) = self.get_group_engines(&meta.base.group_id).await {
            for engine in engines.iter().filter(|e| e.is_healthy()) {
                for container in engine.containers(meta_id) {
                    created.push(engine.ip.clone(), container.config.container.clone());
                }
            }
        }
        Ok(created)
    }

    /// Forward a lifecycle action to every container of a meta, or to one
    /// container when `container_id` is given. Per-container outcomes are
    /// captured in the envelope; the batch itself succeeds.
    pub async fn operate_containers(
        &self,
        meta_id: &str,
        container_id: Option<&str>,
        action: &str,
    ) -> ClusterResult<OperatedContainers> {
        let (meta, engines) = match self.validate_meta_data(meta_id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(meta = %meta_id, %action, error = %e, "operate containers");
                return Err(e);
            }
        };

        let mut operated = OperatedContainers::default();
        'engines: for engine in &engines {
            for container in engine.containers(&meta.base.meta_id) {
                let selected = container_id.map_or(true, |id| container.info.id == id);
                if selected {
                    let outcome = if engine.is_healthy() {
                        engine
                            .operate_container(ContainerOperate {
                                action: action.to_string(),
                                container: container.info.id.clone(),
                            })
                            .await
                            .err()
                            .map(|e| {
                                error!(ip = %engine.ip, %action, error = %e, "operate container");
                                e.to_string()
                            })
                    } else {
                        Some(format!("engine state is {}", engine.state()))
                    };
                    operated.push(engine.ip.clone(), container.info.id.clone(), action, outcome);
                }
                if container_id == Some(container.info.id.as_str()) {
                    break 'engines;
                }
            }
        }
        Ok(operated)
    }

    /// Operate one container addressed only by ID.
    pub async fn operate_container(
        &self,
        container_id: &str,
        action: &str,
    ) -> ClusterResult<(String, OperatedContainers)> {
        let meta = self
            .catalog
            .get_meta_data_of_container(container_id)
            .ok_or(ClusterError::ContainerNotFound)?;
        let operated = self
            .operate_containers(&meta.base.meta_id, Some(container_id), action)
            .await?;
        Ok((meta.base.meta_id, operated))
    }

    /// Queue a serialized image-tag upgrade for a meta's containers.
    pub async fn upgrade_containers(&self, meta_id: &str, image_tag: &str) -> ClusterResult<()> {
        let (meta, engines) = match self.validate_meta_data(meta_id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(meta = %meta_id, error = %e, "upgrade containers");
                return Err(e);
            }
        };

        let mut targets = Vec::new();
        for engine in &engines {
            for container in engine.containers(&meta.base.meta_id) {
                targets.push(UpgradeTarget {
                    engine_ip: engine.ip.clone(),
                    container,
                });
            }
        }
        if !targets.is_empty() {
            self.upgrader.upgrade(meta_id, image_tag, targets)?;
        }
        Ok(())
    }

    /// Remove every container of a meta, or one container when
    /// `container_id` is given. The meta itself is dropped once its last
    /// base config is gone.
    pub async fn remove_containers(
        &self,
        meta_id: &str,
        container_id: Option<&str>,
    ) -> ClusterResult<RemovedContainers> {
        let (meta, engines) = match self.validate_meta_data(meta_id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(meta = %meta_id, error = %e, "remove containers");
                return Err(e);
            }
        };

        let mut removed = RemovedContainers::default();
        'engines: for engine in &engines {
            for container in engine.containers(&meta.base.meta_id) {
                let selected = container_id.map_or(true, |id| container.info.id == id);
                if selected {
                    let outcome = if engine.is_healthy() {
                        match engine.remove_container(&container.info.id).await {
                            Ok(()) => {
                                if let Err(e) =
                                    self.catalog.remove_base_config_by_id(&container.info.id)
                                {
                                    error!(meta = %meta_id, error = %e, "base config release failed");
                                }
                                None
                            }
                            Err(e) => {
                                error!(ip = %engine.ip, error = %e, "remove container");
                                Some(e.to_string())
                            }
                        }
                    } else {
                        Some(format!("engine state is {}", engine.state()))
                    };
                    removed.push(engine.ip.clone(), container.info.id.clone(), outcome);
                }
                if container_id == Some(container.info.id.as_str()) {
                    break 'engines;
                }
            }
        }

        if let Some(current) = self.catalog.get_meta_data(meta_id) {
            if current.base_configs.is_empty() {
                if let Err(e) = self.catalog.remove_meta_data(meta_id) {
                    error!(meta = %meta_id, error = %e, "meta cleanup failed");
                }
            }
        }
        Ok(removed)
    }

    /// Remove one container addressed only by ID.
    pub async fn remove_container(
        &self,
        container_id: &str,
    ) -> ClusterResult<(String, RemovedContainers)> {
        let meta = self
            .catalog
            .get_meta_data_of_container(container_id)
            .ok_or(ClusterError::ContainerNotFound)?;
        let removed = self
            .remove_containers(&meta.base.meta_id, Some(container_id))
            .await?;
        Ok((meta.base.meta_id, removed))
    }

    // ── Workflow workers ───────────────────────────────────────────

    /// Execute one due upgrade: serially replace each container on its
    /// home engine, reusing the instance index and name; the meta's image
    /// tag moves only when every replacement succeeded.
    async fn run_upgrade_task(&self, task: UpgradeTask) {
        info!(meta = %task.meta_id, tag = %task.image_tag, containers = task.targets.len(), "upgrade started");
        let mut envelope = UpgradeContainers::default();

        for target in &task.targets {
            let old_id = target.container.info.id.clone();
            let Some(engine) = self.get_engine(&target.engine_ip).await else {
                envelope.push(
                    target.engine_ip.clone(),
                    old_id,
                    "",
                    Some("engine not found".to_string()),
                );
                continue;
            };
            if !engine.is_healthy() {
                envelope.push(
                    engine.ip.clone(),
                    old_id,
                    "",
                    Some(format!("engine state is {}", engine.state())),
                );
                continue;
            }

            let index = self
                .catalog
                .get_meta_data(&task.meta_id)
                .and_then(|m| m.base_config_of(&old_id).map(|bc| bc.index))
                .or_else(|| target.container.config.container.instance_index());
            let Some(index) = index else {
                envelope.push(
                    engine.ip.clone(),
                    old_id,
                    "",
                    Some("instance index unknown".to_string()),
                );
                continue;
            };

            let mut spec = target.container.config.container.clone();
            spec.image = center_types::swap_image_tag(&spec.image, &task.image_tag);

            if let Err(e) = engine.remove_container(&old_id).await {
                error!(ip = %engine.ip, error = %e, "upgrade: old container removal failed");
                envelope.push(engine.ip.clone(), old_id, "", Some(e.to_string()));
                continue;
            }
            if let Err(e) = self.catalog.remove_base_config_by_id(&old_id) {
                error!(meta = %task.meta_id, error = %e, "upgrade: base config release failed");
            }

            match engine.create_container(spec).await {
                Ok(container) => {
                    let binding = BaseConfig {
                        index,
                        id: container.info.id.clone(),
                        name: container.config.container.name.clone(),
                    };
                    if let Err(e) = self.catalog.append_base_config(&task.meta_id, binding) {
                        error!(meta = %task.meta_id, error = %e, "upgrade: base config bind failed");
                    }
                    envelope.push(engine.ip.clone(), old_id, container.info.id.clone(), None);
                }
                Err(e) => {
                    error!(ip = %engine.ip, error = %e, "upgrade: replacement create failed");
                    envelope.push(engine.ip.clone(), old_id, "", Some(e.to_string()));
                }
            }
        }

        if !envelope.is_empty() && envelope.all_succeeded() {
            if let Err(e) = self.catalog.set_image_tag(&task.meta_id, &task.image_tag) {
                error!(meta = %task.meta_id, error = %e, "upgrade: image tag update failed");
            }
            info!(meta = %task.meta_id, tag = %task.image_tag, "upgrade completed");
        } else {
            warn!(meta = %task.meta_id, "upgrade completed with failures");
        }
        self.upgrader.finish(&task.meta_id);
    }

    /// Execute one due migration: if the lost containers reappeared the
    /// task ends quietly, otherwise the stale bindings are released and
    /// the missing instances re-created through the shared create path.
    async fn run_migrate_task(&self, task: MigrateTask) {
        let meta_id = task.meta_id.as_str();
        let Some(meta) = self.catalog.get_meta_data(meta_id) else {
            self.migrator.finish(meta_id);
            return;
        };
        let Some(engines) = self.get_group_engines(&meta.base.group_id).await else {
            warn!(meta = %meta_id, "migration skipped, group gone");
            self.migrator.finish(meta_id);
            return;
        };

        let live: HashSet<String> = engines
            .iter()
            .filter(|e| e.is_healthy())
            .flat_map(|e| e.containers(meta_id).into_iter().map(|c| c.info.id))
            .collect();
        let stale: Vec<BaseConfig> = meta
            .base_configs
            .iter()
            .filter(|bc| !live.contains(&bc.id))
            .cloned()
            .collect();
        if stale.is_empty() {
            info!(meta = %meta_id, "migration skipped, containers returned");
            self.migrator.finish(meta_id);
            return;
        }

        if !self
            .claim_pending(&meta.base.group_id, &meta.base.config.name, &meta.base.config)
            .await
        {
            warn!(meta = %meta_id, "migration deferred, containers busy");
            self.migrator.finish(meta_id);
            return;
        }

        info!(meta = %meta_id, missing = stale.len(), "migration started");
        for base_config in &stale {
            if let Err(e) = self.catalog.remove_base_config_by_id(&base_config.id) {
                error!(meta = %meta_id, error = %e, "migration: base config release failed");
            }
        }
        if let Some(updated) = self.catalog.get_meta_data(meta_id) {
            let created = self.create_instances(&updated, stale.len() as i32).await;
            info!(meta = %meta_id, recreated = created.len(), "migration completed");
        }
        self.release_pending(&meta.base.group_id, &meta.base.config.name)
            .await;
        self.migrator.finish(meta_id);
    }

    // ── Creation protocol ──────────────────────────────────────────

    /// Place `count` instances of a meta. The pending-name claim must be
    /// held by the caller. Failed slots are skipped; the envelope lists
    /// what actually landed.
    async fn create_instances(&self, meta: &MetaData, count: i32) -> CreatedContainers {
        let meta_id = &meta.base.meta_id;
        let template = &meta.base.config;
        let mut created = CreatedContainers::default();
        let mut avoid_ips: Vec<String> = Vec::new();

        for _ in 0..count {
            let Some(index) = self.catalog.make_container_idle_index(meta_id) else {
                warn!(meta = %meta_id, "no idle instance index, slot skipped");
                continue;
            };
            let name = derive_container_name(&meta.base.group_id, &template.name, index);
            let mut spec = template.clone();
            spec.name = name.clone();
            spec.push_env(ENV_GROUP_ID, &meta.base.group_id);
            spec.push_env(ENV_META_ID, meta_id);
            spec.push_env(ENV_CONTAINER_INDEX, &index.to_string());
            spec.push_env(ENV_ORIGINAL_NAME, &name);

            let mut outcome = self.create_one(meta, &avoid_ips, &spec).await;
            let mut retries = 0;
            while retries < self.opts.create_retry {
                match &outcome {
                    Ok(_) | Err(CreateSlotError::NoEngine) => break,
                    Err(CreateSlotError::Agent { ip, error }) => {
                        error!(engine = %ip, container = %name, error = %error, "create container failed, retrying");
                        if !avoid_ips.contains(ip) {
                            avoid_ips.push(ip.clone());
                        }
                    }
                }
                outcome = self.create_one(meta, &avoid_ips, &spec).await;
                retries += 1;
            }

            match outcome {
                Ok((engine, container)) => {
                    let binding = BaseConfig {
                        index,
                        id: container.info.id.clone(),
                        name: name.clone(),
                    };
                    if let Err(e) = self.catalog.append_base_config(meta_id, binding) {
                        error!(meta = %meta_id, error = %e, "base config bind failed");
                    }
                    if !avoid_ips.contains(&engine.ip) {
                        avoid_ips.push(engine.ip.clone());
                    }
                    info!(meta = %meta_id, ip = %engine.ip, container = %name, "container created");
                    created.push(engine.ip.clone(), container.config.container.clone());
                }
                Err(CreateSlotError::NoEngine) => {
                    error!(container = %name, "create container: no engine available");
                }
                Err(CreateSlotError::Agent { ip, error }) => {
                    error!(engine = %ip, container = %name, error = %error, "create container failed");
                    if !avoid_ips.contains(&ip) {
                        avoid_ips.push(ip);
                    }
                }
            }
        }
        created
    }

    /// One placement attempt: pick the best engine outside the avoid list
    /// and submit the create.
    async fn create_one(
        &self,
        meta: &MetaData,
        avoid_ips: &[String],
        spec: &ContainerSpec,
    ) -> Result<(Arc<Engine>, Container), CreateSlotError> {
        let engines = self
            .get_group_engines(&meta.base.group_id)
            .await
            .unwrap_or_default();
        if engines.is_empty() {
            return Err(CreateSlotError::NoEngine);
        }

        let slots: Vec<EngineSlot> = engines.iter().map(|e| e.slot()).collect();
        let ranked = self.selector.select(&slots, avoid_ips, spec.memory);
        let Some(head) = ranked.first() else {
            return Err(CreateSlotError::NoEngine);
        };
        let engine = engines
            .iter()
            .find(|e| e.ip == head.ip)
            .cloned()
            .ok_or(CreateSlotError::NoEngine)?;

        match engine.create_container(spec.clone()).await {
            Ok(container) => Ok((engine, container)),
            Err(error) => Err(CreateSlotError::Agent {
                ip: engine.ip.clone(),
                error,
            }),
        }
    }

    /// Remove `count` instances, densest engines first, highest index
    /// within the chosen engine. The pending-name claim must be held.
    async fn reduce_instances(&self, meta: &MetaData, count: i32) {
        let meta_id = &meta.base.meta_id;
        for _ in 0..count {
            let Some(engines) = self.get_group_engines(&meta.base.group_id).await else {
                warn!(meta = %meta_id, "reduce: group gone");
                return;
            };
            let current = self.catalog.get_meta_data(meta_id);
            let candidates: Vec<ReduceCandidate> = engines
                .iter()
                .filter(|e| e.is_healthy())
                .map(|engine| ReduceCandidate {
                    ip: engine.ip.clone(),
                    containers: engine
                        .containers(meta_id)
                        .iter()
                        .map(|c| ReduceContainer {
                            index: c
                                .config
                                .container
                                .instance_index()
                                .or_else(|| {
                                    current
                                        .as_ref()
                                        .and_then(|m| m.base_config_of(&c.info.id))
                                        .map(|bc| bc.index)
                                })
                                .unwrap_or(0),
                            container_id: c.info.id.clone(),
                        })
                        .collect(),
                })
                .collect();

            let Some((ip, container_id)) = select_reduce_victim(&candidates) else {
                error!(meta = %meta_id, "reduce container: no engine available");
                return;
            };
            let Some(engine) = self.get_engine(&ip).await else {
                continue;
            };
            match engine.remove_container(&container_id).await {
                Ok(()) => {
                    if let Err(e) = self.catalog.remove_base_config_by_id(&container_id) {
                        error!(meta = %meta_id, error = %e, "base config release failed");
                    }
                    info!(meta = %meta_id, %ip, container = %container_id, "container reduced");
                }
                Err(e) => {
                    error!(meta = %meta_id, %ip, error = %e, "reduce container failed");
                }
            }
        }
    }

    /// Tear down every container of a meta across the given engines and
    /// drop the meta itself. Used by group removal; workflow gates do not
    /// apply.
    async fn remove_meta_containers(&self, meta: &MetaData, engines: &[Arc<Engine>]) {
        let meta_id = &meta.base.meta_id;
        for engine in engines {
            if !engine.is_healthy() {
                continue;
            }
            for container in engine.containers(meta_id) {
                match engine.remove_container(&container.info.id).await {
                    Ok(()) => {
                        if let Err(e) = self.catalog.remove_base_config_by_id(&container.info.id) {
                            error!(meta = %meta_id, error = %e, "base config release failed");
                        }
                    }
                    Err(e) => {
                        error!(ip = %engine.ip, error = %e, "remove container failed");
                    }
                }
            }
        }
        // Stale bindings from unreachable engines go with the meta.
        if let Some(current) = self.catalog.get_meta_data(meta_id) {
            for base_config in &current.base_configs {
                if let Err(e) = self.catalog.remove_base_config_by_id(&base_config.id) {
                    error!(meta = %meta_id, error = %e, "base config release failed");
                }
            }
        }
        if let Err(e) = self.catalog.remove_meta_data(meta_id) {
            error!(meta = %meta_id, error = %e, "meta cleanup failed");
        }
    }

    // ── Admission ──────────────────────────────────────────────────

    /// Gate shared by every mutation: a meta under upgrade or migration
    /// refuses other workflows.
    async fn validate_meta_data(
        &self,
        meta_id: &str,
    ) -> ClusterResult<(MetaData, Vec<Arc<Engine>>)> {
        if self.upgrader.contains(meta_id) {
            return Err(ClusterError::ContainersUpgrading);
        }
        if self.migrator.contains(meta_id) {
            return Err(ClusterError::ContainersMigrating);
        }
        self.get_meta_data_engines(meta_id).await
    }

    async fn claim_pending(&self, group_id: &str, name: &str, config: &ContainerSpec) -> bool {
        let mut shared = self.shared.write().await;
        let key = (group_id.to_string(), name.to_string());
        if shared.pending_containers.contains_key(&key) {
            return false;
        }
        shared.pending_containers.insert(
            key,
            PendingContainer {
                group_id: group_id.to_string(),
                name: name.to_string(),
                config: config.clone(),
            },
        );
        true
    }

    async fn release_pending(&self, group_id: &str, name: &str) {
        let mut shared = self.shared.write().await;
        shared
            .pending_containers
            .remove(&(group_id.to_string(), name.to_string()));
    }

    /// True if a create/reduce is in flight for the `(GroupID, Name)`.
    pub async fn contains_pending_containers(&self, group_id: &str, name: &str) -> bool {
        let shared = self.shared.read().await;
        shared
            .pending_containers
            .values()
            .any(|p| p.group_id == group_id && p.name == name)
    }
}

enum CreateSlotError {
    NoEngine,
    Agent { ip: String, error: AgentError },
}

/// Resolve a group's servers to live engines, deduplicated by identity.
fn group_engines_locked(shared: &Shared, group: &Group) -> Vec<Arc<Engine>> {
    let mut engines: Vec<Arc<Engine>> = Vec::new();
    for server in &group.servers {
        let found = if !server.ip.is_empty() {
            shared.engines.values().find(|e| e.ip == server.ip)
        } else if !server.name.is_empty() {
            shared.engines.values().find(|e| e.name == server.name)
        } else {
            None
        };
        if let Some(engine) = found {
            let identity = select_ip_or_name(&engine.ip, &engine.name);
            if !engines
                .iter()
                .any(|e| select_ip_or_name(&e.ip, &e.name) == identity)
            {
                engines.push(Arc::clone(engine));
            }
        }
    }
    engines
}

/// The canonical per-instance container name.
fn derive_container_name(group_id: &str, base_name: &str, index: i32) -> String {
    let prefix: String = group_id.chars().take(8).collect();
    format!("{prefix}-{base_name}-{index}")
}

/// Two server references address the same node: directly by field, or
/// through what discovery observed.
fn servers_match(cache: &NodeCache, a: &Server, b: &Server) -> bool {
    if !a.ip.is_empty() && !b.ip.is_empty() {
        return a.ip == b.ip;
    }
    if !a.name.is_empty() && !b.name.is_empty() && a.name == b.name {
        return true;
    }
    match (cache.get(a.identity()), cache.get(b.identity())) {
        (Some(na), Some(nb)) => na.ip == nb.ip,
        _ => false,
    }
}
