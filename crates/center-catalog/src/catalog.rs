//! MetaCatalog — durable source of truth for workload declarations.
//!
//! One JSON file per `MetaID` under the configured root directory; the
//! full catalog is loaded into memory at startup and every mutation is
//! written back before returning. Writes go to a temp file first and are
//! renamed over the final path so a crash never leaves a torn record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

use center_types::{
    image_tag_of, BaseConfig, ContainerSpec, MetaBase, MetaData, MetaId, Placement, WebHooks,
};

use crate::error::{CatalogError, CatalogResult};

/// The persistent meta-configuration catalog.
pub struct MetaCatalog {
    root: PathBuf,
    metas: RwLock<HashMap<MetaId, MetaData>>,
}

impl MetaCatalog {
    /// Open the catalog rooted at `root`, creating the directory if
    /// needed and loading every persisted record into memory.
    pub fn open(root: impl Into<PathBuf>) -> CatalogResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CatalogError::Root(e.to_string()))?;

        let catalog = Self {
            root,
            metas: RwLock::new(HashMap::new()),
        };
        catalog.load()?;
        Ok(catalog)
    }

    fn load(&self) -> CatalogResult<()> {
        let entries = fs::read_dir(&self.root).map_err(|e| CatalogError::Root(e.to_string()))?;
        let mut metas = self.exclusive();
        for entry in entries {
            let entry = entry.map_err(|e| CatalogError::Read(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_meta_file(&path) {
                Ok(meta) => {
                    debug!(meta_id = %meta.base.meta_id, "meta record loaded");
                    metas.insert(meta.base.meta_id.clone(), meta);
                }
                Err(e) => {
                    // A single corrupt record must not take the catalog down.
                    warn!(?path, error = %e, "skipping unreadable meta record");
                }
            }
        }
        info!(count = metas.len(), root = ?self.root, "meta catalog loaded");
        Ok(())
    }

    // ── Declarations ───────────────────────────────────────────────

    /// Declare a new workload and persist it before returning.
    pub fn create_meta_data(
        &self,
        group_id: &str,
        instances: i32,
        webhooks: WebHooks,
        config: ContainerSpec,
    ) -> CatalogResult<MetaData> {
        let now = epoch_secs();
        let meta_id = Uuid::new_v4().simple().to_string();
        let meta = MetaData {
            base: MetaBase {
                group_id: group_id.to_string(),
                meta_id: meta_id.clone(),
                is_remove_delay: false,
                is_recovery: false,
                instances,
                placement: Placement::default(),
                webhooks,
                image_tag: image_tag_of(&config.image).to_string(),
                config,
                create_at: now,
                last_update_at: now,
            },
            base_configs: Vec::new(),
            extra: serde_json::Map::new(),
        };

        let mut metas = self.exclusive();
        self.write_meta(&meta)?;
        metas.insert(meta_id.clone(), meta.clone());
        info!(%meta_id, %group_id, instances, "meta data created");
        Ok(meta)
    }

    /// Update instance count and webhooks in place.
    pub fn set_meta_data(
        &self,
        meta_id: &str,
        instances: i32,
        webhooks: WebHooks,
    ) -> CatalogResult<()> {
        let mut metas = self.exclusive();
        let meta = metas
            .get_mut(meta_id)
            .ok_or_else(|| CatalogError::NotFound(meta_id.to_string()))?;
        meta.base.instances = instances;
        meta.base.webhooks = webhooks;
        meta.base.last_update_at = epoch_secs();

        let snapshot = meta.clone();
        self.write_meta(&snapshot)?;
        info!(%meta_id, instances, "meta data updated");
        Ok(())
    }

    /// Rewrite the image tag after a completed upgrade.
    pub fn set_image_tag(&self, meta_id: &str, image_tag: &str) -> CatalogResult<()> {
        let mut metas = self.exclusive();
        let meta = metas
            .get_mut(meta_id)
            .ok_or_else(|| CatalogError::NotFound(meta_id.to_string()))?;
        meta.base.image_tag = image_tag.to_string();
        meta.base.config.image =
            center_types::swap_image_tag(&meta.base.config.image, image_tag);
        meta.base.last_update_at = epoch_secs();

        let snapshot = meta.clone();
        self.write_meta(&snapshot)?;
        info!(%meta_id, %image_tag, "meta image tag updated");
        Ok(())
    }

    /// Delete a workload declaration. Fails while base configs remain.
    pub fn remove_meta_data(&self, meta_id: &str) -> CatalogResult<()> {
        let mut metas = self.exclusive();
        let meta = metas
            .get(meta_id)
            .ok_or_else(|| CatalogError::NotFound(meta_id.to_string()))?;
        if !meta.base_configs.is_empty() {
            return Err(CatalogError::NotEmpty(meta_id.to_string()));
        }

        let path = self.meta_path(meta_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(CatalogError::Write(e.to_string()));
            }
        }
        metas.remove(meta_id);
        info!(%meta_id, "meta data removed");
        Ok(())
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn get_meta_data(&self, meta_id: &str) -> Option<MetaData> {
        self.shared().get(meta_id).cloned()
    }

    pub fn get_meta_base(&self, meta_id: &str) -> Option<MetaBase> {
        self.shared().get(meta_id).map(|m| m.base.clone())
    }

    /// The meta holding the given container in its base configs.
    pub fn get_meta_data_of_container(&self, container_id: &str) -> Option<MetaData> {
        self.shared()
            .values()
            .find(|m| m.base_config_of(container_id).is_some())
            .cloned()
    }

    /// The meta whose template carries the given name.
    pub fn get_meta_data_of_name(&self, name: &str) -> Option<MetaData> {
        self.shared()
            .values()
            .find(|m| m.base.config.name == name)
            .cloned()
    }

    /// All metas declared in the given group.
    pub fn get_group_meta_data(&self, group_id: &str) -> Vec<MetaData> {
        self.shared()
            .values()
            .filter(|m| m.base.group_id == group_id)
            .cloned()
            .collect()
    }

    /// All declared metas.
    pub fn all(&self) -> Vec<MetaData> {
        self.shared().values().cloned().collect()
    }

    // ── Instance bindings ──────────────────────────────────────────

    /// The smallest unbound instance index in `[0, Instances)`, or `None`
    /// when the meta is saturated (or unknown).
    pub fn make_container_idle_index(&self, meta_id: &str) -> Option<i32> {
        let metas = self.shared();
        let meta = metas.get(meta_id)?;
        (0..meta.base.instances).find(|idx| !meta.index_in_use(*idx))
    }

    /// Bind an instance index to a created container and persist.
    pub fn append_base_config(&self, meta_id: &str, base_config: BaseConfig) -> CatalogResult<()> {
        let mut metas = self.exclusive();
        let meta = metas
            .get_mut(meta_id)
            .ok_or_else(|| CatalogError::NotFound(meta_id.to_string()))?;
        if meta.index_in_use(base_config.index) {
            return Err(CatalogError::IndexConflict {
                meta_id: meta_id.to_string(),
                index: base_config.index,
            });
        }
        debug!(%meta_id, index = base_config.index, id = %base_config.id, "base config bound");
        meta.base_configs.push(base_config);

        let snapshot = meta.clone();
        self.write_meta(&snapshot)?;
        Ok(())
    }

    /// Release the binding that holds the given container, if any.
    pub fn remove_base_config_by_id(
        &self,
        container_id: &str,
    ) -> CatalogResult<Option<(MetaId, BaseConfig)>> {
        let mut metas = self.exclusive();
        for meta in metas.values_mut() {
            let Some(pos) = meta
                .base_configs
                .iter()
                .position(|bc| bc.id == container_id)
            else {
                continue;
            };
            let removed = meta.base_configs.remove(pos);
            let meta_id = meta.base.meta_id.clone();
            debug!(%meta_id, index = removed.index, id = %removed.id, "base config released");

            let snapshot = meta.clone();
            self.write_meta(&snapshot)?;
            return Ok(Some((meta_id, removed)));
        }
        Ok(None)
    }

    // ── Persistence ────────────────────────────────────────────────

    fn meta_path(&self, meta_id: &str) -> PathBuf {
        self.root.join(format!("{meta_id}.json"))
    }

    /// Serialize one record, temp-file first, rename over the target.
    fn write_meta(&self, meta: &MetaData) -> CatalogResult<()> {
        let body = serde_json::to_vec_pretty(meta)
            .map_err(|e| CatalogError::Serialize(e.to_string()))?;
        let path = self.meta_path(&meta.base.meta_id);
        let tmp = self.root.join(format!(".{}.tmp", meta.base.meta_id));

        fs::write(&tmp, body).map_err(|e| CatalogError::Write(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| CatalogError::Write(e.to_string()))?;
        Ok(())
    }

    fn shared(&self) -> RwLockReadGuard<'_, HashMap<MetaId, MetaData>> {
        self.metas.read().expect("catalog lock poisoned")
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, HashMap<MetaId, MetaData>> {
        self.metas.write().expect("catalog lock poisoned")
    }
}

fn read_meta_file(path: &Path) -> CatalogResult<MetaData> {
    let body = fs::read(path).map_err(|e| CatalogError::Read(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| CatalogError::Deserialize(e.to_string()))
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
