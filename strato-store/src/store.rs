use crate::cache::RecordCache;
use crate::persist;
use std::path::PathBuf;
use strato_core::record::{PluginRecord, RecordFilter, RecordStatus};
use strato_core::{Phase, RoutePattern, StratoError};

/// The plugin record store: an in-memory cache fronting a persistence
/// backend. All reads hit the cache; every write goes through the cache
/// and the backend before returning, so a successful update is durable.
///
/// Updates are atomic per record (one cache entry mutation, one backend
/// put). Cross-record operations are not transactional; callers apply
/// per-record updates and stop at the first failure.
pub struct PluginStore {
    cache: RecordCache,
    backend: Backend,
}

enum Backend {
    /// No persistence; used by tests and ephemeral hosts.
    Memory,
    /// Whole-state JSON file, written atomically on each change.
    File(PathBuf),
    #[cfg(feature = "etcd")]
    Etcd(tokio::sync::Mutex<crate::etcd::EtcdStore>),
}

impl PluginStore {
    pub fn in_memory() -> Self {
        Self {
            cache: RecordCache::new(),
            backend: Backend::Memory,
        }
    }

    /// Standalone mode: records persisted to a JSON state file. Any
    /// existing state is loaded immediately.
    pub fn standalone(state_file: impl Into<PathBuf>) -> Result<Self, StratoError> {
        let state_file = state_file.into();
        let cache = RecordCache::new();
        persist::load_records(&state_file, &cache)?;
        Ok(Self {
            cache,
            backend: Backend::File(state_file),
        })
    }

    /// etcd mode: connect and load all records under the schema prefix.
    #[cfg(feature = "etcd")]
    pub async fn etcd(endpoints: &[String], prefix: &str) -> Result<Self, StratoError> {
        let cache = RecordCache::new();
        let mut store = crate::etcd::EtcdStore::connect(endpoints, prefix).await?;
        store.load_all(&cache).await?;
        Ok(Self {
            cache,
            backend: Backend::Etcd(tokio::sync::Mutex::new(store)),
        })
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Insert or replace a record. Routes are normalized (`[]` → `["*"]`)
    /// and `updated_at` is bumped.
    pub async fn save(&self, mut record: PluginRecord) -> Result<PluginRecord, StratoError> {
        record.normalize_routes();
        record.updated_at = chrono::Utc::now();
        self.cache.insert(record.clone());
        self.persist_put(&record).await?;
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Result<PluginRecord, StratoError> {
        self.cache
            .get(name)
            .ok_or_else(|| StratoError::NotFound(format!("plugin {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.contains(name)
    }

    pub fn list(&self, filter: &RecordFilter) -> Vec<PluginRecord> {
        self.cache.list(filter)
    }

    pub fn list_all(&self) -> Vec<PluginRecord> {
        self.cache.list(&RecordFilter::default())
    }

    pub fn list_enabled_sorted_by_priority(&self) -> Vec<PluginRecord> {
        self.cache.list_enabled_sorted_by_priority()
    }

    pub fn list_by_phase(&self, phase: Phase) -> Vec<PluginRecord> {
        self.cache.list_by_phase(phase)
    }

    pub fn list_by_route(&self, path: &str) -> Vec<PluginRecord> {
        self.cache.list_by_route(path)
    }

    /// Remove a record, returning it. The caller owns blob cleanup.
    pub async fn delete(&self, name: &str) -> Result<PluginRecord, StratoError> {
        let record = self
            .cache
            .remove(name)
            .ok_or_else(|| StratoError::NotFound(format!("plugin {name}")))?;
        if let Err(e) = self.persist_delete(name).await {
            // Put the cached record back so cache and backend agree.
            self.cache.insert(record);
            return Err(e);
        }
        Ok(record)
    }

    /// The targeted-update primitive: mutate the cached record under its
    /// map entry, bump `updated_at`, persist, and return the new copy.
    pub async fn update<F>(&self, name: &str, f: F) -> Result<PluginRecord, StratoError>
    where
        F: FnOnce(&mut PluginRecord),
    {
        let updated = self
            .cache
            .with_mut(name, |record| {
                f(record);
                record.normalize_routes();
                record.updated_at = chrono::Utc::now();
            })
            .ok_or_else(|| StratoError::NotFound(format!("plugin {name}")))?;
        self.persist_put(&updated).await?;
        Ok(updated)
    }

    pub async fn set_priority(&self, name: &str, priority: u32) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| r.priority = priority).await
    }

    pub async fn set_routes(
        &self,
        name: &str,
        routes: Vec<RoutePattern>,
    ) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| r.routes = routes).await
    }

    pub async fn set_phase(&self, name: &str, phase: Phase) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| r.phase = phase).await
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| {
            r.enabled = enabled;
            if enabled {
                r.status = RecordStatus::Active;
                r.last_enabled_at = Some(chrono::Utc::now());
            } else {
                r.status = RecordStatus::Disabled;
            }
            r.error_message = None;
        })
        .await
    }

    pub async fn set_config(
        &self,
        name: &str,
        config: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| r.config = config).await
    }

    pub async fn set_error(&self, name: &str, message: String) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| {
            r.status = RecordStatus::Error;
            r.error_message = Some(message);
        })
        .await
    }

    /// Bump the load counter.
    pub async fn record_load(&self, name: &str) -> Result<PluginRecord, StratoError> {
        self.update(name, |r| r.usage_count += 1).await
    }

    #[cfg_attr(not(feature = "etcd"), allow(unused_variables))]
    async fn persist_put(&self, record: &PluginRecord) -> Result<(), StratoError> {
        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::File(path) => persist::save_records(path, &self.cache),
            #[cfg(feature = "etcd")]
            Backend::Etcd(store) => store.lock().await.put_record(record).await,
        }
    }

    #[cfg_attr(not(feature = "etcd"), allow(unused_variables))]
    async fn persist_delete(&self, name: &str) -> Result<(), StratoError> {
        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::File(path) => persist::save_records(path, &self.cache),
            #[cfg(feature = "etcd")]
            Backend::Etcd(store) => store.lock().await.delete_record(name).await,
        }
    }
}
