use crate::cache::RecordCache;
use crate::schema::Schema;
use strato_core::record::PluginRecord;
use strato_core::StratoError;
use tracing::info;

/// etcd client wrapper for plugin record CRUD.
pub struct EtcdStore {
    client: etcd_client::Client,
    schema: Schema,
}

impl EtcdStore {
    /// Connect to etcd.
    pub async fn connect(endpoints: &[String], prefix: &str) -> Result<Self, StratoError> {
        let client = etcd_client::Client::connect(endpoints, None)
            .await
            .map_err(|e| StratoError::Dependency(format!("etcd connect: {e}")))?;
        info!("Connected to etcd at {:?}", endpoints);
        Ok(Self {
            client,
            schema: Schema::new(prefix),
        })
    }

    /// Load all plugin records into the cache.
    pub async fn load_all(&mut self, cache: &RecordCache) -> Result<usize, StratoError> {
        let prefix = self.schema.plugins_prefix();
        let resp = self
            .client
            .get(
                prefix.as_bytes(),
                Some(etcd_client::GetOptions::new().with_prefix()),
            )
            .await
            .map_err(|e| StratoError::Dependency(format!("etcd get: {e}")))?;

        let mut count = 0;
        for kv in resp.kvs() {
            match serde_json::from_slice::<PluginRecord>(kv.value()) {
                Ok(record) => {
                    cache.insert(record);
                    count += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to deserialize plugin record, skipping");
                }
            }
        }
        info!(plugins = count, "Loaded plugin records from etcd");
        Ok(count)
    }

    /// Put a plugin record into etcd.
    pub async fn put_record(&mut self, record: &PluginRecord) -> Result<(), StratoError> {
        let key = self.schema.plugin_key(&record.name);
        let value = serde_json::to_vec(record)?;
        self.client
            .put(key, value, None)
            .await
            .map_err(|e| StratoError::Dependency(format!("etcd put: {e}")))?;
        Ok(())
    }

    /// Delete a plugin record from etcd.
    pub async fn delete_record(&mut self, name: &str) -> Result<(), StratoError> {
        let key = self.schema.plugin_key(name);
        self.client
            .delete(key, None)
            .await
            .map_err(|e| StratoError::Dependency(format!("etcd delete: {e}")))?;
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}
