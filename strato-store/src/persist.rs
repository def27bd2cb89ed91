//! File-based persistence for standalone mode.
//!
//! On every write the current record set is serialized to a JSON file.
//! On startup the file is loaded back into the cache so records survive
//! restarts without an external store.
//!
//! The file is written atomically: first to a `.tmp` sibling, then renamed
//! over the final path, so a crash mid-write never corrupts stored state.

use crate::cache::RecordCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use strato_core::record::PluginRecord;
use strato_core::StratoError;

/// The shape serialized to / deserialized from the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub plugins: HashMap<String, PluginRecord>,
}

/// Save the cached record set to `path`.
pub fn save_records(path: &Path, cache: &RecordCache) -> Result<(), StratoError> {
    let persisted = PersistedState {
        plugins: cache
            .all()
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect(),
    };

    let json = serde_json::to_string_pretty(&persisted)
        .map_err(|e| StratoError::Dependency(format!("serialize state: {e}")))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| StratoError::Dependency(format!("create state dir: {e}")))?;
    }

    // Atomic write: tmp file → rename
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .map_err(|e| StratoError::Dependency(format!("write tmp state file: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| StratoError::Dependency(format!("rename state file: {e}")))?;

    tracing::debug!(path = %path.display(), plugins = persisted.plugins.len(), "persist: state saved");
    Ok(())
}

/// Load a previously saved state file into `cache`.
///
/// * If the file does not exist          → silently returns (first run).
/// * If the file exists but is malformed → returns a dependency error.
pub fn load_records(path: &Path, cache: &RecordCache) -> Result<usize, StratoError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "persist: no state file found, starting fresh");
        return Ok(0);
    }

    let data = std::fs::read_to_string(path)
        .map_err(|e| StratoError::Dependency(format!("read state file: {e}")))?;
    let persisted: PersistedState = serde_json::from_str(&data)
        .map_err(|e| StratoError::Dependency(format!("parse state file: {e}")))?;

    let count = persisted.plugins.len();
    for (_, record) in persisted.plugins {
        cache.insert(record);
    }

    tracing::info!(path = %path.display(), plugins = count, "persist: state loaded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, priority: u32) -> PluginRecord {
        let mut rec = PluginRecord::new(name, "1.0", "builtin:test");
        rec.priority = priority;
        rec
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let cache = RecordCache::new();
        cache.insert(record("auth", 10));
        cache.insert(record("logger", 900));
        save_records(&path, &cache).unwrap();

        let restored = RecordCache::new();
        let count = load_records(&path, &restored).unwrap();
        assert_eq!(count, 2);
        assert_eq!(restored.get("auth").unwrap().priority, 10);
        assert_eq!(restored.get("logger").unwrap().priority, 900);
    }

    #[test]
    fn load_missing_file_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RecordCache::new();
        let count = load_records(&dir.path().join("absent.json"), &cache).unwrap();
        assert_eq!(count, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn load_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not-json").unwrap();
        let cache = RecordCache::new();
        assert!(load_records(&path, &cache).is_err());
    }

    #[test]
    fn save_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let cache = RecordCache::new();
        cache.insert(record("a", 1));
        save_records(&path, &cache).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
