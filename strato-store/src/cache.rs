use dashmap::DashMap;
use std::sync::Arc;
use strato_core::record::{PluginRecord, RecordFilter};
use strato_core::Phase;

/// In-memory record cache for zero-latency lookups.
///
/// The cache is the read path for every store query. It is populated from
/// the persistence backend on startup and written through on every update,
/// so chain rebuilds and admin listings never touch the backend.
#[derive(Clone)]
pub struct RecordCache {
    records: Arc<DashMap<String, PluginRecord>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, record: PluginRecord) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.records.get(name).map(|r| r.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<PluginRecord> {
        self.records.remove(name).map(|(_, r)| r)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Run a closure against the cached record under its map entry.
    /// Returns the mutated copy, or `None` if the name is absent.
    pub fn with_mut<F>(&self, name: &str, f: F) -> Option<PluginRecord>
    where
        F: FnOnce(&mut PluginRecord),
    {
        self.records.get_mut(name).map(|mut entry| {
            f(entry.value_mut());
            entry.value().clone()
        })
    }

    /// Snapshot of every record.
    pub fn all(&self) -> Vec<PluginRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    /// Records passing the filter.
    pub fn list(&self, filter: &RecordFilter) -> Vec<PluginRecord> {
        let mut out: Vec<PluginRecord> = self
            .records
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Enabled records in chain order (ascending priority, name tiebreak).
    pub fn list_enabled_sorted_by_priority(&self) -> Vec<PluginRecord> {
        let mut out: Vec<PluginRecord> = self
            .records
            .iter()
            .filter(|e| e.value().enabled)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Records in the given phase, ascending priority.
    pub fn list_by_phase(&self, phase: Phase) -> Vec<PluginRecord> {
        let mut out: Vec<PluginRecord> = self
            .records
            .iter()
            .filter(|e| e.value().phase == phase)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Records whose route patterns match the given path.
    pub fn list_by_route(&self, path: &str) -> Vec<PluginRecord> {
        let mut out: Vec<PluginRecord> = self
            .records
            .iter()
            .filter(|e| e.value().applies_to(path))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        out
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}
