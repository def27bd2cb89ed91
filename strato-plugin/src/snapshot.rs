//! Point-in-time copies of a plugin's mutable configuration.
//!
//! Histories are bounded per plugin and monotonic in timestamp. Rollback
//! restores the newest snapshot that differs from the live state; when the
//! newest snapshot equals the live state it steps back one further, so
//! repeated rollbacks walk backward through history. Either way exactly
//! one snapshot is consumed per rollback.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use strato_core::record::PluginRecord;
use strato_core::{Phase, RoutePattern, StratoError};
use tracing::debug;

/// A durable copy of one plugin's chain-relevant configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    pub name: String,
    pub priority: u32,
    pub routes: Vec<RoutePattern>,
    pub phase: Phase,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub enabled: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConfigSnapshot {
    pub fn of(record: &PluginRecord) -> Self {
        Self {
            name: record.name.clone(),
            priority: record.priority,
            routes: record.routes.clone(),
            phase: record.phase,
            config: record.config.clone(),
            enabled: record.enabled,
            timestamp: chrono::Utc::now(),
        }
    }

    /// True if the live record still matches this snapshot's fields.
    pub fn matches(&self, record: &PluginRecord) -> bool {
        self.priority == record.priority
            && self.routes == record.routes
            && self.phase == record.phase
            && self.config == record.config
            && self.enabled == record.enabled
    }

    /// Write this snapshot's fields back onto a record.
    pub fn apply_to(&self, record: &mut PluginRecord) {
        record.priority = self.priority;
        record.routes = self.routes.clone();
        record.phase = self.phase;
        record.config = self.config.clone();
        record.enabled = self.enabled;
    }
}

pub struct SnapshotManager {
    histories: Mutex<HashMap<String, VecDeque<ConfigSnapshot>>>,
    max_per_plugin: usize,
}

impl SnapshotManager {
    pub fn new(max_per_plugin: usize) -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            max_per_plugin: max_per_plugin.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<ConfigSnapshot>>> {
        match self.histories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a snapshot of the record, evicting the oldest past the bound.
    pub fn snapshot(&self, record: &PluginRecord) -> ConfigSnapshot {
        let snap = ConfigSnapshot::of(record);
        let mut histories = self.lock();
        let history = histories.entry(record.name.clone()).or_default();
        history.push_back(snap.clone());
        while history.len() > self.max_per_plugin {
            history.pop_front();
        }
        debug!(plugin = %record.name, depth = history.len(), "Snapshot taken");
        snap
    }

    pub fn list(&self, name: &str) -> Vec<ConfigSnapshot> {
        self.lock()
            .get(name)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn depth(&self, name: &str) -> usize {
        self.lock().get(name).map(|h| h.len()).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(|h| h.len()).sum()
    }

    pub fn clear(&self, name: &str) -> usize {
        self.lock().remove(name).map(|h| h.len()).unwrap_or(0)
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Pick and consume the rollback target for `record`.
    ///
    /// The newest snapshot is restored when it differs from the live
    /// state; when it equals the live state the one before it is restored
    /// (failing `InvalidArgument` if there is no previous snapshot). The
    /// newest snapshot, which stood for the state being rolled back from,
    /// is discarded either way.
    pub fn take_rollback_target(
        &self,
        record: &PluginRecord,
    ) -> Result<ConfigSnapshot, StratoError> {
        let mut histories = self.lock();
        let history = histories
            .get_mut(&record.name)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                StratoError::InvalidArgument(format!("no snapshot for plugin {}", record.name))
            })?;

        let newest_matches_live = history
            .back()
            .is_some_and(|newest| newest.matches(record));

        let target = if newest_matches_live {
            if history.len() < 2 {
                return Err(StratoError::InvalidArgument(format!(
                    "no previous snapshot for plugin {}",
                    record.name
                )));
            }
            history[history.len() - 2].clone()
        } else {
            history.back().cloned().unwrap()
        };

        history.pop_back();
        Ok(target)
    }

    /// Pick the snapshot at `timestamp` and drop everything younger.
    pub fn take_rollback_target_at(
        &self,
        name: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<ConfigSnapshot, StratoError> {
        let mut histories = self.lock();
        let history = histories
            .get_mut(name)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                StratoError::InvalidArgument(format!("no snapshot for plugin {name}"))
            })?;

        let idx = history
            .iter()
            .position(|s| s.timestamp == timestamp)
            .ok_or_else(|| {
                StratoError::NotFound(format!("snapshot of {name} at {timestamp}"))
            })?;

        history.truncate(idx + 1);
        Ok(history[idx].clone())
    }
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
    fn history_is_bounded_and_monotonic() {
        let mgr = SnapshotManager::new(3);
        let mut rec = record("p", 0);
        for priority in 1..=5 {
            rec.priority = priority;
            mgr.snapshot(&rec);
        }
        let history = mgr.list("p");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].priority, 3); // oldest two evicted
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn rollback_walks_backward_through_history() {
        // snapshot at 100, mutate to 500, snapshot, mutate to 900:
        // first rollback restores 500, second restores 100.
        let mgr = SnapshotManager::new(10);
        let mut rec = record("p", 100);
        mgr.snapshot(&rec);
        rec.priority = 500;
        mgr.snapshot(&rec);
        rec.priority = 900;

        let target = mgr.take_rollback_target(&rec).unwrap();
        assert_eq!(target.priority, 500);
        assert_eq!(mgr.depth("p"), 1);
        target.apply_to(&mut rec);

        let target = mgr.take_rollback_target(&rec).unwrap();
        assert_eq!(target.priority, 100);
        assert_eq!(mgr.depth("p"), 0);
        target.apply_to(&mut rec);
        assert_eq!(rec.priority, 100);
    }

    #[test]
    fn rollback_without_snapshots_fails() {
        let mgr = SnapshotManager::new(10);
        let rec = record("p", 1);
        assert!(matches!(
            mgr.take_rollback_target(&rec),
            Err(StratoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rollback_with_single_unchanged_snapshot_fails() {
        let mgr = SnapshotManager::new(10);
        let rec = record("p", 100);
        mgr.snapshot(&rec);
        // Nothing changed since the only snapshot: nothing to roll back to.
        let err = mgr.take_rollback_target(&rec).unwrap_err();
        assert!(err.to_string().contains("no previous snapshot"));
    }

    #[test]
    fn rollback_with_single_snapshot_and_changed_state_restores_it() {
        let mgr = SnapshotManager::new(10);
        let mut rec = record("p", 10);
        mgr.snapshot(&rec);
        rec.priority = 999;

        let target = mgr.take_rollback_target(&rec).unwrap();
        assert_eq!(target.priority, 10);
        assert_eq!(mgr.depth("p"), 0);
    }

    #[test]
    fn rollback_restores_every_field() {
        let mgr = SnapshotManager::new(10);
        let mut rec = record("p", 10);
        rec.phase = Phase::PreAuth;
        rec.routes = vec![RoutePattern::parse("/api/*").unwrap()];
        rec.config
            .insert("ttl".into(), serde_json::json!(30));
        rec.enabled = true;
        mgr.snapshot(&rec);

        rec.priority = 500;
        rec.phase = Phase::PostRoute;
        rec.routes = vec![RoutePattern::parse("/other").unwrap()];
        rec.config.insert("ttl".into(), serde_json::json!(99));
        rec.enabled = false;

        let target = mgr.take_rollback_target(&rec).unwrap();
        target.apply_to(&mut rec);
        assert_eq!(rec.priority, 10);
        assert_eq!(rec.phase, Phase::PreAuth);
        assert_eq!(rec.routes[0].as_str(), "/api/*");
        assert_eq!(rec.config["ttl"], 30);
        assert!(rec.enabled);
    }

    #[test]
    fn rollback_to_timestamp_drops_younger_snapshots() {
        let mgr = SnapshotManager::new(10);
        let mut rec = record("p", 1);
        mgr.snapshot(&rec);
        rec.priority = 2;
        let middle = mgr.snapshot(&rec);
        rec.priority = 3;
        mgr.snapshot(&rec);
        assert_eq!(mgr.depth("p"), 3);

        let target = mgr
            .take_rollback_target_at("p", middle.timestamp)
            .unwrap();
        assert_eq!(target.priority, 2);
        // Younger snapshots dropped, target retained.
        assert_eq!(mgr.depth("p"), 2);
    }

    #[test]
    fn rollback_to_unknown_timestamp_is_not_found() {
        let mgr = SnapshotManager::new(10);
        let rec = record("p", 1);
        mgr.snapshot(&rec);
        assert!(matches!(
            mgr.take_rollback_target_at("p", chrono::Utc::now() + chrono::Duration::days(1)),
            Err(StratoError::NotFound(_))
        ));
    }

    #[test]
    fn clear_and_clear_all() {
        let mgr = SnapshotManager::new(10);
        mgr.snapshot(&record("a", 1));
        mgr.snapshot(&record("b", 1));
        assert_eq!(mgr.clear("a"), 1);
        assert_eq!(mgr.depth("a"), 0);
        mgr.clear_all();
        assert_eq!(mgr.total(), 0);
    }
}
