//! The ordered middleware chain.
//!
//! Writers mutate the entry list under a single mutex and republish an
//! immutable snapshot on every change; the dispatcher reads the snapshot
//! lock-free, so mutations only ever affect subsequent requests.

use crate::middleware::Middleware;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use strato_core::{Phase, RoutePattern, StratoError};
use tracing::{debug, info, warn};

/// One registered middleware with its chain placement.
pub struct ChainEntry {
    pub name: String,
    pub middleware: Arc<dyn Middleware>,
    pub priority: u32,
    pub routes: Vec<RoutePattern>,
    pub phase: Phase,
    /// Registration order, breaks priority ties
    seq: u64,
}

impl ChainEntry {
    /// True if this entry applies to the given request path. An entry
    /// with no routes is dormant.
    pub fn applies_to(&self, path: &str) -> bool {
        strato_core::pattern::matches_any(&self.routes, path)
    }
}

/// Read-only copy of an entry, as returned by `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntryInfo {
    pub name: String,
    pub priority: u32,
    pub routes: Vec<String>,
    pub phase: Phase,
}

impl From<&ChainEntry> for ChainEntryInfo {
    fn from(entry: &ChainEntry) -> Self {
        Self {
            name: entry.name.clone(),
            priority: entry.priority,
            routes: entry.routes.iter().map(|r| r.as_str().to_string()).collect(),
            phase: entry.phase,
        }
    }
}

/// Per-record outcome report for `reload_all`.
#[derive(Debug, Default, Serialize)]
pub struct ReloadReport {
    pub reloaded: usize,
    pub errors: Vec<String>,
    pub total: usize,
}

struct ChainInner {
    entries: Vec<Arc<ChainEntry>>,
    next_seq: u64,
}

pub struct MiddlewareChain {
    inner: Mutex<ChainInner>,
    published: ArcSwap<Vec<Arc<ChainEntry>>>,
    priority_max: u32,
}

impl MiddlewareChain {
    pub fn new(priority_max: u32) -> Self {
        Self {
            inner: Mutex::new(ChainInner {
                entries: Vec::new(),
                next_seq: 0,
            }),
            published: ArcSwap::new(Arc::new(Vec::new())),
            priority_max,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, inner: &mut ChainInner) {
        // Ascending priority, registration order breaks ties.
        inner
            .entries
            .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
        self.published.store(Arc::new(inner.entries.clone()));
    }

    fn check_priority(&self, priority: u32) -> Result<(), StratoError> {
        if priority > self.priority_max {
            return Err(StratoError::InvalidArgument(format!(
                "priority {priority} out of range 0..={}",
                self.priority_max
            )));
        }
        Ok(())
    }

    /// Insert an entry. Rejects duplicates by name.
    pub fn register(
        &self,
        name: &str,
        middleware: Arc<dyn Middleware>,
        priority: u32,
        routes: Vec<RoutePattern>,
        phase: Phase,
    ) -> Result<(), StratoError> {
        self.check_priority(priority)?;
        let mut inner = self.lock();
        if inner.entries.iter().any(|e| e.name == name) {
            return Err(StratoError::Conflict(format!(
                "middleware {name} is already registered"
            )));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(Arc::new(ChainEntry {
            name: name.to_string(),
            middleware,
            priority,
            routes,
            phase,
            seq,
        }));
        self.publish(&mut inner);
        info!(middleware = name, priority, phase = %phase, "Registered in chain");
        Ok(())
    }

    /// Remove an entry. Returns whether it was present.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.name != name);
        let removed = inner.entries.len() != before;
        if removed {
            self.publish(&mut inner);
            info!(middleware = name, "Unregistered from chain");
        } else {
            debug!(middleware = name, "Unregister of absent chain entry");
        }
        removed
    }

    /// Apply priority updates as one logical operation.
    ///
    /// Stops at the first failing name; updates already applied are kept
    /// and published (callers persist to the record store first, so the
    /// chain follows the stored state as far as it got).
    pub fn reorder(&self, updates: &[(String, u32)]) -> Result<usize, StratoError> {
        let mut inner = self.lock();
        let mut applied = 0;
        let mut failure = None;

        for (name, priority) in updates {
            if let Err(e) = self.check_priority(*priority) {
                failure = Some(e);
                break;
            }
            match inner.entries.iter().position(|e| e.name == *name) {
                Some(idx) => {
                    let old = &inner.entries[idx];
                    let replacement = Arc::new(ChainEntry {
                        name: old.name.clone(),
                        middleware: Arc::clone(&old.middleware),
                        priority: *priority,
                        routes: old.routes.clone(),
                        phase: old.phase,
                        seq: old.seq,
                    });
                    inner.entries[idx] = replacement;
                    applied += 1;
                }
                None => {
                    failure = Some(StratoError::NotFound(format!("chain entry {name}")));
                    break;
                }
            }
        }

        self.publish(&mut inner);
        match failure {
            Some(e) => {
                warn!(applied, error = %e, "Reorder stopped early");
                Err(e)
            }
            None => Ok(applied),
        }
    }

    /// Replace an entry's placement fields in one critical section, so a
    /// reader never observes a half-applied update.
    pub fn update(
        &self,
        name: &str,
        priority: u32,
        routes: Vec<RoutePattern>,
        phase: Phase,
    ) -> Result<(), StratoError> {
        self.check_priority(priority)?;
        self.replace_entry(name, |old| ChainEntry {
            name: old.name.clone(),
            middleware: Arc::clone(&old.middleware),
            priority,
            routes,
            phase,
            seq: old.seq,
        })
    }

    pub fn set_routes(&self, name: &str, routes: Vec<RoutePattern>) -> Result<(), StratoError> {
        self.replace_entry(name, |old| ChainEntry {
            name: old.name.clone(),
            middleware: Arc::clone(&old.middleware),
            priority: old.priority,
            routes,
            phase: old.phase,
            seq: old.seq,
        })
    }

    pub fn set_phase(&self, name: &str, phase: Phase) -> Result<(), StratoError> {
        self.replace_entry(name, |old| ChainEntry {
            name: old.name.clone(),
            middleware: Arc::clone(&old.middleware),
            priority: old.priority,
            routes: old.routes.clone(),
            phase,
            seq: old.seq,
        })
    }

    fn replace_entry<F>(&self, name: &str, build: F) -> Result<(), StratoError>
    where
        F: FnOnce(&ChainEntry) -> ChainEntry,
    {
        let mut inner = self.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| StratoError::NotFound(format!("chain entry {name}")))?;
        let replacement = Arc::new(build(&inner.entries[idx]));
        inner.entries[idx] = replacement;
        self.publish(&mut inner);
        Ok(())
    }

    /// Lock-free snapshot for dispatch.
    pub fn snapshot(&self) -> Arc<Vec<Arc<ChainEntry>>> {
        self.published.load_full()
    }

    /// Immutable copies of every entry, in chain order.
    pub fn list(&self) -> Vec<ChainEntryInfo> {
        self.snapshot().iter().map(|e| e.as_ref().into()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<ChainEntryInfo> {
        self.snapshot()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.as_ref().into())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        self.publish(&mut inner);
        removed
    }

    /// Atomic replacement: unregister everything, then register from the
    /// supplied list. Per-entry errors are reported, not fatal.
    pub fn reload_all(
        &self,
        entries: Vec<(String, Arc<dyn Middleware>, u32, Vec<RoutePattern>, Phase)>,
    ) -> ReloadReport {
        let mut report = ReloadReport {
            total: entries.len(),
            ..Default::default()
        };
        self.clear();
        for (name, middleware, priority, routes, phase) in entries {
            match self.register(&name, middleware, priority, routes, phase) {
                Ok(()) => report.reloaded += 1,
                Err(e) => report.errors.push(format!("{name}: {e}")),
            }
        }
        info!(
            reloaded = report.reloaded,
            errors = report.errors.len(),
            "Chain reloaded"
        );
        report
    }
}
