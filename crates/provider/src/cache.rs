//! Per-provider memo of the backend's cluster listing.

use std::sync::Mutex;

/// One row of a backend's cluster listing. Node columns are backend-specific
/// (k3d reports counts, kind reports node container names).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    pub name: String,
    pub servers: String,
    pub agents: String,
}

/// Owned by a single provider instance. Mutating lifecycle calls must `invalidate()`.
#[derive(Debug, Default)]
pub struct ClusterCache {
    entries: Mutex<Option<Vec<ClusterEntry>>>,
}

impl ClusterCache {
    pub fn get(&self) -> Option<Vec<ClusterEntry>> {
        self.entries.lock().ok().and_then(|g| g.clone())
    }

    pub fn store(&self, entries: Vec<ClusterEntry>) {
        if let Ok(mut g) = self.entries.lock() {
            *g = Some(entries);
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut g) = self.entries.lock() {
            *g = None;
        }
    }

    pub fn find(&self, name: &str) -> Option<ClusterEntry> {
        self.get().and_then(|v| v.into_iter().find(|e| e.name == name))
    }
}
