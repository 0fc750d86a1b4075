//! The immutable value the Orchestrator publishes on every data-refresh
//! tick. Readers (the TUI render loop, `top`/`detect` one-shots) get a
//! consistent view by cloning the `Arc` rather than locking field-by-field.

use crate::models::{AggregatedMetrics, Plan};
use std::sync::Arc;
use std::sync::RwLock;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Snapshot {
    pub generated_at: i64,
    pub plan: Plan,
    pub metrics: AggregatedMetrics,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

/// Single-writer, many-reader publication point. The writer (Orchestrator)
/// swaps the whole `Arc<Snapshot>` under a short-lived write lock; readers
/// take a read lock only long enough to clone the `Arc`, so a slow renderer
/// never blocks the next refresh.
#[derive(Default)]
pub struct SnapshotHandle {
    inner: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(snapshot));
    }

    /// The most recently published snapshot, or `None` before the first
    /// refresh has completed.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
