//! Persists inferred window boundaries across restarts. Single-writer
//! (the detector), atomic on-disk updates (temp-write + rename).

use crate::error::{MonitorError, Result};
use crate::models::{WindowRecord, WindowSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const RETENTION_DAYS: i64 = 3;

pub struct WindowHistoryStore {
    path: PathBuf,
    records: Vec<WindowRecord>,
}

impl WindowHistoryStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join("window_history.json"),
            records: Vec::new(),
        }
    }

    /// Load persisted records, dropping any that fall outside the
    /// retention window except `limit_message` records, which are
    /// authoritative regardless of age. A corrupt file resets the store
    /// with a warning rather than failing the load.
    pub fn load(&mut self, now: i64) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&self.path)?;
        let records: Vec<WindowRecord> = match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(_) => {
                warn!(path = %self.path.display(), "window history corrupt, resetting");
                return Err(MonitorError::HistoryCorrupt {
                    path: self.path.clone(),
                });
            }
        };

        let cutoff = now - RETENTION_DAYS * 24 * 3600;
        self.records = records
            .into_iter()
            .filter(|r| r.source == WindowSource::LimitMessage || r.end_time >= cutoff)
            .collect();

        info!(retained = self.records.len(), "loaded window history");
        Ok(())
    }

    pub fn records(&self) -> &[WindowRecord] {
        &self.records
    }

    pub fn records_for(&self, project: &str) -> Vec<&WindowRecord> {
        let prefix = format!("{project}:");
        self.records
            .iter()
            .filter(|r| r.session_id.starts_with(&prefix))
            .collect()
    }

    /// Merge freshly-detected records into the store and flush atomically.
    /// A record already present (same `session_id`) is replaced; everything
    /// else from the prior load is retained unless superseded.
    pub fn merge_and_flush(&mut self, fresh: Vec<WindowRecord>, now: i64) -> Result<()> {
        for record in fresh {
            if let Some(existing) = self
                .records
                .iter_mut()
                .find(|r| r.session_id == record.session_id)
            {
                *existing = record;
            } else {
                self.records.push(record);
            }
        }

        let cutoff = now - RETENTION_DAYS * 24 * 3600;
        self.records
            .retain(|r| r.source == WindowSource::LimitMessage || r.end_time >= cutoff);

        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.records)?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.records.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, end_time: i64, source: WindowSource) -> WindowRecord {
        WindowRecord {
            start_time: end_time - 18000,
            end_time,
            source,
            reached_limit: source == WindowSource::LimitMessage,
            session_id: session_id.to_string(),
            last_seen: end_time,
        }
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let now = 10 * 24 * 3600;
        {
            let mut store = WindowHistoryStore::new(dir.path());
            store
                .merge_and_flush(
                    vec![record("p:1", now - 3600, WindowSource::FirstMessage)],
                    now,
                )
                .unwrap();
        }

        let mut reloaded = WindowHistoryStore::new(dir.path());
        reloaded.load(now).unwrap();
        assert_eq!(reloaded.records().len(), 1);
    }

    #[test]
    fn purges_stale_records_outside_retention() {
        let dir = tempfile::tempdir().unwrap();
        let now = 10 * 24 * 3600;
        let stale_end = now - 10 * 24 * 3600;
        {
            let mut store = WindowHistoryStore::new(dir.path());
            store
                .merge_and_flush(
                    vec![record("p:stale", stale_end, WindowSource::FirstMessage)],
                    now,
                )
                .unwrap();
        }

        let mut reloaded = WindowHistoryStore::new(dir.path());
        reloaded.load(now).unwrap();
        assert!(reloaded.records().is_empty());
    }

    #[test]
    fn limit_message_records_survive_regardless_of_age() {
        let dir = tempfile::tempdir().unwrap();
        let now = 10 * 24 * 3600;
        let ancient_end = now - 100 * 24 * 3600;
        {
            let mut store = WindowHistoryStore::new(dir.path());
            store
                .merge_and_flush(
                    vec![record("p:limit", ancient_end, WindowSource::LimitMessage)],
                    now,
                )
                .unwrap();
        }

        let mut reloaded = WindowHistoryStore::new(dir.path());
        reloaded.load(now).unwrap();
        assert_eq!(reloaded.records().len(), 1);
    }

    #[test]
    fn rerun_without_new_events_reproduces_same_active_set() {
        let dir = tempfile::tempdir().unwrap();
        let now = 10 * 24 * 3600;
        let mut store = WindowHistoryStore::new(dir.path());
        store
            .merge_and_flush(vec![record("p:1", now - 3600, WindowSource::Gap)], now)
            .unwrap();
        let first_pass = store.records().to_vec();

        store.merge_and_flush(vec![], now).unwrap();
        let second_pass = store.records().to_vec();

        assert_eq!(
            first_pass.iter().map(|r| &r.session_id).collect::<Vec<_>>(),
            second_pass.iter().map(|r| &r.session_id).collect::<Vec<_>>()
        );
    }
}
