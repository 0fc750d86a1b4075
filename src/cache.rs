//! Persists parsed events per journal file, keyed by (inode, size, mtime),
//! so an unchanged file costs zero re-parsing on the next refresh.

use crate::error::{MonitorError, Result};
use crate::models::{FileIdentity, FileRecord, UsageEvent};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Entries are a `DashMap` rather than a plain `HashMap`/mutex: the
/// `parallel`-feature ingest path reads many entries concurrently while
/// `put` writes one at a time, and `DashMap` shards its locking so those
/// don't serialize on a single mutex.
pub struct FileCache {
    state_dir: PathBuf,
    entries: DashMap<PathBuf, FileRecord>,
}

impl FileCache {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            entries: DashMap::new(),
        }
    }

    /// Load every cache entry from disk. Entries whose on-disk file no
    /// longer exists are simply not reloaded; corrupt entries are dropped
    /// with a warning and reset rather than aborting the load.
    pub fn load(&mut self) -> Result<()> {
        if !self.state_dir.exists() {
            return Ok(());
        }
        let dir = fs::read_dir(&self.state_dir)?;
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load_one(&path) {
                Ok((source_path, record)) => {
                    self.entries.insert(source_path, record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping corrupt cache entry");
                }
            }
        }
        Ok(())
    }

    fn load_one(&self, cache_file: &Path) -> Result<(PathBuf, FileRecord)> {
        #[derive(serde::Deserialize)]
        struct OnDisk {
            source_path: PathBuf,
            record: FileRecord,
        }
        let content = fs::read_to_string(cache_file)?;
        let on_disk: OnDisk =
            serde_json::from_str(&content).map_err(|_| MonitorError::CacheCorrupt {
                path: cache_file.to_path_buf(),
            })?;
        Ok((on_disk.source_path, on_disk.record))
    }

    /// This file's cached record if its identity matches exactly; `None`
    /// means a rescan from scratch (either never cached, or a mismatched
    /// (inode, size, mtime) triple).
    pub fn lookup(&self, path: &Path, identity: FileIdentity) -> Option<FileRecord> {
        self.entries
            .get(path)
            .filter(|record| record.identity == identity)
            .map(|record| record.clone())
    }

    /// Whatever is cached for `path` regardless of identity match, so the
    /// caller can resume an incremental parse from its byte offset.
    pub fn stale_record(&self, path: &Path) -> Option<FileRecord> {
        self.entries.get(path).map(|record| record.clone())
    }

    /// Whether `identity` represents a rotation relative to whatever is
    /// cached for `path` (no inode match, or size shrank).
    pub fn is_rotation(&self, path: &Path, identity: FileIdentity) -> bool {
        match self.entries.get(path) {
            Some(record) => {
                record.identity.inode != identity.inode || identity.size < record.identity.size
            }
            None => false,
        }
    }

    pub fn put(&mut self, path: PathBuf, record: FileRecord) {
        if let Err(e) = self.persist(&path, &record) {
            warn!(path = %path.display(), error = %e, "failed to persist cache entry");
        }
        self.entries.insert(path, record);
    }

    fn persist(&self, path: &Path, record: &FileRecord) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        let cache_file = self.state_dir.join(format!("{}.json", cache_key(path)));
        let tmp_file = cache_file.with_extension("json.tmp");

        #[derive(serde::Serialize)]
        struct OnDisk<'a> {
            source_path: &'a Path,
            record: &'a FileRecord,
        }
        let payload = OnDisk {
            source_path: path,
            record,
        };
        let content = serde_json::to_string(&payload)?;
        fs::write(&tmp_file, content)?;
        fs::rename(&tmp_file, &cache_file)?;
        debug!(path = %path.display(), "cache entry persisted");
        Ok(())
    }

    pub fn cached_event_count(&self, path: &Path) -> usize {
        self.entries.get(path).map(|r| r.parsed_events.len()).unwrap_or(0)
    }

    pub fn events_for(&self, path: &Path) -> Vec<UsageEvent> {
        self.entries
            .get(path)
            .map(|r| r.parsed_events.clone())
            .unwrap_or_default()
    }
}

fn cache_key(path: &Path) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenCounts;

    fn sample_event(id: &str) -> UsageEvent {
        UsageEvent {
            id: id.to_string(),
            timestamp: 0,
            model: "x".to_string(),
            tokens: TokenCounts::default(),
            cost: 0.0,
            limit_indicator: None,
        }
    }

    #[test]
    fn unchanged_identity_returns_cached_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        let identity = FileIdentity {
            inode: 1,
            size: 100,
            mtime: 1000,
        };
        let record = FileRecord {
            identity,
            parsed_events: vec![sample_event("a")],
            bytes_consumed: 100,
        };
        cache.put(PathBuf::from("/journal/a.jsonl"), record);

        let found = cache.lookup(Path::new("/journal/a.jsonl"), identity);
        assert!(found.is_some());
        assert_eq!(found.unwrap().parsed_events.len(), 1);
    }

    #[test]
    fn mismatched_identity_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        let identity = FileIdentity {
            inode: 1,
            size: 100,
            mtime: 1000,
        };
        cache.put(
            PathBuf::from("/journal/a.jsonl"),
            FileRecord {
                identity,
                parsed_events: vec![],
                bytes_consumed: 100,
            },
        );
        let changed = FileIdentity {
            inode: 1,
            size: 200,
            mtime: 2000,
        };
        assert!(cache.lookup(Path::new("/journal/a.jsonl"), changed).is_none());
    }

    #[test]
    fn size_shrink_is_detected_as_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        let identity = FileIdentity {
            inode: 1,
            size: 1000,
            mtime: 1000,
        };
        cache.put(
            PathBuf::from("/journal/a.jsonl"),
            FileRecord {
                identity,
                parsed_events: vec![],
                bytes_consumed: 1000,
            },
        );
        let rotated = FileIdentity {
            inode: 1,
            size: 500,
            mtime: 2000,
        };
        assert!(cache.is_rotation(Path::new("/journal/a.jsonl"), rotated));
    }

    #[test]
    fn inode_change_is_detected_as_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        let identity = FileIdentity {
            inode: 1,
            size: 1000,
            mtime: 1000,
        };
        cache.put(
            PathBuf::from("/journal/a.jsonl"),
            FileRecord {
                identity,
                parsed_events: vec![],
                bytes_consumed: 1000,
            },
        );
        let rotated = FileIdentity {
            inode: 2,
            size: 1000,
            mtime: 1000,
        };
        assert!(cache.is_rotation(Path::new("/journal/a.jsonl"), rotated));
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FileIdentity {
            inode: 1,
            size: 10,
            mtime: 10,
        };
        {
            let mut cache = FileCache::new(dir.path());
            cache.put(
                PathBuf::from("/journal/a.jsonl"),
                FileRecord {
                    identity,
                    parsed_events: vec![sample_event("a")],
                    bytes_consumed: 10,
                },
            );
        }

        let mut reloaded = FileCache::new(dir.path());
        reloaded.load().unwrap();
        let found = reloaded.lookup(Path::new("/journal/a.jsonl"), identity);
        assert!(found.is_some());
        assert_eq!(found.unwrap().parsed_events.len(), 1);
    }
}
