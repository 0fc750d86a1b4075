//! Walks the journal tree and reports each file's identity, so the caller
//! can decide what changed without re-reading file contents.

use crate::error::{MonitorError, Result};
use crate::models::FileIdentity;
use glob::glob;
use std::collections::HashSet;
use std::fs::metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A discovered journal file: its path, the project it belongs to (the
/// parent directory name), and its current on-disk identity.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub project: String,
    pub identity: FileIdentity,
}

pub struct FileScanner {
    root: PathBuf,
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk `root`, returning every readable journal file found. Symlinks
    /// are followed (glob's default), but each resolved path is only
    /// visited once per scan via `seen`. Unreadable entries are skipped and
    /// logged, never abort the scan.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.exists() {
            return Err(MonitorError::RootUnreadable {
                path: self.root.clone(),
            });
        }

        let mut seen = HashSet::new();
        let mut files = Vec::new();

        let patterns = [
            self.root.join("*").join("conversation_*.jsonl"),
            self.root.join("*").join("*.jsonl"),
        ];

        for pattern in &patterns {
            let pattern_str = pattern.to_string_lossy();
            let entries = match glob(&pattern_str) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(pattern = %pattern_str, error = %e, "invalid glob pattern");
                    continue;
                }
            };

            for entry in entries.flatten() {
                if !seen.insert(entry.clone()) {
                    continue;
                }
                match self.identify(&entry) {
                    Ok(identity) => {
                        let project = project_name(&entry);
                        files.push(ScannedFile {
                            path: entry,
                            project,
                            identity,
                        });
                    }
                    Err(e) => {
                        warn!(path = %entry.display(), error = %e, "skipping unreadable journal file");
                    }
                }
            }
        }

        Ok(files)
    }

    fn identify(&self, path: &Path) -> std::io::Result<FileIdentity> {
        let meta = metadata(path)?;
        Ok(FileIdentity {
            inode: meta.ino(),
            size: meta.len(),
            mtime: meta.mtime(),
        })
    }
}

/// The project name is the file's parent directory, with the producer's
/// leading-dash path encoding stripped.
fn project_name(path: &Path) -> String {
    let dir_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    dir_name.strip_prefix('-').unwrap_or(dir_name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_nested_project_directories() {
        let dir = tempfile::tempdir().unwrap();
        let proj_dir = dir.path().join("-home-user-repo");
        fs::create_dir_all(&proj_dir).unwrap();
        fs::write(proj_dir.join("conversation_1.jsonl"), "{}\n").unwrap();
        fs::write(proj_dir.join("abc-def.jsonl"), "{}\n").unwrap();

        let scanner = FileScanner::new(dir.path());
        let files = scanner.scan().unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.project == "home-user-repo"));
    }

    #[test]
    fn missing_root_is_unreadable() {
        let scanner = FileScanner::new("/nonexistent/path/for/test");
        assert!(matches!(
            scanner.scan(),
            Err(MonitorError::RootUnreadable { .. })
        ));
    }

    #[test]
    fn unreadable_single_file_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        let proj_dir = dir.path().join("-proj");
        fs::create_dir_all(&proj_dir).unwrap();
        fs::write(proj_dir.join("good.jsonl"), "{}\n").unwrap();

        let scanner = FileScanner::new(dir.path());
        let files = scanner.scan().unwrap();
        assert_eq!(files.len(), 1);
    }
}
