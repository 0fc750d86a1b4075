//! Ties FileScanner, LogParser, and FileCache together into the first
//! pipeline layer: discover files, reparse only what changed, return every
//! project's up-to-date event list.

use crate::cache::FileCache;
use crate::error::Result;
use crate::models::{FileRecord, UsageEvent};
use crate::parser::{LogParser, ParseStats};
use crate::pricing::PricingProvider;
use crate::scanner::FileScanner;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub bytes_parsed: u64,
    pub stats: ParseStats,
}

pub struct IncrementalIngester {
    scanner: FileScanner,
}

impl IncrementalIngester {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            scanner: FileScanner::new(root),
        }
    }

    /// Rescan the journal tree and return every project's current event
    /// list, keyed by project name. Reparses only the files that changed
    /// since the last call (tracked via `cache`).
    pub fn refresh(
        &self,
        cache: &mut FileCache,
        pricing: &dyn PricingProvider,
    ) -> Result<(HashMap<String, Vec<UsageEvent>>, IngestReport)> {
        let files = self.scanner.scan()?;
        let mut report = IngestReport::default();
        let mut by_project: HashMap<String, Vec<UsageEvent>> = HashMap::new();
        let mut to_parse = Vec::new();

        for file in files {
            report.files_scanned += 1;

            if let Some(cached) = cache.lookup(&file.path, file.identity) {
                by_project
                    .entry(file.project.clone())
                    .or_default()
                    .extend(cached.parsed_events.iter().cloned());
                continue;
            }

            let rotated = cache.is_rotation(&file.path, file.identity);
            let stale = cache.stale_record(&file.path);
            let from_offset = if rotated {
                0
            } else {
                stale.as_ref().map(|r| r.bytes_consumed).unwrap_or(0)
            };
            let (known_ids, prior_events) = if rotated {
                (HashSet::new(), Vec::new())
            } else {
                match stale {
                    Some(record) => (
                        record.parsed_events.iter().map(|e| e.id.clone()).collect(),
                        record.parsed_events,
                    ),
                    None => (HashSet::new(), Vec::new()),
                }
            };

            to_parse.push(PendingFile {
                project: file.project,
                path: file.path,
                identity: file.identity,
                from_offset,
                known_ids,
                prior_events,
            });
        }

        for outcome in parse_pending(to_parse, pricing) {
            match outcome {
                ParseOutcome::Parsed {
                    project,
                    path,
                    identity,
                    events,
                    bytes_parsed,
                    stats,
                } => {
                    report.bytes_parsed += bytes_parsed;
                    report.stats.lines_seen += stats.lines_seen;
                    report.stats.lines_skipped += stats.lines_skipped;
                    report.stats.duplicates_skipped += stats.duplicates_skipped;

                    by_project
                        .entry(project)
                        .or_default()
                        .extend(events.iter().cloned());
                    cache.put(
                        path,
                        FileRecord {
                            identity,
                            parsed_events: events,
                            bytes_consumed: identity.size,
                        },
                    );
                }
                ParseOutcome::Skipped { path, error } => {
                    report.files_skipped += 1;
                    warn!(path = %path.display(), error = %error, "skipping file for this cycle");
                }
            }
        }

        for events in by_project.values_mut() {
            events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        }

        Ok((by_project, report))
    }
}

struct PendingFile {
    project: String,
    path: std::path::PathBuf,
    identity: crate::models::FileIdentity,
    from_offset: u64,
    known_ids: HashSet<String>,
    prior_events: Vec<UsageEvent>,
}

enum ParseOutcome {
    Parsed {
        project: String,
        path: std::path::PathBuf,
        identity: crate::models::FileIdentity,
        events: Vec<UsageEvent>,
        bytes_parsed: u64,
        stats: ParseStats,
    },
    Skipped {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
}

fn parse_one(mut pending: PendingFile, pricing: &dyn PricingProvider) -> ParseOutcome {
    match read_tail(&pending.path, pending.from_offset) {
        Ok(tail) => {
            let mut stats = ParseStats::default();
            let new_events = LogParser::parse_tail(&tail, &mut pending.known_ids, pricing, &mut stats);
            pending.prior_events.extend(new_events);
            ParseOutcome::Parsed {
                project: pending.project,
                path: pending.path,
                identity: pending.identity,
                events: pending.prior_events,
                bytes_parsed: tail.len() as u64,
                stats,
            }
        }
        Err(error) => ParseOutcome::Skipped { path: pending.path, error },
    }
}

/// File reads and parsing are independent per file once cache decisions are
/// made, so this fans out over `rayon`'s thread pool when the `parallel`
/// feature is enabled; otherwise it runs the same work sequentially.
#[cfg(feature = "parallel")]
fn parse_pending(pending: Vec<PendingFile>, pricing: &dyn PricingProvider) -> Vec<ParseOutcome> {
    use rayon::prelude::*;
    pending.into_par_iter().map(|p| parse_one(p, pricing)).collect()
}

#[cfg(not(feature = "parallel"))]
fn parse_pending(pending: Vec<PendingFile>, pricing: &dyn PricingProvider) -> Vec<ParseOutcome> {
    pending.into_iter().map(|p| parse_one(p, pricing)).collect()
}

/// Read bytes from `offset` to EOF. A shrunk offset relative to the file's
/// current length (stale `from_offset` after a race) reads from zero.
fn read_tail(path: &Path, offset: u64) -> std::io::Result<String> {
    use std::io::{Seek, SeekFrom};
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = if offset > len { 0 } else { offset };
    file.seek(SeekFrom::Start(start))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::DefaultPricingProvider;
    use std::fs;

    fn write_conversation(dir: &Path, project: &str, file_name: &str, line: &str) {
        let proj_dir = dir.join(project);
        fs::create_dir_all(&proj_dir).unwrap();
        fs::write(proj_dir.join(file_name), format!("{line}\n")).unwrap();
    }

    #[test]
    fn refresh_parses_new_files_and_caches_them() {
        let root = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_conversation(
            root.path(),
            "-proj-a",
            "conversation_1.jsonl",
            r#"{"timestamp":"2024-01-01T12:00:00Z","model":"claude-sonnet-4","message":{"id":"m1","usage":{"input_tokens":100,"output_tokens":50}},"request_id":"r1"}"#,
        );

        let mut cache = FileCache::new(state.path());
        let pricing = DefaultPricingProvider::new();
        let ingester = IncrementalIngester::new(root.path());

        let (by_project, report) = ingester.refresh(&mut cache, &pricing).unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(by_project.get("proj-a").map(Vec::len), Some(1));
    }

    #[test]
    fn refresh_skips_unchanged_files_on_second_call() {
        let root = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_conversation(
            root.path(),
            "-proj-a",
            "conversation_1.jsonl",
            r#"{"timestamp":"2024-01-01T12:00:00Z","model":"claude-sonnet-4","message":{"id":"m1","usage":{"input_tokens":100,"output_tokens":50}},"request_id":"r1"}"#,
        );

        let mut cache = FileCache::new(state.path());
        let pricing = DefaultPricingProvider::new();
        let ingester = IncrementalIngester::new(root.path());

        let (first, _) = ingester.refresh(&mut cache, &pricing).unwrap();
        let (second, _) = ingester.refresh(&mut cache, &pricing).unwrap();
        assert_eq!(first.get("proj-a"), second.get("proj-a"));
    }
}
