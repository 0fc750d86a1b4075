//! One-shot diagnostic dump of detector state (`detect` subcommand):
//! per-project inferred `WindowRecord`s with their source, confidence, and
//! reached-limit flag. Grounded in the teacher's `monitor.rs`
//! snapshot/JSON-dump pattern (`display_snapshot`), generalized from a
//! single live snapshot to every project's full detected window history.

use crate::cache::FileCache;
use crate::detector::{sessions_to_history, SessionDetector};
use crate::error::Result;
use crate::ingest::IncrementalIngester;
use crate::models::{RejectedWindow, Session, WindowSource};
use crate::pricing::PricingProvider;
use crate::window_history::WindowHistoryStore;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DetectedWindow {
    pub project: String,
    pub session_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub source: WindowSource,
    pub confidence: f64,
    pub reached_limit: bool,
    pub is_gap: bool,
    pub is_active: bool,
    pub event_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub generated_at: i64,
    pub windows: Vec<DetectedWindow>,
    /// Candidate windows conflict resolution discarded, with the
    /// precedence reason they lost (§B.1 diagnostic supplement).
    pub rejected: Vec<RejectedWindow>,
}

/// Run ingest + detection for every project under `root` and report every
/// window found, including synthetic gap sessions, for diagnostic
/// visibility. Does not publish a Snapshot or persist anything beyond the
/// normal WindowHistoryStore flush.
pub fn run_detect_report(
    root: &std::path::Path,
    state_root: &std::path::Path,
    pricing: &dyn PricingProvider,
    now: i64,
    data_refresh_interval_secs: i64,
) -> Result<DetectReport> {
    let mut cache = FileCache::new(state_root.join("cache"));
    cache.load()?;
    let mut history = WindowHistoryStore::new(state_root.join("history"));
    history.load(now)?;

    let ingester = IncrementalIngester::new(root);
    let (by_project, _ingest_report) = ingester.refresh(&mut cache, pricing)?;

    let mut detector = SessionDetector::new();
    let mut windows = Vec::new();
    let mut rejected = Vec::new();
    let mut fresh_history = Vec::new();

    let mut projects: Vec<&String> = by_project.keys().collect();
    projects.sort();

    for project in projects {
        let events = &by_project[project];
        let existing: Vec<_> = history.records_for(project).into_iter().cloned().collect();
        let sessions = detector.detect(project, events, &existing, now, data_refresh_interval_secs);
        fresh_history.extend(sessions_to_history(&sessions));
        windows.extend(sessions.iter().map(to_detected_window));
        rejected.extend(detector.last_rejections().iter().cloned());
    }

    history.merge_and_flush(fresh_history, now)?;

    Ok(DetectReport {
        generated_at: now,
        windows,
        rejected,
    })
}

fn to_detected_window(session: &Session) -> DetectedWindow {
    DetectedWindow {
        project: session.project.clone(),
        session_id: session.id.clone(),
        start_time: session.start_time,
        end_time: session.end_time,
        source: session.window_source,
        confidence: session.window_source.confidence(),
        reached_limit: session.reached_limit,
        is_gap: session.is_gap,
        is_active: session.is_active,
        event_count: session.entries.len(),
    }
}

/// Human-readable rendering of a [`DetectReport`], one line per window,
/// using each source's icon (§6 "detection icons").
pub fn render_detect_report(report: &DetectReport) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for window in &report.windows {
        let kind = if window.is_gap { "gap" } else { "session" };
        let _ = writeln!(
            out,
            "{} {:<24} {:<24} [{start}, {end}) {kind} src={source:?} conf={conf:.2} limit={limit} events={events}",
            window.source.icon(),
            window.project,
            window.session_id,
            start = window.start_time,
            end = window.end_time,
            source = window.source,
            conf = window.confidence,
            limit = window.reached_limit,
            events = window.event_count,
        );
    }
    for rejection in &report.rejected {
        let _ = writeln!(
            out,
            "\u{2717} {:<24} [{start}, {end}) src={source:?} rejected, lost to {winner} ({winner_source:?})",
            rejection.project,
            start = rejection.start_time,
            end = rejection.end_time,
            source = rejection.source,
            winner = rejection.lost_to_session_id,
            winner_source = rejection.lost_to_source,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::DefaultPricingProvider;
    use std::fs;

    #[test]
    fn detect_report_over_empty_root_has_no_windows() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("projects");
        fs::create_dir_all(&root).unwrap();

        let pricing = DefaultPricingProvider::new();
        let report =
            run_detect_report(&root, state_dir.path(), &pricing, 100_000, 10).unwrap();
        assert!(report.windows.is_empty());
    }

    #[test]
    fn detect_report_surfaces_first_message_window() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let proj_dir = dir.path().join("projects").join("-proj-a");
        fs::create_dir_all(&proj_dir).unwrap();
        fs::write(
            proj_dir.join("conversation_1.jsonl"),
            r#"{"timestamp":"2024-01-01T12:00:00Z","model":"claude-sonnet-4","message":{"id":"m1","usage":{"input_tokens":100,"output_tokens":50}},"request_id":"r1"}
"#,
        )
        .unwrap();

        let pricing = DefaultPricingProvider::new();
        let report = run_detect_report(
            &dir.path().join("projects"),
            state_dir.path(),
            &pricing,
            2_000_000_000,
            10,
        )
        .unwrap();

        assert_eq!(report.windows.len(), 1);
        assert_eq!(report.windows[0].source, WindowSource::FirstMessage);
        assert_eq!(report.windows[0].project, "proj-a");
    }
}
