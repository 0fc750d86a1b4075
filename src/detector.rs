//! Groups a project's event stream into non-overlapping 5-hour quota
//! windows, inferring each window's start boundary from the five detection
//! sources in strict precedence order.
//!
//! This is the hardest subsystem: the state machine below must stay
//! deterministic under reordering (events are pre-sorted by
//! `(timestamp, stable_id)`), must never let two non-gap sessions in the
//! same project overlap, and must let a `limit_message` retroactively
//! rewrite the window it falls in regardless of how that window started.

use crate::models::{
    RejectedWindow, Session, UsageEvent, WindowRecord, WindowSource, SESSION_WINDOW_SECS,
};
use crate::timefmt::floor_to_hour;
use std::collections::HashMap;

const GAP_THRESHOLD_SECS: i64 = 5 * 3600;

/// Per-project detection state carried between refresh cycles.
#[derive(Debug, Default)]
pub struct ProjectState {
    pub sessions: Vec<Session>,
    last_event_timestamp: Option<i64>,
}

#[derive(Default)]
pub struct SessionDetector {
    /// Account-level carry: the most recently opened window for any
    /// project, consulted when a different project's first event needs a
    /// start boundary and no higher-precedence signal applies.
    account_window: Option<(i64, i64)>, // (start, end)
    /// Candidates discarded by `resolve_overlaps` on the most recent
    /// `detect()` call, kept for diagnostic reporting (`detect`
    /// subcommand). Cleared at the start of each `detect()` call.
    last_rejections: Vec<RejectedWindow>,
}

impl SessionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run detection for one project given its full ordered event stream
    /// (already merged and sorted by `(timestamp, stable_id)` upstream) and
    /// any windows persisted from a previous run. Returns the project's
    /// sessions, including any synthetic gap sessions.
    pub fn detect(
        &mut self,
        project: &str,
        events: &[UsageEvent],
        history: &[WindowRecord],
        now: i64,
        data_refresh_interval_secs: i64,
    ) -> Vec<Session> {
        let mut sessions: Vec<Session> = Vec::new();
        let mut current: Option<Session> = None;

        for event in events {
            match &mut current {
                None => {
                    let source = self.choose_source(project, event.timestamp, history);
                    let mut session = self.open_session(project, event.timestamp, source);
                    self.apply_limit_if_present(&mut session, event);
                    session.push_event(event.clone());
                    current = Some(session);
                }
                Some(session) => {
                    if session.contains(event.timestamp) {
                        self.apply_limit_if_present(session, event);
                        session.push_event(event.clone());
                    } else {
                        let gap = event.timestamp - last_timestamp(session);
                        if gap >= GAP_THRESHOLD_SECS {
                            let finished = current.take().unwrap();
                            sessions.push(
                                Session::gap(project, finished.end_time, event.timestamp),
                            );
                            let source = WindowSource::Gap;
                            let mut next = Session::new(project, floor_to_hour(event.timestamp), source);
                            self.apply_limit_if_present(&mut next, event);
                            next.push_event(event.clone());
                            self.account_window = Some((next.start_time, next.end_time));
                            sessions.push(finished);
                            current = Some(next);
                        } else {
                            let finished = current.take().unwrap();
                            let source = self.choose_source(project, event.timestamp, history);
                            let mut next = self.open_session(project, event.timestamp, source);
                            self.apply_limit_if_present(&mut next, event);
                            next.push_event(event.clone());
                            sessions.push(finished);
                            current = Some(next);
                        }
                    }
                }
            }
        }

        if let Some(mut session) = current.take() {
            session.is_active =
                now >= session.start_time && now < session.end_time && (now - last_timestamp(&session)) <= data_refresh_interval_secs;
            sessions.push(session);
        }

        let (resolved, rejections) = resolve_overlaps(project, sessions);
        self.last_rejections = rejections;
        resolved
    }

    /// Candidates discarded by conflict resolution during the most recent
    /// `detect()` call, each with the session id and source that won the
    /// overlap instead.
    pub fn last_rejections(&self) -> &[RejectedWindow] {
        &self.last_rejections
    }

    fn open_session(&mut self, project: &str, event_ts: i64, source: WindowSource) -> Session {
        let start = match source {
            WindowSource::AccountLevelCarry => {
                self.account_window.map(|(s, _)| s).unwrap_or(floor_to_hour(event_ts))
            }
            _ => floor_to_hour(event_ts),
        };
        let session = Session::new(project, start, source);
        self.account_window = Some((session.start_time, session.end_time));
        session
    }

    /// Choose a detection source for a fresh window start, in precedence
    /// order: a limit_message is applied separately once the event is
    /// pushed, so here we choose among gap / first_message /
    /// account_level_carry / rounded_hour.
    fn choose_source(&self, _project: &str, event_ts: i64, history: &[WindowRecord]) -> WindowSource {
        let is_first_ever = history.is_empty() && self.account_window.is_none();
        if is_first_ever {
            return WindowSource::FirstMessage;
        }
        if let Some((start, end)) = self.account_window {
            if event_ts >= start && event_ts < end {
                return WindowSource::AccountLevelCarry;
            }
        }
        WindowSource::RoundedHour
    }

    /// A limit_message event rewrites the current window's boundary
    /// regardless of its current source — this is the one
    /// place precedence can retroactively change an already-open window.
    fn apply_limit_if_present(&mut self, session: &mut Session, event: &UsageEvent) {
        if let Some(indicator) = &event.limit_indicator {
            if let Some(reset_at) = indicator.reset_at {
                session.end_time = reset_at;
                session.start_time = reset_at - SESSION_WINDOW_SECS;
                session.start_hour = floor_to_hour(session.start_time);
                session.window_source = WindowSource::LimitMessage;
                session.window_start = Some(session.start_time);
                session.is_window_detected = true;
                session.reached_limit = true;
                self.account_window = Some((session.start_time, session.end_time));
            }
        }
    }
}

fn last_timestamp(session: &Session) -> i64 {
    session
        .entries
        .last()
        .map(|e| e.timestamp)
        .unwrap_or(session.start_time)
}

/// Conflict resolution: when two candidate windows in the same project
/// would overlap, the higher-precedence one wins and the lower is
/// discarded rather than merged; ties go to the earlier start. Returns the
/// surviving sessions plus every discarded candidate with the session id
/// and source it lost to, for diagnostic reporting.
fn resolve_overlaps(project: &str, mut sessions: Vec<Session>) -> (Vec<Session>, Vec<RejectedWindow>) {
    sessions.sort_by_key(|s| s.start_time);
    let mut result: Vec<Session> = Vec::with_capacity(sessions.len());
    let mut rejections = Vec::new();

    for session in sessions {
        if session.is_gap {
            result.push(session);
            continue;
        }
        let last_non_gap_index = result.iter().rposition(|s| !s.is_gap);
        if let Some(idx) = last_non_gap_index {
            let last = &result[idx];
            if session.start_time < last.end_time {
                let last_wins = last.window_source > session.window_source
                    || (last.window_source == session.window_source
                        && last.start_time <= session.start_time);
                if last_wins {
                    rejections.push(RejectedWindow {
                        project: project.to_string(),
                        start_time: session.start_time,
                        end_time: session.end_time,
                        source: session.window_source,
                        lost_to_session_id: last.id.clone(),
                        lost_to_source: last.window_source,
                    });
                    continue;
                }
                let displaced = result.remove(idx);
                rejections.push(RejectedWindow {
                    project: project.to_string(),
                    start_time: displaced.start_time,
                    end_time: displaced.end_time,
                    source: displaced.window_source,
                    lost_to_session_id: session.id.clone(),
                    lost_to_source: session.window_source,
                });
            }
        }
        result.push(session);
    }

    (result, rejections)
}

pub fn sessions_to_history(sessions: &[Session]) -> Vec<WindowRecord> {
    sessions
        .iter()
        .filter(|s| !s.is_gap)
        .map(|s| WindowRecord {
            start_time: s.start_time,
            end_time: s.end_time,
            source: s.window_source,
            reached_limit: s.reached_limit,
            session_id: s.id.clone(),
            last_seen: last_timestamp(s),
        })
        .collect()
}

/// Sort a per-account merged stream across projects by
/// `(timestamp, stable_id)` so detection is deterministic regardless of
/// file read order.
pub fn merge_and_sort(mut events: Vec<UsageEvent>) -> Vec<UsageEvent> {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    events
}

pub type ProjectStates = HashMap<String, ProjectState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LimitIndicator, TokenCounts};

    fn event(ts: i64, id: &str) -> UsageEvent {
        UsageEvent {
            id: id.to_string(),
            timestamp: ts,
            model: "claude-sonnet-4".to_string(),
            tokens: TokenCounts {
                input: 1000,
                output: 500,
                cache_read: 0,
                cache_create: 0,
            },
            cost: 0.0105,
            limit_indicator: None,
        }
    }

    #[test]
    fn single_session_first_message() {
        let mut detector = SessionDetector::new();
        let events = vec![
            event(0, "a"),
            event(1800, "b"),
            event(7200, "c"),
        ];
        let sessions = detector.detect("proj", &events, &[], 10_000, 10);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].window_source, WindowSource::FirstMessage);
        assert_eq!(sessions[0].start_time, 0);
        assert_eq!(sessions[0].entries.len(), 3);
    }

    #[test]
    fn gap_inserts_synthetic_session() {
        let mut detector = SessionDetector::new();
        let events = vec![event(0, "a"), event(6 * 3600, "b")];
        let sessions = detector.detect("proj", &events, &[], 100_000, 10);

        assert_eq!(sessions.len(), 3);
        assert!(sessions[1].is_gap);
        assert_eq!(sessions[2].window_source, WindowSource::Gap);
        assert_eq!(sessions[2].start_time, floor_to_hour(6 * 3600));
    }

    #[test]
    fn limit_message_overrides_rounded_hour() {
        let mut detector = SessionDetector::new();
        let ten_seven = 10 * 3600 + 7 * 60;
        let noon = 12 * 3600;
        let reset_at = 15 * 3600;

        let mut limit_event = event(noon, "limit");
        limit_event.limit_indicator = Some(LimitIndicator {
            raw_kind: "session".to_string(),
            reset_at: Some(reset_at),
        });

        let events = vec![event(ten_seven, "a"), limit_event];
        let sessions = detector.detect("proj", &events, &[], 20 * 3600, 10);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].window_source, WindowSource::LimitMessage);
        assert_eq!(sessions[0].start_time, 10 * 3600);
        assert_eq!(sessions[0].end_time, reset_at);
        assert!(sessions[0].reached_limit);
    }

    #[test]
    fn non_overlapping_sessions_in_same_project() {
        let mut detector = SessionDetector::new();
        let events = vec![
            event(0, "a"),
            event(4 * 3600, "b"),
            event(9 * 3600, "c"),
        ];
        let sessions = detector.detect("proj", &events, &[], 20 * 3600, 10);
        let non_gap: Vec<_> = sessions.iter().filter(|s| !s.is_gap).collect();
        for window in non_gap.windows(2) {
            assert!(window[0].end_time <= window[1].start_time);
        }
    }

    #[test]
    fn all_non_gap_sessions_span_exactly_five_hours() {
        let mut detector = SessionDetector::new();
        let events = vec![event(0, "a"), event(4 * 3600, "b")];
        let sessions = detector.detect("proj", &events, &[], 20 * 3600, 10);
        for session in sessions.iter().filter(|s| !s.is_gap) {
            assert_eq!(session.end_time - session.start_time, SESSION_WINDOW_SECS);
        }
    }

    #[test]
    fn deterministic_merge_sort_breaks_ties_by_stable_id() {
        let events = vec![event(0, "z"), event(0, "a")];
        let sorted = merge_and_sort(events);
        assert_eq!(sorted[0].id, "a");
        assert_eq!(sorted[1].id, "z");
    }

    #[test]
    fn overlap_with_a_limit_rewritten_window_is_recorded_as_rejected() {
        let mut detector = SessionDetector::new();
        // First event opens a first_message window [0, 18000).
        // Second event lands just after it closes, opening a fresh window
        // at its hour boundary (18000) — but carries a limit_message whose
        // reset_at rewrites that window backward to overlap the first one
        // entirely. The higher-precedence limit window should win and the
        // first_message window should be recorded as rejected.
        let mut limit_event = event(18_001, "b");
        limit_event.limit_indicator = Some(LimitIndicator {
            raw_kind: "session".to_string(),
            reset_at: Some(10_000),
        });
        let events = vec![event(0, "a"), limit_event];
        let sessions = detector.detect("proj", &events, &[], 100_000, 10);

        let non_gap: Vec<_> = sessions.iter().filter(|s| !s.is_gap).collect();
        assert_eq!(non_gap.len(), 1);
        assert_eq!(non_gap[0].window_source, WindowSource::LimitMessage);

        let rejections = detector.last_rejections();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].source, WindowSource::FirstMessage);
        assert_eq!(rejections[0].lost_to_source, WindowSource::LimitMessage);
    }

    #[test]
    fn rejections_are_cleared_between_detect_calls() {
        let mut detector = SessionDetector::new();
        let mut limit_event = event(18_001, "b");
        limit_event.limit_indicator = Some(LimitIndicator {
            raw_kind: "session".to_string(),
            reset_at: Some(10_000),
        });
        let events = vec![event(0, "a"), limit_event];
        detector.detect("proj", &events, &[], 100_000, 10);
        assert_eq!(detector.last_rejections().len(), 1);

        detector.detect("proj-b", &[event(0, "c")], &[], 1000, 10);
        assert!(detector.last_rejections().is_empty());
    }
}
