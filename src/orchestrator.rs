//! Two-cadence scheduler: a data-refresh task re-runs the ingest -> detect ->
//! aggregate pipeline and publishes a fresh Snapshot; a UI-render task
//! samples the latest Snapshot and dispatches keyboard input. Neither
//! cadence blocks the other.

use crate::aggregator::Aggregator;
use crate::cache::FileCache;
use crate::config::Config;
use crate::detector::{sessions_to_history, SessionDetector};
use crate::error::{MonitorError, Result};
use crate::ingest::IncrementalIngester;
use crate::models::{AggregatedMetrics, ModelShare, Plan, PlanLimits, SessionMetrics, TokenCounts};
use crate::pricing::PricingProvider;
use crate::snapshot::{Snapshot, SnapshotHandle};
use crate::window_history::WindowHistoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Keyboard actions the UI cadence can hand to whatever is rendering.
/// `main.rs` interprets these against the live display's local sort state;
/// the orchestrator only needs to recognize `ForceRefresh` and `Quit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    SortByProject,
    SortBySession,
    SortByTokens,
    SortByInput,
    SortByOutput,
    SortByCost,
    SortByModel,
    ForceRefresh,
    ToggleHelp,
    Quit,
}

#[cfg(feature = "live")]
pub fn translate_key(code: crossterm::event::KeyCode) -> Option<InputAction> {
    use crossterm::event::KeyCode;
    match code {
        KeyCode::Char('p') => Some(InputAction::SortByProject),
        KeyCode::Char('s') => Some(InputAction::SortBySession),
        KeyCode::Char('t') => Some(InputAction::SortByTokens),
        KeyCode::Char('i') => Some(InputAction::SortByInput),
        KeyCode::Char('o') => Some(InputAction::SortByOutput),
        KeyCode::Char('c') => Some(InputAction::SortByCost),
        KeyCode::Char('m') => Some(InputAction::SortByModel),
        KeyCode::Char('r') => Some(InputAction::ForceRefresh),
        KeyCode::Char('h') => Some(InputAction::ToggleHelp),
        KeyCode::Char('q') | KeyCode::Esc => Some(InputAction::Quit),
        _ => None,
    }
}

pub struct Orchestrator {
    root: std::path::PathBuf,
    state_root: std::path::PathBuf,
    plan: Plan,
    limits: PlanLimits,
    data_refresh: Duration,
    token: CancellationToken,
    force_refresh: Arc<Notify>,
}

impl Orchestrator {
    /// `custom_token_limit` overrides the token ceiling for `Plan::Custom`
    /// (`--custom-limit-tokens`); ignored for the fixed plan tiers.
    pub fn new(
        config: &Config,
        plan: Plan,
        custom_token_limit: Option<u64>,
        token: CancellationToken,
    ) -> Self {
        let mut limits = plan.default_limits();
        if plan == Plan::Custom {
            if let Some(tokens) = custom_token_limit {
                limits.token_limit = tokens;
            }
        }
        Self {
            root: config.paths.journal_root.clone(),
            state_root: config.paths.state_root.clone(),
            plan,
            limits,
            data_refresh: Duration::from_secs_f64(config.live.data_refresh_interval_secs.max(0.1)),
            token,
            force_refresh: Arc::new(Notify::new()),
        }
    }

    /// Shared handle the UI cadence notifies to request an immediate data
    /// cycle (`r` keybinding), bypassing the regular interval tick.
    pub fn force_refresh_handle(&self) -> Arc<Notify> {
        self.force_refresh.clone()
    }

    /// Run the data-refresh cadence until cancelled, publishing a fresh
    /// Snapshot after each cycle. On cancel, finishes (or aborts) the
    /// in-flight cycle, persists WindowHistory, then returns.
    pub async fn run_data_cadence(
        &self,
        handle: Arc<SnapshotHandle>,
        pricing: Arc<dyn PricingProvider>,
    ) -> Result<()> {
        let mut cache = FileCache::new(self.state_root.join("cache"));
        cache.load()?;
        let mut history = WindowHistoryStore::new(self.state_root.join("history"));
        let now = current_unix_time();
        if let Err(e) = history.load(now) {
            warn!(error = %e, "window history corrupt, starting fresh");
        }

        let ingester = IncrementalIngester::new(&self.root);
        let mut detector = SessionDetector::new();
        let aggregator = Aggregator::default();
        let limits = self.limits;

        let mut interval = tokio::time::interval(self.data_refresh);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!("data cadence shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if self.token.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.run_one_cycle(
                        &ingester, &mut cache, &mut history, &mut detector,
                        &aggregator, pricing.as_ref(), limits, &handle,
                    ) {
                        warn!(error = %e, "data cycle failed, will retry next tick");
                    }
                }
                _ = self.force_refresh.notified() => {
                    if self.token.is_cancelled() {
                        break;
                    }
                    interval.reset();
                    if let Err(e) = self.run_one_cycle(
                        &ingester, &mut cache, &mut history, &mut detector,
                        &aggregator, pricing.as_ref(), limits, &handle,
                    ) {
                        warn!(error = %e, "forced data cycle failed, will retry next tick");
                    }
                }
            }
        }

        history.merge_and_flush(Vec::new(), current_unix_time())?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one_cycle(
        &self,
        ingester: &IncrementalIngester,
        cache: &mut FileCache,
        history: &mut WindowHistoryStore,
        detector: &mut SessionDetector,
        aggregator: &Aggregator,
        pricing: &dyn PricingProvider,
        limits: crate::models::PlanLimits,
        handle: &SnapshotHandle,
    ) -> Result<()> {
        let now = current_unix_time();
        let (by_project, report) = ingester.refresh(cache, pricing)?;

        let mut per_session: Vec<SessionMetrics> = Vec::new();
        let mut fresh_history = Vec::new();

        for (project, events) in &by_project {
            let existing = history.records_for(project);
            let existing: Vec<_> = existing.into_iter().cloned().collect();
            let sessions = detector.detect(
                project,
                events,
                &existing,
                now,
                self.data_refresh.as_secs() as i64,
            );
            fresh_history.extend(sessions_to_history(&sessions));
            for session in &sessions {
                if session.is_gap {
                    continue;
                }
                per_session.push(aggregator.aggregate_session(session, now, limits));
            }
        }

        history.merge_and_flush(fresh_history, now)?;

        let metrics = aggregator.aggregate_all(&per_session, now, limits);
        handle.publish(Snapshot {
            generated_at: now,
            plan: self.plan,
            metrics,
            files_scanned: report.files_scanned,
            files_skipped: report.files_skipped,
        });

        Ok(())
    }
}

/// Pure roll-up used when no sessions exist yet, so the first Snapshot
/// (published before the first data cycle completes) still has a legal
/// shape rather than requiring callers to special-case `None`.
pub fn empty_metrics(limits: crate::models::PlanLimits) -> AggregatedMetrics {
    AggregatedMetrics {
        total_cost: 0.0,
        total_tokens: TokenCounts::default(),
        total_messages: 0,
        active_session_count: 0,
        model_distribution: Vec::<ModelShare>::new(),
        average_burn_rate: Default::default(),
        current_burn_rate: Default::default(),
        predicted_end_time: None,
        plan_limits: limits,
        limit_exceeded: None,
        sessions: Vec::new(),
    }
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Root error used by `main.rs` to decide the process exit code: `ConfigError`
/// and `RootUnreadable` abort the run, everything else degrades the cycle.
pub fn is_fatal_startup_error(err: &MonitorError) -> bool {
    err.is_fatal()
}

#[cfg(all(test, feature = "live"))]
mod key_tests {
    use super::*;
    use crossterm::event::KeyCode;

    #[test]
    fn translates_sort_keys() {
        assert_eq!(translate_key(KeyCode::Char('p')), Some(InputAction::SortByProject));
        assert_eq!(translate_key(KeyCode::Char('c')), Some(InputAction::SortByCost));
    }

    #[test]
    fn translates_quit_keys() {
        assert_eq!(translate_key(KeyCode::Char('q')), Some(InputAction::Quit));
        assert_eq!(translate_key(KeyCode::Esc), Some(InputAction::Quit));
    }

    #[test]
    fn unmapped_key_is_ignored() {
        assert_eq!(translate_key(KeyCode::Char('z')), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metrics_has_no_binding_dimension() {
        let limits = Plan::Pro.default_limits();
        let metrics = empty_metrics(limits);
        assert_eq!(metrics.limit_exceeded, None);
        assert_eq!(metrics.active_session_count, 0);
    }
}
