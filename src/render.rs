//! Minimal terminal renderer for the `top` live view. This is the one
//! external-collaborator surface the spec calls out as out of scope for the
//! core (§1 "the terminal UI renderer ... consumes aggregated snapshots");
//! what lives here is the thin consumer the CLI needs to actually show a
//! live view, grounded in the teacher's `display/tui.rs` terminal
//! setup/teardown and `display/widgets.rs` theming, not a full redesign of
//! either.

use crate::models::{Plan, SessionMetrics};
use crate::orchestrator::{translate_key, InputAction};
use crate::report::{format_predicted_end, status_line};
use crate::snapshot::{Snapshot, SnapshotHandle};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Project,
    Session,
    Tokens,
    Input,
    Output,
    Cost,
    Model,
}

impl SortKey {
    fn from_action(action: InputAction) -> Option<Self> {
        match action {
            InputAction::SortByProject => Some(SortKey::Project),
            InputAction::SortBySession => Some(SortKey::Session),
            InputAction::SortByTokens => Some(SortKey::Tokens),
            InputAction::SortByInput => Some(SortKey::Input),
            InputAction::SortByOutput => Some(SortKey::Output),
            InputAction::SortByCost => Some(SortKey::Cost),
            InputAction::SortByModel => Some(SortKey::Model),
            _ => None,
        }
    }
}

struct RenderTheme {
    primary: Style,
    accent: Style,
    success: Style,
    muted: Style,
}

impl Default for RenderTheme {
    fn default() -> Self {
        Self {
            primary: Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            accent: Style::default().fg(Color::Yellow),
            success: Style::default().fg(Color::Green),
            muted: Style::default().fg(Color::DarkGray),
        }
    }
}

/// Local, UI-cadence-only state: which column sorts the session table and
/// whether the help overlay is shown. Neither field is read by the data
/// cadence.
struct RenderState {
    sort: SortKey,
    show_help: bool,
    tz: Tz,
    time_format: String,
}

/// Runs the UI-render cadence: samples the latest [`Snapshot`] at
/// `ui_refresh_hz`, draws it, and dispatches keyboard input. Never blocks
/// the data cadence — it only ever reads the snapshot handle.
pub async fn run_ui_cadence(
    handle: Arc<SnapshotHandle>,
    token: CancellationToken,
    force_refresh: Arc<tokio::sync::Notify>,
    ui_refresh_hz: f64,
    plan: Plan,
    tz: Tz,
    time_format: String,
) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let mut state = RenderState {
        sort: SortKey::Cost,
        show_help: false,
        tz,
        time_format,
    };
    let theme = RenderTheme::default();
    let tick = Duration::from_secs_f64((1.0 / ui_refresh_hz.max(0.1)).min(10.0));

    let result = loop {
        if token.is_cancelled() {
            break Ok(());
        }

        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press {
                    if let Some(action) = translate_key(key.code) {
                        match action {
                            InputAction::Quit => {
                                token.cancel();
                                break Ok(());
                            }
                            InputAction::ToggleHelp => state.show_help = !state.show_help,
                            InputAction::ForceRefresh => force_refresh.notify_one(),
                            other => {
                                if let Some(sort) = SortKey::from_action(other) {
                                    state.sort = sort;
                                }
                            }
                        }
                    }
                }
            }
        }

        let snapshot = handle.latest();
        if let Err(e) = terminal.draw(|frame| draw(frame, snapshot.as_deref(), plan, &state, &theme)) {
            break Err(e).context("failed to draw live view");
        }

        tokio::time::sleep(tick).await;
    };

    cleanup_terminal(&mut terminal)?;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("failed to create terminal")
}

fn cleanup_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

fn draw(frame: &mut Frame, snapshot: Option<&Snapshot>, plan: Plan, state: &RenderState, theme: &RenderTheme) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(frame, chunks[0], snapshot, plan, state, theme);
    if state.show_help {
        render_help(frame, chunks[1], theme);
    } else {
        render_sessions(frame, chunks[1], snapshot, state, theme);
    }
    render_status(frame, chunks[2], snapshot, theme);
}

fn render_header(
    frame: &mut Frame,
    area: Rect,
    snapshot: Option<&Snapshot>,
    plan: Plan,
    state: &RenderState,
    theme: &RenderTheme,
) {
    let block = Block::default()
        .title("quota-monitor")
        .title_style(theme.primary)
        .borders(Borders::ALL);

    let text = match snapshot {
        Some(s) => {
            let predicted = format_predicted_end(s.metrics.predicted_end_time, state.tz, &state.time_format);
            format!(
                "{:?} plan | ${:.2}/${:.2} | {} tokens | {} active sessions | predicted exhaustion {}",
                plan,
                crate::aggregator::round_banker(s.metrics.total_cost, 2),
                s.metrics.plan_limits.cost_limit,
                s.metrics.total_tokens.total(),
                s.metrics.active_session_count,
                predicted,
            )
        }
        None => "waiting for first data cycle...".to_string(),
    };

    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(text, theme.success))).block(block),
        area,
    );
}

fn render_sessions(frame: &mut Frame, area: Rect, snapshot: Option<&Snapshot>, state: &RenderState, theme: &RenderTheme) {
    let block = Block::default()
        .title("sessions (p/s/t/i/o/c/m to sort, r refresh, h help, q quit)")
        .title_style(theme.primary)
        .borders(Borders::ALL);

    let Some(snapshot) = snapshot else {
        frame.render_widget(block, area);
        return;
    };

    let mut rows: Vec<&SessionMetrics> = snapshot.metrics.sessions.iter().collect();
    sort_sessions(&mut rows, state.sort);

    let header = Row::new(vec![
        Cell::from("project"),
        Cell::from("start"),
        Cell::from("tokens"),
        Cell::from("input"),
        Cell::from("output"),
        Cell::from("cost"),
        Cell::from("%plan"),
        Cell::from("src"),
    ])
    .style(theme.primary);

    let body: Vec<Row> = rows
        .iter()
        .map(|s| {
            Row::new(vec![
                Cell::from(s.project.clone()),
                Cell::from(crate::timefmt::format_time(s.start_time, state.tz, &state.time_format)),
                Cell::from(s.tokens.total().to_string()),
                Cell::from(s.tokens.input.to_string()),
                Cell::from(s.tokens.output.to_string()),
                Cell::from(format!("${:.2}", crate::aggregator::round_banker(s.cost, 2))),
                Cell::from(format!("{:.0}%", s.percent_tokens.max(s.percent_cost))),
                Cell::from(format!("{} {:?}", s.window_source.icon(), s.window_source)),
            ])
        })
        .collect();

    let table = Table::new(
        body,
        [
            Constraint::Percentage(20),
            Constraint::Percentage(16),
            Constraint::Percentage(10),
            Constraint::Percentage(10),
            Constraint::Percentage(10),
            Constraint::Percentage(10),
            Constraint::Percentage(8),
            Constraint::Percentage(16),
        ],
    )
    .header(header)
    .block(block);

    frame.render_widget(table, area);
}

fn render_help(frame: &mut Frame, area: Rect, theme: &RenderTheme) {
    let block = Block::default().title("help").title_style(theme.primary).borders(Borders::ALL);
    let text = "p project  s session  t tokens  i input  o output  c cost  m model\nr force refresh   h toggle this help   q / Esc / Ctrl-C quit";
    frame.render_widget(Paragraph::new(text).style(theme.muted).block(block), area);
}

fn render_status(frame: &mut Frame, area: Rect, snapshot: Option<&Snapshot>, theme: &RenderTheme) {
    let text = match snapshot {
        Some(s) => status_line(s.files_skipped, false).unwrap_or_else(|| "ok".to_string()),
        None => String::new(),
    };
    frame.render_widget(
        Paragraph::new(text).style(theme.muted).alignment(Alignment::Left),
        area,
    );
}

fn sort_sessions(rows: &mut [&SessionMetrics], sort: SortKey) {
    rows.sort_by(|a, b| match sort {
        SortKey::Project => a.project.cmp(&b.project),
        SortKey::Session => b.start_time.cmp(&a.start_time),
        SortKey::Tokens => b.tokens.total().cmp(&a.tokens.total()),
        SortKey::Input => b.tokens.input.cmp(&a.tokens.input),
        SortKey::Output => b.tokens.output.cmp(&a.tokens.output),
        SortKey::Cost => b.cost.partial_cmp(&a.cost).unwrap_or(std::cmp::Ordering::Equal),
        SortKey::Model => a
            .model_distribution
            .first()
            .map(|m| m.model.clone())
            .unwrap_or_default()
            .cmp(&b.model_distribution.first().map(|m| m.model.clone()).unwrap_or_default()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BurnRate, WindowSource};
    use crate::models::TokenCounts;

    fn session(project: &str, cost: f64, tokens: u64) -> SessionMetrics {
        SessionMetrics {
            session_id: format!("{project}:0"),
            project: project.to_string(),
            start_time: 0,
            end_time: 18000,
            window_source: WindowSource::FirstMessage,
            is_active: true,
            tokens: TokenCounts {
                input: tokens,
                output: 0,
                cache_read: 0,
                cache_create: 0,
            },
            cost,
            message_count: 1,
            model_distribution: vec![],
            burn_rate: BurnRate::default(),
            projected_tokens_at_end: tokens,
            projected_cost_at_end: cost,
            percent_tokens: 0.0,
            percent_cost: 0.0,
            percent_messages: 0.0,
        }
    }

    #[test]
    fn sorts_by_cost_descending() {
        let a = session("a", 1.0, 10);
        let b = session("b", 5.0, 10);
        let mut rows = vec![&a, &b];
        sort_sessions(&mut rows, SortKey::Cost);
        assert_eq!(rows[0].project, "b");
    }

    #[test]
    fn sorts_by_project_ascending() {
        let a = session("zeta", 1.0, 10);
        let b = session("alpha", 1.0, 10);
        let mut rows = vec![&a, &b];
        sort_sessions(&mut rows, SortKey::Project);
        assert_eq!(rows[0].project, "alpha");
    }

    #[test]
    fn sort_key_from_action_ignores_non_sort_actions() {
        assert_eq!(SortKey::from_action(InputAction::Quit), None);
        assert_eq!(SortKey::from_action(InputAction::SortByCost), Some(SortKey::Cost));
    }
}
