//! Core Data Model
//!
//! These are the types that flow through the four-layer pipeline:
//! [`UsageEvent`] (LogParser output) -> [`Session`] (SessionDetector output) ->
//! [`AggregatedMetrics`] (Aggregator output) -> [`crate::snapshot::Snapshot`]
//! (Orchestrator output, consumed by the renderer).
//!
//! ## Data Flow
//!
//! 1. **Raw data**: [`UsageEvent`] - one normalized record per journal line
//! 2. **Grouping**: [`Session`] - a 5-hour quota window's worth of events
//! 3. **Persistence**: [`WindowRecord`] - a session's boundary, durable across runs
//! 4. **Roll-up**: [`AggregatedMetrics`] - per-session and cross-session totals

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A token-kind enum shared by pricing lookups and per-model stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Input,
    Output,
    CacheRead,
    CacheCreate,
}

impl TokenKind {
    pub const ALL: [TokenKind; 4] = [
        TokenKind::Input,
        TokenKind::Output,
        TokenKind::CacheRead,
        TokenKind::CacheCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Input => "input",
            TokenKind::Output => "output",
            TokenKind::CacheRead => "cache_read",
            TokenKind::CacheCreate => "cache_create",
        }
    }
}

/// Non-negative per-kind token counts for a single event or a roll-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_create: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_create
    }

    pub fn get(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Input => self.input,
            TokenKind::Output => self.output,
            TokenKind::CacheRead => self.cache_read,
            TokenKind::CacheCreate => self.cache_create,
        }
    }

    pub fn add_assign(&mut self, other: &TokenCounts) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_create += other.cache_create;
    }
}

impl std::ops::Add for TokenCounts {
    type Output = TokenCounts;
    fn add(mut self, rhs: TokenCounts) -> TokenCounts {
        self.add_assign(&rhs);
        self
    }
}

/// The kind of quota-exhaustion notice a producer event can carry.
///
/// Producers distinguish `opus`/`general`/`session` limit kinds, but their
/// downstream treatment is identical, so they're folded into one variant
/// here and the original kind is kept only for diagnostic display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitIndicator {
    pub raw_kind: String,
    pub reset_at: Option<i64>,
}

/// A single normalized usage record, produced by the LogParser.
///
/// `id` is the stable dedup key: a hash of the producer's message+request id
/// when present, or a content hash of the raw line otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub timestamp: i64,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub limit_indicator: Option<LimitIndicator>,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// Where a session's start boundary was inferred from, in strict precedence
/// order (highest first). `Ord`/`PartialOrd` follow declaration order so
/// `a > b` means `a` wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    RoundedHour,
    AccountLevelCarry,
    FirstMessage,
    Gap,
    LimitMessage,
}

impl WindowSource {
    pub fn confidence(&self) -> f64 {
        match self {
            WindowSource::LimitMessage => 1.0,
            WindowSource::Gap => 0.9,
            WindowSource::FirstMessage => 0.8,
            WindowSource::AccountLevelCarry => 0.7,
            WindowSource::RoundedHour => 0.5,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            WindowSource::LimitMessage => "\u{1F6D1}", // stop sign
            WindowSource::Gap => "\u{2026}",           // ellipsis
            WindowSource::FirstMessage => "\u{25B6}",  // play
            WindowSource::AccountLevelCarry => "\u{21AA}", // hook arrow
            WindowSource::RoundedHour => "\u{25CB}",   // circle
        }
    }
}

/// The fixed quota window length enforced on every non-gap session.
pub const SESSION_WINDOW_SECS: i64 = 5 * 3600;

/// A 5-hour quota window for one project, with its accrued events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project: String,
    pub start_time: i64,
    pub start_hour: i64,
    pub end_time: i64,
    pub window_start: Option<i64>,
    pub is_window_detected: bool,
    pub window_source: WindowSource,
    pub is_active: bool,
    pub is_gap: bool,
    pub reached_limit: bool,
    pub entries: Vec<UsageEvent>,
    pub per_model_tokens: HashMap<String, TokenCounts>,
    pub limit_messages: Vec<LimitIndicator>,
}

impl Session {
    pub fn new(project: &str, start_time: i64, source: WindowSource) -> Self {
        let start_hour = start_time - start_time.rem_euclid(3600);
        Self {
            id: format!("{project}:{start_time}"),
            project: project.to_string(),
            start_time,
            start_hour,
            end_time: start_time + SESSION_WINDOW_SECS,
            window_start: Some(start_time),
            is_window_detected: true,
            window_source: source,
            is_active: false,
            is_gap: false,
            reached_limit: false,
            entries: Vec::new(),
            per_model_tokens: HashMap::new(),
            limit_messages: Vec::new(),
        }
    }

    pub fn gap(project: &str, start_time: i64, end_time: i64) -> Self {
        Self {
            id: format!("{project}:gap:{start_time}"),
            project: project.to_string(),
            start_time,
            start_hour: start_time - start_time.rem_euclid(3600),
            end_time,
            window_start: None,
            is_window_detected: false,
            window_source: WindowSource::Gap,
            is_active: false,
            is_gap: true,
            reached_limit: false,
            entries: Vec::new(),
            per_model_tokens: HashMap::new(),
            limit_messages: Vec::new(),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start_time && timestamp < self.end_time
    }

    pub fn push_event(&mut self, event: UsageEvent) {
        self.per_model_tokens
            .entry(event.model.clone())
            .or_default()
            .add_assign(&event.tokens);
        if let Some(indicator) = &event.limit_indicator {
            self.limit_messages.push(indicator.clone());
        }
        self.entries.push(event);
    }

    pub fn total_tokens(&self) -> TokenCounts {
        let mut total = TokenCounts::default();
        for counts in self.per_model_tokens.values() {
            total.add_assign(counts);
        }
        total
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }
}

/// A candidate window discarded during conflict resolution because a
/// higher- (or equal-, earlier-) precedence window already claimed an
/// overlapping interval. Diagnostic only (`detect` subcommand); never
/// contributes to metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedWindow {
    pub project: String,
    pub start_time: i64,
    pub end_time: i64,
    pub source: WindowSource,
    pub lost_to_session_id: String,
    pub lost_to_source: WindowSource,
}

/// A persisted session-window boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRecord {
    pub start_time: i64,
    pub end_time: i64,
    pub source: WindowSource,
    pub reached_limit: bool,
    pub session_id: String,
    pub last_seen: i64,
}

/// Per-file cache key: the triple that determines whether a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub inode: u64,
    pub size: u64,
    pub mtime: i64,
}

/// One on-disk cache entry: this file's parsed events plus the identity they
/// were parsed under, so a later run can detect staleness without reparsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub identity: FileIdentity,
    pub parsed_events: Vec<UsageEvent>,
    /// Byte offset consumed so far; a future parse can resume from here
    /// rather than reparsing already-cached events, provided the file only
    /// grew (size increased, inode/mtime-before unchanged).
    pub bytes_consumed: u64,
}

/// Model distribution entry for display/report purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelShare {
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: f64,
}

/// Quota ceilings for a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanLimits {
    pub token_limit: u64,
    pub cost_limit: f64,
    pub message_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Pro,
    Max5,
    Max20,
    Custom,
}

impl Plan {
    pub fn default_limits(&self) -> PlanLimits {
        match self {
            Plan::Pro => PlanLimits {
                token_limit: 4_000_000,
                cost_limit: 18.0,
                message_limit: 40,
            },
            Plan::Max5 => PlanLimits {
                token_limit: 20_000_000,
                cost_limit: 35.0,
                message_limit: 200,
            },
            Plan::Max20 => PlanLimits {
                token_limit: 80_000_000,
                cost_limit: 140.0,
                message_limit: 800,
            },
            // Informational default; overridden by --custom-limit-tokens.
            // P90-of-observed-usage is informational only, never a silent
            // override of the configured ceiling.
            Plan::Custom => PlanLimits {
                token_limit: 20_000_000,
                cost_limit: 35.0,
                message_limit: 200,
            },
        }
    }
}

/// Which quota dimension is closest to (or past) its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingDimension {
    Tokens,
    Cost,
    Messages,
}

impl BindingDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingDimension::Tokens => "tokens",
            BindingDimension::Cost => "cost",
            BindingDimension::Messages => "messages",
        }
    }
}

/// Per-session burn-rate and projection figures.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BurnRate {
    pub cost_per_min: f64,
    pub tokens_per_min: f64,
}

impl BurnRate {
    /// NaN/Inf burn rates (zero elapsed time) are reported as zero.
    pub fn sanitized(cost_per_min: f64, tokens_per_min: f64) -> Self {
        Self {
            cost_per_min: if cost_per_min.is_finite() {
                cost_per_min
            } else {
                0.0
            },
            tokens_per_min: if tokens_per_min.is_finite() {
                tokens_per_min
            } else {
                0.0
            },
        }
    }
}

/// Per-session output the Aggregator produces, feeding both the Snapshot and
/// batch reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: String,
    pub project: String,
    pub start_time: i64,
    pub end_time: i64,
    pub window_source: WindowSource,
    pub is_active: bool,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub message_count: u64,
    pub model_distribution: Vec<ModelShare>,
    pub burn_rate: BurnRate,
    pub projected_tokens_at_end: u64,
    pub projected_cost_at_end: f64,
    pub percent_tokens: f64,
    pub percent_cost: f64,
    pub percent_messages: f64,
}

/// Cross-session roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_cost: f64,
    pub total_tokens: TokenCounts,
    pub total_messages: u64,
    pub active_session_count: usize,
    pub model_distribution: Vec<ModelShare>,
    pub average_burn_rate: BurnRate,
    pub current_burn_rate: BurnRate,
    pub predicted_end_time: Option<i64>,
    pub plan_limits: PlanLimits,
    pub limit_exceeded: Option<BindingDimension>,
    pub sessions: Vec<SessionMetrics>,
}
