//! Rolls a project's sessions into per-session metrics, then rolls every
//! active session into the cross-session totals the Snapshot publishes.

use crate::models::{
    AggregatedMetrics, BindingDimension, BurnRate, ModelShare, PlanLimits, Session, SessionMetrics,
    TokenCounts,
};
use std::collections::HashMap;

/// Trailing window (minutes) over which the current burn rate is computed.
const BURN_RATE_WINDOW_MINUTES: i64 = 15;

pub struct Aggregator {
    burn_rate_window_minutes: i64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(BURN_RATE_WINDOW_MINUTES)
    }
}

impl Aggregator {
    pub fn new(burn_rate_window_minutes: i64) -> Self {
        Self {
            burn_rate_window_minutes,
        }
    }

    pub fn aggregate_session(&self, session: &Session, now: i64, limits: PlanLimits) -> SessionMetrics {
        let tokens = session.total_tokens();
        let cost = session.total_cost();
        let message_count = session.entries.len() as u64;

        let burn_rate = self.burn_rate(session, now);
        let elapsed = (now - session.start_time).max(0);
        let remaining = (session.end_time - now).max(0);

        let projected_tokens_at_end = if elapsed > 0 {
            tokens.total() + (burn_rate.tokens_per_min * (remaining as f64 / 60.0)) as u64
        } else {
            tokens.total()
        };
        let projected_cost_at_end = if elapsed > 0 {
            cost + burn_rate.cost_per_min * (remaining as f64 / 60.0)
        } else {
            cost
        };

        let model_distribution = model_distribution(session);

        SessionMetrics {
            session_id: session.id.clone(),
            project: session.project.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            window_source: session.window_source,
            is_active: session.is_active,
            tokens,
            cost,
            message_count,
            model_distribution,
            burn_rate,
            projected_tokens_at_end,
            projected_cost_at_end,
            percent_tokens: percent(tokens.total(), limits.token_limit),
            percent_cost: percent_f64(cost, limits.cost_limit),
            percent_messages: percent(message_count, limits.message_limit),
        }
    }

    /// The current burn rate, computed over the trailing
    /// `burn_rate_window_minutes` of the session. NaN/Inf (zero elapsed
    /// time in the window) is reported as zero.
    fn burn_rate(&self, session: &Session, now: i64) -> BurnRate {
        let window_start = now - self.burn_rate_window_minutes * 60;
        let in_window: Vec<_> = session
            .entries
            .iter()
            .filter(|e| e.timestamp >= window_start && e.timestamp <= now)
            .collect();

        if in_window.is_empty() {
            return BurnRate::default();
        }

        let earliest = in_window.iter().map(|e| e.timestamp).min().unwrap();
        let elapsed_minutes = (now - earliest) as f64 / 60.0;

        let window_cost: f64 = in_window.iter().map(|e| e.cost).sum();
        let window_tokens: u64 = in_window.iter().map(|e| e.total_tokens()).sum();

        BurnRate::sanitized(
            window_cost / elapsed_minutes,
            window_tokens as f64 / elapsed_minutes,
        )
    }

    /// Cross-session roll-up over every `is_active` session.
    pub fn aggregate_all(
        &self,
        per_session: &[SessionMetrics],
        now: i64,
        limits: PlanLimits,
    ) -> AggregatedMetrics {
        let active: Vec<&SessionMetrics> = per_session.iter().filter(|s| s.is_active).collect();

        let total_cost: f64 = active.iter().map(|s| s.cost).sum();
        let mut total_tokens = TokenCounts::default();
        for s in &active {
            total_tokens.add_assign(&s.tokens);
        }
        let total_messages: u64 = active.iter().map(|s| s.message_count).sum();

        let mut by_model: HashMap<String, (TokenCounts, f64)> = HashMap::new();
        for s in &active {
            for share in &s.model_distribution {
                let entry = by_model.entry(share.model.clone()).or_default();
                entry.0.add_assign(&share.tokens);
                entry.1 += share.cost;
            }
        }
        let mut model_distribution: Vec<ModelShare> = by_model
            .into_iter()
            .map(|(model, (tokens, cost))| ModelShare { model, tokens, cost })
            .collect();
        model_distribution.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap());

        let average_burn_rate = average_of(active.iter().map(|s| s.burn_rate));
        let current_burn_rate = active
            .iter()
            .map(|s| s.burn_rate)
            .reduce(|a, b| BurnRate {
                cost_per_min: a.cost_per_min + b.cost_per_min,
                tokens_per_min: a.tokens_per_min + b.tokens_per_min,
            })
            .unwrap_or_default();

        let limit_exceeded = binding_dimension(total_tokens.total(), total_cost, total_messages, limits);

        let predicted_end_time = predict_end_time(
            total_tokens.total(),
            total_cost,
            total_messages,
            limits,
            current_burn_rate,
            now,
            active.iter().map(|s| s.end_time).min(),
        );

        AggregatedMetrics {
            total_cost,
            total_tokens,
            total_messages,
            active_session_count: active.len(),
            model_distribution,
            average_burn_rate,
            current_burn_rate,
            predicted_end_time,
            plan_limits: limits,
            limit_exceeded,
            sessions: per_session.to_vec(),
        }
    }
}

fn model_distribution(session: &Session) -> Vec<ModelShare> {
    let mut shares: Vec<ModelShare> = session
        .per_model_tokens
        .iter()
        .map(|(model, tokens)| {
            let cost = session
                .entries
                .iter()
                .filter(|e| &e.model == model)
                .map(|e| e.cost)
                .sum();
            ModelShare {
                model: model.clone(),
                tokens: *tokens,
                cost,
            }
        })
        .collect();
    shares.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap());
    shares
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    (used as f64 / limit as f64) * 100.0
}

fn percent_f64(used: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return 0.0;
    }
    (used / limit) * 100.0
}

fn average_of(rates: impl Iterator<Item = BurnRate>) -> BurnRate {
    let mut count = 0u32;
    let mut cost_sum = 0.0;
    let mut tokens_sum = 0.0;
    for rate in rates {
        count += 1;
        cost_sum += rate.cost_per_min;
        tokens_sum += rate.tokens_per_min;
    }
    if count == 0 {
        return BurnRate::default();
    }
    BurnRate::sanitized(cost_sum / count as f64, tokens_sum / count as f64)
}

/// Which quota dimension is closest to (or past) exhaustion.
fn binding_dimension(
    tokens: u64,
    cost: f64,
    messages: u64,
    limits: PlanLimits,
) -> Option<BindingDimension> {
    let token_pct = percent(tokens, limits.token_limit);
    let cost_pct = percent_f64(cost, limits.cost_limit);
    let message_pct = percent(messages, limits.message_limit);

    let max_pct = token_pct.max(cost_pct).max(message_pct);
    if max_pct < 100.0 {
        return None;
    }
    if token_pct >= max_pct {
        Some(BindingDimension::Tokens)
    } else if cost_pct >= max_pct {
        Some(BindingDimension::Cost)
    } else {
        Some(BindingDimension::Messages)
    }
}

/// `predicted_end_time = min(session_end, now + (limit - used) / burn_rate)`
/// over the binding dimension.
fn predict_end_time(
    tokens: u64,
    cost: f64,
    messages: u64,
    limits: PlanLimits,
    burn_rate: BurnRate,
    now: i64,
    earliest_session_end: Option<i64>,
) -> Option<i64> {
    let token_pct = percent(tokens, limits.token_limit);
    let cost_pct = percent_f64(cost, limits.cost_limit);
    let message_pct = percent(messages, limits.message_limit);
    let max_pct = token_pct.max(cost_pct).max(message_pct);

    let seconds_to_limit = if token_pct >= cost_pct && token_pct >= message_pct {
        if burn_rate.tokens_per_min <= 0.0 {
            return earliest_session_end;
        }
        let remaining_tokens = (limits.token_limit as f64 - tokens as f64).max(0.0);
        (remaining_tokens / burn_rate.tokens_per_min) * 60.0
    } else if cost_pct >= message_pct {
        if burn_rate.cost_per_min <= 0.0 {
            return earliest_session_end;
        }
        let remaining_cost = (limits.cost_limit - cost).max(0.0);
        (remaining_cost / burn_rate.cost_per_min) * 60.0
    } else {
        return earliest_session_end;
    };

    let _ = max_pct;
    let projected = now + seconds_to_limit.round() as i64;
    match earliest_session_end {
        Some(session_end) => Some(projected.min(session_end)),
        None => Some(projected),
    }
}

/// Round-half-to-even to 2 decimal places, for displayed cost figures.
pub fn round_banker(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;

    let rounded = if (diff - 0.5).abs() < f64::EPSILON {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };

    rounded / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plan, TokenCounts, UsageEvent, WindowSource};

    fn event(ts: i64, tokens: TokenCounts, cost: f64) -> UsageEvent {
        UsageEvent {
            id: format!("e{ts}"),
            timestamp: ts,
            model: "claude-sonnet-4".to_string(),
            tokens,
            cost,
            limit_indicator: None,
        }
    }

    #[test]
    fn single_session_totals_match_scenario_one() {
        let mut session = Session::new("proj", 0, WindowSource::FirstMessage);
        for ts in [0, 1800, 7200] {
            session.push_event(event(
                ts,
                TokenCounts {
                    input: 1000,
                    output: 500,
                    cache_read: 0,
                    cache_create: 0,
                },
                0.0105,
            ));
        }
        let aggregator = Aggregator::default();
        let metrics = aggregator.aggregate_session(&session, 10_000, Plan::Max5.default_limits());
        assert_eq!(metrics.tokens.input, 3000);
        assert_eq!(metrics.tokens.output, 1500);
        assert!((metrics.cost - 0.0315).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_burn_rate_is_never_nan() {
        let session = Session::new("proj", 1000, WindowSource::FirstMessage);
        let aggregator = Aggregator::default();
        let metrics = aggregator.aggregate_session(&session, 1000, Plan::Max5.default_limits());
        assert!(metrics.burn_rate.cost_per_min.is_finite());
        assert!(metrics.burn_rate.tokens_per_min.is_finite());
        assert_eq!(metrics.burn_rate.cost_per_min, 0.0);
    }

    #[test]
    fn banker_rounding_rounds_half_to_even() {
        assert_eq!(round_banker(0.125, 2), 0.12);
        assert_eq!(round_banker(0.135, 2), 0.14);
        assert_eq!(round_banker(1.005, 2), 1.0);
    }

    #[test]
    fn binding_dimension_reports_tokens_when_tokens_exhausted_first() {
        let limits = PlanLimits {
            token_limit: 100,
            cost_limit: 1000.0,
            message_limit: 1000,
        };
        let result = binding_dimension(150, 10.0, 5, limits);
        assert_eq!(result, Some(BindingDimension::Tokens));
    }

    #[test]
    fn binding_dimension_is_none_under_all_limits() {
        let limits = PlanLimits {
            token_limit: 1000,
            cost_limit: 1000.0,
            message_limit: 1000,
        };
        assert_eq!(binding_dimension(10, 1.0, 1, limits), None);
    }
}
