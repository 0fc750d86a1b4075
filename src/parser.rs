//! Parses new journal bytes into normalized [`UsageEvent`]s.
//!
//! Journal lines are tolerated rather than trusted: each producer event is
//! read as a loose JSON value and fields are pulled out defensively, the way
//! the teacher's keeper-adapter field-mapping handled schema drift, but
//! without a dependency on an external schema crate. A malformed line is
//! logged and skipped; it never aborts the file.

use crate::models::{LimitIndicator, TokenCounts, UsageEvent};
use crate::pricing::PricingProvider;
use crate::timefmt::parse_timestamp;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ParseStats {
    pub lines_seen: usize,
    pub lines_skipped: usize,
    pub duplicates_skipped: usize,
}

pub struct LogParser;

impl LogParser {
    /// Parse `tail` (the new bytes appended since the last successful
    /// parse) into events, skipping stable ids already present in
    /// `known_ids` — the single dedup point.
    pub fn parse_tail(
        tail: &str,
        known_ids: &mut HashSet<String>,
        pricing: &dyn PricingProvider,
        stats: &mut ParseStats,
    ) -> Vec<UsageEvent> {
        let mut events = Vec::new();

        for line in tail.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            stats.lines_seen += 1;

            match parse_line(line, pricing) {
                Ok(Some(event)) => {
                    if known_ids.insert(event.id.clone()) {
                        events.push(event);
                    } else {
                        stats.duplicates_skipped += 1;
                    }
                }
                Ok(None) => {
                    // Line parsed but carried no usage data (e.g. a
                    // non-usage producer event); not an error.
                }
                Err(reason) => {
                    stats.lines_skipped += 1;
                    debug!(reason = %reason, line_preview = %preview(line), "skipping malformed journal line");
                }
            }
        }

        events
    }
}

fn preview(line: &str) -> String {
    line.chars().take(80).collect()
}

fn parse_line(line: &str, pricing: &dyn PricingProvider) -> Result<Option<UsageEvent>, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let timestamp_raw = find_str(&value, &["timestamp", "ts", "created_at"])
        .ok_or_else(|| "missing timestamp field".to_string())?;
    let timestamp = parse_timestamp(timestamp_raw).map_err(|e| e.to_string())?;

    let model = find_str(&value, &["model"])
        .or_else(|| find_nested_str(&value, "message", "model"))
        .unwrap_or("unknown")
        .to_string();

    let tokens = extract_tokens(&value);
    let message_id = find_str(&value, &["message_id"])
        .or_else(|| find_nested_str(&value, "message", "id"))
        .unwrap_or("");
    let request_id = find_str(&value, &["request_id", "requestId"]).unwrap_or("");

    let id = stable_id(message_id, request_id, line);

    let explicit_cost = find_f64(&value, &["cost_usd", "cost"]);
    let cost = explicit_cost.unwrap_or_else(|| pricing.calculate_cost(&model, &tokens));

    let limit_indicator = extract_limit_indicator(&value);

    if tokens.total() == 0 && limit_indicator.is_none() && explicit_cost.is_none() {
        return Ok(None);
    }

    Ok(Some(UsageEvent {
        id,
        timestamp,
        model,
        tokens,
        cost,
        limit_indicator,
    }))
}

/// The stable dedup key: a hash of message+request id when both are
/// present, else a content hash of the raw line.
fn stable_id(message_id: &str, request_id: &str, raw_line: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if !message_id.is_empty() && !request_id.is_empty() {
        "mr".hash(&mut hasher);
        message_id.hash(&mut hasher);
        request_id.hash(&mut hasher);
    } else {
        "content".hash(&mut hasher);
        raw_line.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

fn extract_tokens(value: &Value) -> TokenCounts {
    let usage = value
        .get("usage")
        .or_else(|| value.get("message").and_then(|m| m.get("usage")));

    let get_u64 = |obj: Option<&Value>, keys: &[&str]| -> u64 {
        obj.and_then(|o| keys.iter().find_map(|k| o.get(*k)))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    TokenCounts {
        input: get_u64(usage, &["input_tokens", "prompt_tokens"]),
        output: get_u64(usage, &["output_tokens", "completion_tokens"]),
        cache_read: get_u64(usage, &["cache_read_input_tokens", "cache_read_tokens"]),
        cache_create: get_u64(
            usage,
            &["cache_creation_input_tokens", "cache_creation_tokens"],
        ),
    }
}

fn extract_limit_indicator(value: &Value) -> Option<LimitIndicator> {
    let kind = find_str(value, &["limit_kind", "rate_limit_kind"])
        .or_else(|| find_nested_str(value, "limit", "kind"));
    let reset_at = find_i64(value, &["reset_at", "resetAt"])
        .or_else(|| find_nested_i64(value, "limit", "reset_at"));

    match (kind, reset_at) {
        (Some(kind), Some(reset_at)) => Some(LimitIndicator {
            raw_kind: kind.to_string(),
            reset_at: Some(reset_at),
        }),
        (None, Some(reset_at)) => Some(LimitIndicator {
            raw_kind: "session".to_string(),
            reset_at: Some(reset_at),
        }),
        _ => None,
    }
}

fn find_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k)).and_then(|v| v.as_str())
}

fn find_nested_str<'a>(value: &'a Value, parent: &str, key: &str) -> Option<&'a str> {
    value.get(parent).and_then(|p| p.get(key)).and_then(|v| v.as_str())
}

fn find_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| value.get(*k)).and_then(|v| v.as_f64())
}

fn find_i64(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| value.get(*k)).and_then(|v| v.as_i64())
}

fn find_nested_i64(value: &Value, parent: &str, key: &str) -> Option<i64> {
    value.get(parent).and_then(|p| p.get(key)).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::DefaultPricingProvider;

    fn pricing() -> DefaultPricingProvider {
        DefaultPricingProvider::new()
    }

    #[test]
    fn parses_a_well_formed_line() {
        let line = r#"{"timestamp":"2024-01-01T12:00:00Z","model":"claude-sonnet-4","message":{"id":"m1","usage":{"input_tokens":1000,"output_tokens":500}},"request_id":"r1"}"#;
        let mut known = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail(line, &mut known, &pricing(), &mut stats);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tokens.input, 1000);
        assert_eq!(events[0].tokens.output, 500);
        assert_eq!(stats.lines_seen, 1);
        assert_eq!(stats.lines_skipped, 0);
    }

    #[test]
    fn skips_malformed_lines_without_aborting() {
        let tail = "not json\n{\"timestamp\":\"2024-01-01T12:00:00Z\",\"model\":\"x\",\"usage\":{\"input_tokens\":1}}\n";
        let mut known = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail(tail, &mut known, &pricing(), &mut stats);
        assert_eq!(events.len(), 1);
        assert_eq!(stats.lines_skipped, 1);
    }

    #[test]
    fn deduplicates_by_stable_id() {
        let line = r#"{"timestamp":"2024-01-01T12:00:00Z","model":"x","message":{"id":"m1","usage":{"input_tokens":1}},"request_id":"r1"}"#;
        let tail = format!("{line}\n{line}\n");
        let mut known = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail(&tail, &mut known, &pricing(), &mut stats);
        assert_eq!(events.len(), 1);
        assert_eq!(stats.duplicates_skipped, 1);
    }

    #[test]
    fn extracts_limit_indicator() {
        let line = r#"{"timestamp":"2024-01-01T12:00:00Z","model":"x","reset_at":1700000000,"limit_kind":"opus"}"#;
        let mut known = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail(line, &mut known, &pricing(), &mut stats);
        assert_eq!(events.len(), 1);
        let indicator = events[0].limit_indicator.as_ref().unwrap();
        assert_eq!(indicator.raw_kind, "opus");
        assert_eq!(indicator.reset_at, Some(1700000000));
    }

    #[test]
    fn empty_file_yields_no_events_not_an_error() {
        let mut known = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail("", &mut known, &pricing(), &mut stats);
        assert!(events.is_empty());
    }
}
