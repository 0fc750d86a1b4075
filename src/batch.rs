//! Duration-filtered, group-by reporting over the same ingester and pricing
//! stack the live monitor uses, independent of session-window detection.

use crate::cache::FileCache;
use crate::error::{MonitorError, Result};
use crate::ingest::IncrementalIngester;
use crate::models::{ModelShare, TokenCounts, UsageEvent};
use crate::pricing::PricingProvider;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

/// `--duration <Nh|Nd|Nw|Nm|Ny>`, also accepting simple composites like
/// `2d12h` by summing each recognized suffix in turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationFilter {
    seconds: i64,
}

impl DurationFilter {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut seconds = 0i64;
        let mut digits = String::new();
        let mut matched_any = false;

        for ch in raw.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let value: i64 = digits
                .parse()
                .map_err(|_| MonitorError::ConfigError(format!("invalid --duration value: {raw}")))?;
            digits.clear();
            let unit_secs = match ch {
                'h' => 3600,
                'd' => 86_400,
                'w' => 7 * 86_400,
                'm' => 30 * 86_400,
                'y' => 365 * 86_400,
                _ => {
                    return Err(MonitorError::ConfigError(format!(
                        "unknown duration unit '{ch}' in --duration {raw}"
                    )))
                }
            };
            seconds += value * unit_secs;
            matched_any = true;
        }

        if !matched_any || !digits.is_empty() {
            return Err(MonitorError::ConfigError(format!(
                "malformed --duration value: {raw}"
            )));
        }

        Ok(Self { seconds })
    }

    pub fn cutoff(&self, now: i64) -> i64 {
        now - self.seconds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Hour,
    Day,
    Week,
    Month,
    Model,
    Project,
}

impl GroupBy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "hour" => Ok(GroupBy::Hour),
            "day" => Ok(GroupBy::Day),
            "week" => Ok(GroupBy::Week),
            "month" => Ok(GroupBy::Month),
            "model" => Ok(GroupBy::Model),
            "project" => Ok(GroupBy::Project),
            other => Err(MonitorError::ConfigError(format!(
                "unknown --group-by value: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GroupRow {
    pub key: String,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub message_count: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub total_cost: f64,
    pub total_tokens: TokenCounts,
    pub total_messages: u64,
    pub model_distribution: Vec<ModelShare>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchReport {
    pub groups: Vec<GroupRow>,
    pub summary: BatchSummary,
}

pub struct BatchAnalyzer {
    ingester: IncrementalIngester,
}

impl BatchAnalyzer {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            ingester: IncrementalIngester::new(root),
        }
    }

    pub fn run(
        &self,
        cache: &mut FileCache,
        pricing: &dyn PricingProvider,
        duration: Option<DurationFilter>,
        group_by: GroupBy,
        tz: Tz,
        now: i64,
    ) -> Result<BatchReport> {
        let (by_project, _report) = self.ingester.refresh(cache, pricing)?;
        let cutoff = duration.map(|d| d.cutoff(now));

        let mut groups: HashMap<String, GroupRow> = HashMap::new();
        let mut model_groups: HashMap<String, (TokenCounts, f64)> = HashMap::new();
        let mut total_tokens = TokenCounts::default();
        let mut total_cost = 0.0;
        let mut total_messages = 0u64;

        for (project, events) in &by_project {
            for event in events {
                if let Some(cutoff) = cutoff {
                    if event.timestamp < cutoff {
                        continue;
                    }
                }

                let key = group_key(group_by, project, event, tz);
                let row = groups.entry(key.clone()).or_insert_with(|| GroupRow {
                    key,
                    ..Default::default()
                });
                row.tokens.add_assign(&event.tokens);
                row.cost += event.cost;
                row.message_count += 1;

                let model_entry = model_groups.entry(event.model.clone()).or_default();
                model_entry.0.add_assign(&event.tokens);
                model_entry.1 += event.cost;

                total_tokens.add_assign(&event.tokens);
                total_cost += event.cost;
                total_messages += 1;
            }
        }

        let mut groups: Vec<GroupRow> = groups.into_values().collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));

        let mut model_distribution: Vec<ModelShare> = model_groups
            .into_iter()
            .map(|(model, (tokens, cost))| ModelShare { model, tokens, cost })
            .collect();
        model_distribution.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap());

        Ok(BatchReport {
            groups,
            summary: BatchSummary {
                total_cost,
                total_tokens,
                total_messages,
                model_distribution,
            },
        })
    }
}

fn group_key(group_by: GroupBy, project: &str, event: &UsageEvent, tz: Tz) -> String {
    match group_by {
        GroupBy::Model => event.model.clone(),
        GroupBy::Project => project.to_string(),
        GroupBy::Hour | GroupBy::Day | GroupBy::Week | GroupBy::Month => {
            let utc: DateTime<Utc> = Utc.timestamp_opt(event.timestamp, 0).single().unwrap_or_else(Utc::now);
            let local = utc.with_timezone(&tz);
            match group_by {
                GroupBy::Hour => local.format("%Y-%m-%d %H:00").to_string(),
                GroupBy::Day => local.format("%Y-%m-%d").to_string(),
                GroupBy::Week => {
                    let iso = local.iso_week();
                    format!("{}-W{:02}", iso.year(), iso.week())
                }
                GroupBy::Month => local.format("%Y-%m").to_string(),
                _ => unreachable!(),
            }
        }
    }
}
