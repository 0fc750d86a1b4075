//! Timestamp parsing for journal lines, and display formatting for
//! reports/TUI (`--timezone`, `--time-format`).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse a producer timestamp string into epoch seconds (UTC).
///
/// Handles RFC3339 with a `Z` suffix, RFC3339 with an explicit offset, and a
/// naive `%Y-%m-%dT%H:%M:%S%.f` timestamp assumed to already be UTC.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<i64> {
    let normalized = if raw.ends_with('Z') {
        raw.replacen('Z', "+00:00", 1)
    } else {
        raw.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc).timestamp());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp());
    }

    anyhow::bail!("failed to parse timestamp: {raw}")
}

/// Round an epoch-seconds timestamp down to the start of its hour (UTC).
pub fn floor_to_hour(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(3600)
}

/// Resolve a `--timezone` flag value (`Local`, `auto`, or an IANA zone name)
/// to a concrete zone used for display only; all internal timestamps stay
/// UTC epoch seconds.
pub fn resolve_timezone(name: &str) -> anyhow::Result<Tz> {
    match name {
        "Local" | "auto" => Ok(local_timezone_guess()),
        other => other
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("unknown timezone `{other}`")),
    }
}

fn local_timezone_guess() -> Tz {
    std::env::var("TZ")
        .ok()
        .and_then(|tz| tz.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// Format an epoch-seconds timestamp for display in a given zone and clock
/// style (`12h` or `24h`).
pub fn format_time(timestamp: i64, tz: Tz, time_format: &str) -> String {
    let dt = tz.timestamp_opt(timestamp, 0).single().unwrap_or_else(|| {
        Utc.timestamp_opt(timestamp, 0)
            .single()
            .expect("valid epoch seconds")
            .with_timezone(&tz)
    });
    match time_format {
        "12h" => dt.format("%Y-%m-%d %I:%M:%S %p").to_string(),
        _ => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_z_suffix() {
        assert_eq!(
            parse_timestamp("2024-01-01T12:00:00.000Z").unwrap(),
            1704110400
        );
    }

    #[test]
    fn parses_explicit_offset() {
        assert!(parse_timestamp("2024-01-01T12:00:00.000+00:00").is_ok());
    }

    #[test]
    fn parses_naive_as_utc() {
        assert!(parse_timestamp("2024-01-01T12:00:00.000").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not-a-timestamp").is_err());
    }

    #[test]
    fn floors_to_hour_boundary() {
        let ts = parse_timestamp("2024-01-01T12:37:41Z").unwrap();
        let floored = floor_to_hour(ts);
        assert_eq!(floored % 3600, 0);
        assert!(floored <= ts);
        assert!(ts - floored < 3600);
    }

    #[test]
    fn resolves_named_timezone() {
        assert!(resolve_timezone("America/New_York").is_ok());
        assert!(resolve_timezone("Not/AZone").is_err());
    }
}
