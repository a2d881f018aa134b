use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static DURATION_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<value>\d+)\s*(?P<unit>ms|s|m|h|d|w)$").expect("valid duration regex")
});

/// Parses a human duration such as `500ms`, `30s`, `15m`, `24h`, `7d` or `1w`.
///
/// `m` is minutes.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim().to_ascii_lowercase();
    let caps = DURATION_STRING.captures(&trimmed).ok_or_else(|| {
        anyhow!(
            "Invalid duration '{}'. Use a number followed by ms, s, m, h, d or w (e.g. 30m, 24h, 7d)",
            input
        )
    })?;
    let value: u64 = caps["value"]
        .parse()
        .with_context(|| format!("Duration value out of range: {}", input))?;
    let millis = match &caps["unit"] {
        "ms" => Some(value),
        "s" => value.checked_mul(1_000),
        "m" => value.checked_mul(60_000),
        "h" => value.checked_mul(3_600_000),
        "d" => value.checked_mul(86_400_000),
        "w" => value.checked_mul(604_800_000),
        unit => return Err(anyhow!("Unknown duration unit: {}", unit)),
    }
    .ok_or_else(|| anyhow!("Duration too large: {}", input))?;
    Ok(Duration::from_millis(millis))
}

/// Parses `now`, an RFC 3339 instant, or a relative duration meaning "that long before `now`".
pub fn parse_instant(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }
    let ago = parse_duration(trimmed).map_err(|_| {
        anyhow!(
            "Invalid time '{}'. Use 'now', an RFC 3339 timestamp or a relative duration like 24h",
            input
        )
    })?;
    let ago = chrono::Duration::from_std(ago).context("Relative time too large")?;
    now.checked_sub_signed(ago)
        .ok_or_else(|| anyhow!("Relative time '{}' is out of range", input))
}

/// Parses an RFC 3339 timestamp, treating a missing offset as UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|_| anyhow!("Invalid timestamp '{}'. Use RFC 3339, e.g. 2024-01-15T10:00:00Z", input))
}

/// Turns a function name or ARN into something usable as a file name.
pub fn fs_safe_name(function: &str) -> String {
    let name = function
        .strip_prefix("arn:")
        .and_then(|arn| arn.split(":function:").nth(1))
        .unwrap_or(function);
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "function".to_string()
    } else {
        cleaned
    }
}

pub fn format_millis(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.3}ms", ms)
    } else if ms < 10.0 {
        format!("{:.2}ms", ms)
    } else if ms < 1000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

pub fn format_megabytes(mb: f64) -> String {
    format!("{:.0}MB", mb)
}

pub fn format_percentage(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Shortens long names from the left, keeping the distinctive tail.
pub fn truncate_name(name: &str, max: usize) -> String {
    let count = name.chars().count();
    if count <= max || max <= 3 {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}
