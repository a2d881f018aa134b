//! Parsing of Lambda platform `REPORT` records into [`InvocationRecord`]s.
//!
//! Two shapes are accepted:
//! - the plain-text line written by the default log format:
//!   `REPORT RequestId: abc Duration: 45.67 ms Billed Duration: 46 ms Memory Size: 512 MB
//!   Max Memory Used: 128 MB Init Duration: 234.56 ms`
//! - the `platform.report` JSON record written when the function uses the JSON log format.
//!
//! Numbers are normalized to milliseconds and megabytes regardless of the unit they carry.

use crate::types::{InvocationRecord, LogEvent};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

static REPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bREPORT\s+RequestId:").expect("valid REPORT regex"));

// Longer keys come first so "Billed Duration" is never read as "Duration".
static REPORT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<key>RequestId|Billed Duration|Max Memory Used|Memory Size|Init Duration|Restore Duration|Duration):[ \t]*(?P<value>\S+)(?:[ \t]+(?P<unit>ms|us|µs|s|MB|GB|KB)\b)?",
    )
    .expect("valid REPORT field regex")
});

static NUMBER_WITH_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<number>[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)(?P<suffix>\S*)$")
        .expect("valid number regex")
});

const KEY_REQUEST_ID: &str = "RequestId";
const KEY_DURATION: &str = "Duration";
const KEY_BILLED_DURATION: &str = "Billed Duration";
const KEY_MEMORY_SIZE: &str = "Memory Size";
const KEY_MEMORY_USED: &str = "Max Memory Used";
const KEY_INIT_DURATION: &str = "Init Duration";
const KEY_RESTORE_DURATION: &str = "Restore Duration";

/// Why a line could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailureReason {
    #[error("line is not a platform report")]
    UnrecognizedShape,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' has non-numeric value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field '{field}' has unknown unit '{unit}'")]
    UnknownUnit { field: &'static str, unit: String },
    #[error("field '{field}' is negative ({value})")]
    NegativeValue { field: &'static str, value: f64 },
    #[error("malformed JSON report: {0}")]
    InvalidJson(String),
}

impl ParseFailureReason {
    /// Stable reason code, used when tallying skipped lines.
    pub fn code(&self) -> &'static str {
        match self {
            ParseFailureReason::UnrecognizedShape => "unrecognized_shape",
            ParseFailureReason::MissingField(_) => "missing_field",
            ParseFailureReason::InvalidNumber { .. } => "invalid_number",
            ParseFailureReason::UnknownUnit { .. } => "unknown_unit",
            ParseFailureReason::NegativeValue { .. } => "negative_value",
            ParseFailureReason::InvalidJson(_) => "invalid_json",
        }
    }
}

/// A line that failed to parse, together with the reason.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct ParseFailure {
    pub line: String,
    pub reason: ParseFailureReason,
}

impl ParseFailure {
    fn new(line: &str, reason: ParseFailureReason) -> Self {
        Self {
            line: line.to_string(),
            reason,
        }
    }
}

/// Result of parsing a batch of log events. Every input event ends up in exactly one list.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<InvocationRecord>,
    pub failures: Vec<ParseFailure>,
}

impl ParseOutcome {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of failures per reason code.
    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.reason.code()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Copy)]
enum UnitKind {
    Time,
    Memory,
}

#[derive(Debug, Deserialize)]
struct PlatformReport {
    time: Option<String>,
    #[serde(rename = "type")]
    report_type: String,
    record: Option<PlatformReportRecord>,
}

#[derive(Debug, Deserialize)]
struct PlatformReportRecord {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    metrics: Option<PlatformReportMetrics>,
}

#[derive(Debug, Deserialize)]
struct PlatformReportMetrics {
    #[serde(rename = "durationMs")]
    duration_ms: Option<f64>,
    #[serde(rename = "billedDurationMs")]
    billed_duration_ms: Option<f64>,
    #[serde(rename = "memorySizeMB")]
    memory_size_mb: Option<f64>,
    #[serde(rename = "maxMemoryUsedMB")]
    max_memory_used_mb: Option<f64>,
    #[serde(rename = "initDurationMs")]
    init_duration_ms: Option<f64>,
    #[serde(rename = "restoreDurationMs")]
    restore_duration_ms: Option<f64>,
}

/// Stateless parser for platform report lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordParser;

impl RecordParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses one line. `timestamp` is the log event time; JSON records carrying
    /// their own `time` use that instead.
    pub fn parse(
        &self,
        line: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<InvocationRecord, ParseFailure> {
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            parse_json_report(trimmed, timestamp).map_err(|reason| ParseFailure::new(line, reason))
        } else {
            parse_text_report(trimmed, timestamp).map_err(|reason| ParseFailure::new(line, reason))
        }
    }

    /// Parses every event, keeping failures so callers can report how many lines were skipped.
    pub fn parse_batch<'a, I>(&self, events: I) -> ParseOutcome
    where
        I: IntoIterator<Item = &'a LogEvent>,
    {
        let mut outcome = ParseOutcome::default();
        for event in events {
            match self.parse(&event.message, event.timestamp) {
                Ok(record) => outcome.records.push(record),
                Err(failure) => {
                    tracing::debug!(
                        reason = failure.reason.code(),
                        error = %failure,
                        "Skipping malformed report line"
                    );
                    outcome.failures.push(failure);
                }
            }
        }
        outcome
    }

    /// Finds and parses the last report in a multi-line log tail, such as the one
    /// returned by a synchronous invoke. `None` when the tail holds no report.
    pub fn parse_log_tail(
        &self,
        tail: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Result<InvocationRecord, ParseFailure>> {
        tail.lines()
            .rev()
            .find(|line| REPORT_LINE.is_match(line) || line.contains("\"platform.report\""))
            .map(|line| self.parse(line, timestamp))
    }
}

fn parse_text_report(
    line: &str,
    timestamp: DateTime<Utc>,
) -> Result<InvocationRecord, ParseFailureReason> {
    if !REPORT_LINE.is_match(line) {
        return Err(ParseFailureReason::UnrecognizedShape);
    }

    let mut fields: BTreeMap<&'static str, (&str, Option<&str>)> = BTreeMap::new();
    for caps in REPORT_FIELD.captures_iter(line) {
        let key = match &caps["key"] {
            KEY_REQUEST_ID => KEY_REQUEST_ID,
            KEY_DURATION => KEY_DURATION,
            KEY_BILLED_DURATION => KEY_BILLED_DURATION,
            KEY_MEMORY_SIZE => KEY_MEMORY_SIZE,
            KEY_MEMORY_USED => KEY_MEMORY_USED,
            KEY_INIT_DURATION => KEY_INIT_DURATION,
            KEY_RESTORE_DURATION => KEY_RESTORE_DURATION,
            _ => continue,
        };
        let value = caps.name("value").map(|m| m.as_str()).unwrap_or_default();
        let unit = caps.name("unit").map(|m| m.as_str());
        fields.entry(key).or_insert((value, unit));
    }

    let request_id = fields
        .get(KEY_REQUEST_ID)
        .map(|(value, _)| value.to_string())
        .ok_or(ParseFailureReason::MissingField(KEY_REQUEST_ID))?;

    let required = |key: &'static str, kind: UnitKind| -> Result<f64, ParseFailureReason> {
        let (value, unit) = fields
            .get(key)
            .ok_or(ParseFailureReason::MissingField(key))?;
        parse_quantity(key, value, *unit, kind)
    };
    let optional = |key: &'static str| -> Result<Option<f64>, ParseFailureReason> {
        fields
            .get(key)
            .map(|(value, unit)| parse_quantity(key, value, *unit, UnitKind::Time))
            .transpose()
    };

    build_record(
        request_id,
        timestamp,
        required(KEY_DURATION, UnitKind::Time)?,
        required(KEY_BILLED_DURATION, UnitKind::Time)?,
        required(KEY_MEMORY_SIZE, UnitKind::Memory)?,
        required(KEY_MEMORY_USED, UnitKind::Memory)?,
        optional(KEY_INIT_DURATION)?,
        optional(KEY_RESTORE_DURATION)?,
    )
}

fn parse_json_report(
    line: &str,
    fallback_timestamp: DateTime<Utc>,
) -> Result<InvocationRecord, ParseFailureReason> {
    let report: PlatformReport = serde_json::from_str(line)
        .map_err(|e| ParseFailureReason::InvalidJson(e.to_string()))?;
    if report.report_type != "platform.report" {
        return Err(ParseFailureReason::UnrecognizedShape);
    }
    let record = report
        .record
        .ok_or(ParseFailureReason::MissingField("record"))?;
    let metrics = record
        .metrics
        .ok_or(ParseFailureReason::MissingField("metrics"))?;
    let request_id = record
        .request_id
        .ok_or(ParseFailureReason::MissingField(KEY_REQUEST_ID))?;

    let timestamp = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fallback_timestamp);

    build_record(
        request_id,
        timestamp,
        metrics
            .duration_ms
            .ok_or(ParseFailureReason::MissingField(KEY_DURATION))?,
        metrics
            .billed_duration_ms
            .ok_or(ParseFailureReason::MissingField(KEY_BILLED_DURATION))?,
        metrics
            .memory_size_mb
            .ok_or(ParseFailureReason::MissingField(KEY_MEMORY_SIZE))?,
        metrics
            .max_memory_used_mb
            .ok_or(ParseFailureReason::MissingField(KEY_MEMORY_USED))?,
        metrics.init_duration_ms,
        metrics.restore_duration_ms,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    request_id: String,
    timestamp: DateTime<Utc>,
    duration_ms: f64,
    billed_duration_ms: f64,
    memory_size_mb: f64,
    memory_used_mb: f64,
    init_duration_ms: Option<f64>,
    restore_duration_ms: Option<f64>,
) -> Result<InvocationRecord, ParseFailureReason> {
    let checks = [
        (KEY_DURATION, Some(duration_ms)),
        (KEY_BILLED_DURATION, Some(billed_duration_ms)),
        (KEY_MEMORY_SIZE, Some(memory_size_mb)),
        (KEY_MEMORY_USED, Some(memory_used_mb)),
        (KEY_INIT_DURATION, init_duration_ms),
        (KEY_RESTORE_DURATION, restore_duration_ms),
    ];
    for (field, value) in checks {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(ParseFailureReason::InvalidNumber {
                    field,
                    value: value.to_string(),
                });
            }
            if value < 0.0 {
                return Err(ParseFailureReason::NegativeValue { field, value });
            }
        }
    }

    if memory_size_mb.fract() != 0.0 || memory_size_mb > f64::from(u32::MAX) {
        return Err(ParseFailureReason::InvalidNumber {
            field: KEY_MEMORY_SIZE,
            value: memory_size_mb.to_string(),
        });
    }
    let memory_configured_mb = memory_size_mb as u32;

    if memory_used_mb > memory_size_mb {
        tracing::warn!(
            request_id = %request_id,
            memory_used_mb,
            memory_configured_mb,
            "Report shows more memory used than configured"
        );
    }

    Ok(InvocationRecord {
        request_id,
        timestamp,
        duration_ms,
        billed_duration_ms,
        memory_configured_mb,
        memory_used_mb,
        init_duration_ms,
        restore_duration_ms,
    })
}

fn parse_quantity(
    field: &'static str,
    raw: &str,
    unit: Option<&str>,
    kind: UnitKind,
) -> Result<f64, ParseFailureReason> {
    let invalid = || ParseFailureReason::InvalidNumber {
        field,
        value: raw.to_string(),
    };
    let caps = NUMBER_WITH_SUFFIX.captures(raw).ok_or_else(invalid)?;
    let number: f64 = caps["number"].parse().map_err(|_| invalid())?;
    let suffix = &caps["suffix"];

    let unit = match (unit, suffix.is_empty()) {
        (Some(unit), true) => unit,
        (None, false) => suffix,
        (None, true) => return Ok(number),
        (Some(_), false) => return Err(invalid()),
    };

    let factor = match (kind, unit) {
        (UnitKind::Time, "ms") => 1.0,
        (UnitKind::Time, "s") => 1000.0,
        (UnitKind::Time, "us") | (UnitKind::Time, "µs") => 0.001,
        (UnitKind::Memory, "MB") => 1.0,
        (UnitKind::Memory, "GB") => 1024.0,
        (UnitKind::Memory, "KB") => 1.0 / 1024.0,
        _ => {
            return Err(ParseFailureReason::UnknownUnit {
                field,
                unit: unit.to_string(),
            })
        }
    };
    Ok(number * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPSILON: f64 = 1e-9;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn parse(line: &str) -> Result<InvocationRecord, ParseFailure> {
        RecordParser::new().parse(line, ts())
    }

    #[test]
    fn test_parse_warm_report_line() {
        let line = "REPORT RequestId: 3f1c8a2e-0001 Duration: 45.67 ms\tBilled Duration: 46 ms\tMemory Size: 512 MB\tMax Memory Used: 128 MB\t";
        let record = parse(line).unwrap();
        assert_eq!(record.request_id, "3f1c8a2e-0001");
        assert_eq!(record.timestamp, ts());
        assert!((record.duration_ms - 45.67).abs() < EPSILON);
        assert!((record.billed_duration_ms - 46.0).abs() < EPSILON);
        assert_eq!(record.memory_configured_mb, 512);
        assert!((record.memory_used_mb - 128.0).abs() < EPSILON);
        assert_eq!(record.init_duration_ms, None);
        assert_eq!(record.restore_duration_ms, None);
    }

    #[test]
    fn test_parse_cold_start_report_line() {
        let line = "REPORT RequestId: abc-123 Duration: 102.30 ms Billed Duration: 103 ms Memory Size: 128 MB Max Memory Used: 70 MB Init Duration: 234.56 ms";
        let record = parse(line).unwrap();
        assert!(record.is_cold_start());
        assert!((record.init_duration_ms.unwrap() - 234.56).abs() < EPSILON);
        assert!((record.duration_ms - 102.30).abs() < EPSILON);
    }

    #[test]
    fn test_parse_restore_report_line_with_xray_suffix() {
        let line = "REPORT RequestId: snap-1 Duration: 12.00 ms Billed Duration: 310 ms Memory Size: 1024 MB Max Memory Used: 150 MB Restore Duration: 297.85 ms XRAY TraceId: 1-65a4 SegmentId: 7b3 Sampled: true";
        let record = parse(line).unwrap();
        assert!(record.is_snapstart_restore());
        assert!(!record.is_cold_start());
        assert!((record.restore_duration_ms.unwrap() - 297.85).abs() < EPSILON);
    }

    #[test]
    fn test_units_are_normalized() {
        let line = "REPORT RequestId: u-1 Duration: 1.5 s Billed Duration: 1500ms Memory Size: 1 GB Max Memory Used: 512 MB Init Duration: 250000 us";
        let record = parse(line).unwrap();
        assert!((record.duration_ms - 1500.0).abs() < EPSILON);
        assert!((record.billed_duration_ms - 1500.0).abs() < EPSILON);
        assert_eq!(record.memory_configured_mb, 1024);
        assert!((record.init_duration_ms.unwrap() - 250.0).abs() < EPSILON);
    }

    #[test]
    fn test_numeric_fields_survive_reserialization() {
        let cases = [(0.0, 1.0, 128, 1.0), (45.67, 46.0, 512, 128.0), (9999.99, 10000.0, 10240, 4096.0)];
        for (duration, billed, memory, used) in cases {
            let line = format!(
                "REPORT RequestId: r Duration: {:.2} ms Billed Duration: {} ms Memory Size: {} MB Max Memory Used: {} MB",
                duration, billed, memory, used
            );
            let record = parse(&line).unwrap();
            assert!((record.duration_ms - duration).abs() < EPSILON, "{}", line);
            assert!((record.billed_duration_ms - billed).abs() < EPSILON, "{}", line);
            assert_eq!(record.memory_configured_mb, memory);
            assert!((record.memory_used_mb - used).abs() < EPSILON, "{}", line);
        }
    }

    #[test]
    fn test_missing_required_field() {
        let line = "REPORT RequestId: abc Duration: 10.0 ms Memory Size: 128 MB Max Memory Used: 64 MB";
        let failure = parse(line).unwrap_err();
        assert_eq!(failure.reason, ParseFailureReason::MissingField("Billed Duration"));
        assert_eq!(failure.line, line);
        assert_eq!(failure.reason.code(), "missing_field");
    }

    #[test]
    fn test_non_numeric_value() {
        let line = "REPORT RequestId: abc Duration: fast ms Billed Duration: 10 ms Memory Size: 128 MB Max Memory Used: 64 MB";
        let failure = parse(line).unwrap_err();
        assert!(matches!(
            failure.reason,
            ParseFailureReason::InvalidNumber { field: "Duration", .. }
        ));
    }

    #[test]
    fn test_unknown_unit() {
        let line = "REPORT RequestId: abc Duration: 10.0min Billed Duration: 10 ms Memory Size: 128 MB Max Memory Used: 64 MB";
        let failure = parse(line).unwrap_err();
        assert!(matches!(failure.reason, ParseFailureReason::UnknownUnit { .. }));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let line = "REPORT RequestId: abc Duration: -3.0 ms Billed Duration: 10 ms Memory Size: 128 MB Max Memory Used: 64 MB";
        let failure = parse(line).unwrap_err();
        assert_eq!(failure.reason.code(), "negative_value");
    }

    #[test]
    fn test_unrelated_line_is_unrecognized() {
        for line in ["START RequestId: abc Version: $LATEST", "END RequestId: abc", "hello world", ""] {
            let failure = parse(line).unwrap_err();
            assert_eq!(failure.reason, ParseFailureReason::UnrecognizedShape, "{}", line);
        }
    }

    #[test]
    fn test_memory_overuse_is_kept() {
        let line = "REPORT RequestId: abc Duration: 10.0 ms Billed Duration: 10 ms Memory Size: 128 MB Max Memory Used: 130 MB";
        let record = parse(line).unwrap();
        assert!((record.memory_used_mb - 130.0).abs() < EPSILON);
    }

    #[test]
    fn test_parse_json_platform_report() {
        let line = r#"{"time":"2024-01-15T10:05:00.123Z","type":"platform.report","record":{"requestId":"json-1","metrics":{"durationMs":45.5,"billedDurationMs":46,"memorySizeMB":256,"maxMemoryUsedMB":90,"initDurationMs":310.2},"status":"success"}}"#;
        let record = parse(line).unwrap();
        assert_eq!(record.request_id, "json-1");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 5, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        assert_eq!(record.memory_configured_mb, 256);
        assert!((record.init_duration_ms.unwrap() - 310.2).abs() < EPSILON);
    }

    #[test]
    fn test_json_other_event_type_is_unrecognized() {
        let line = r#"{"time":"2024-01-15T10:05:00Z","type":"platform.start","record":{"requestId":"x"}}"#;
        assert_eq!(
            parse(line).unwrap_err().reason,
            ParseFailureReason::UnrecognizedShape
        );
    }

    #[test]
    fn test_json_non_numeric_metric() {
        let line = r#"{"type":"platform.report","record":{"requestId":"x","metrics":{"durationMs":"slow","billedDurationMs":1,"memorySizeMB":128,"maxMemoryUsedMB":1}}}"#;
        assert_eq!(parse(line).unwrap_err().reason.code(), "invalid_json");
    }

    #[test]
    fn test_parse_batch_counts_failures() {
        let events = vec![
            LogEvent::new(ts(), "REPORT RequestId: a Duration: 1 ms Billed Duration: 1 ms Memory Size: 128 MB Max Memory Used: 60 MB"),
            LogEvent::new(ts(), "garbage"),
            LogEvent::new(ts(), "REPORT RequestId: b Duration: 1 ms Memory Size: 128 MB Max Memory Used: 60 MB"),
            LogEvent::new(ts(), "REPORT RequestId: c Duration: 2 ms Billed Duration: 2 ms Memory Size: 128 MB Max Memory Used: 61 MB"),
        ];
        let outcome = RecordParser::new().parse_batch(&events);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failure_count(), 2);
        let counts = outcome.failure_counts();
        assert_eq!(counts.get("unrecognized_shape"), Some(&1));
        assert_eq!(counts.get("missing_field"), Some(&1));
    }

    #[test]
    fn test_parse_log_tail_finds_last_report() {
        let tail = "START RequestId: a Version: $LATEST\n\
                    {\"level\":\"info\",\"msg\":\"handled\"}\n\
                    END RequestId: a\n\
                    REPORT RequestId: a\tDuration: 12.50 ms\tBilled Duration: 13 ms\tMemory Size: 256 MB\tMax Memory Used: 70 MB\tInit Duration: 180.00 ms\t\n";
        let record = RecordParser::new()
            .parse_log_tail(tail, ts())
            .expect("report present")
            .expect("report parses");
        assert_eq!(record.request_id, "a");
        assert_eq!(record.init_duration_ms, Some(180.0));
        assert_eq!(record.memory_configured_mb, 256);

        assert!(RecordParser::new()
            .parse_log_tail("START RequestId: a\nEND RequestId: a\n", ts())
            .is_none());
    }
}
