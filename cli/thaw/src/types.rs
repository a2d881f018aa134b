use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One completed Lambda invocation, as reported by the platform `REPORT` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    pub billed_duration_ms: f64,
    pub memory_configured_mb: u32,
    pub memory_used_mb: f64,
    /// Present only on cold starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_duration_ms: Option<f64>,
    /// Present only on SnapStart restores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_duration_ms: Option<f64>,
}

impl InvocationRecord {
    pub fn is_cold_start(&self) -> bool {
        self.init_duration_ms.is_some()
    }

    pub fn is_snapstart_restore(&self) -> bool {
        self.restore_duration_ms.is_some()
    }

    /// Init plus handler duration, for cold starts only.
    pub fn total_cold_start_ms(&self) -> Option<f64> {
        self.init_duration_ms.map(|init| init + self.duration_ms)
    }

    /// Cost of this invocation given a price per GB-millisecond.
    pub fn cost(&self, price_per_gb_ms: f64) -> f64 {
        self.billed_duration_ms * f64::from(self.memory_configured_mb) * price_per_gb_ms / 1024.0
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Duration => Some(self.duration_ms),
            Metric::BilledDuration => Some(self.billed_duration_ms),
            Metric::MemoryUsed => Some(self.memory_used_mb),
            Metric::MemoryConfigured => Some(f64::from(self.memory_configured_mb)),
            Metric::InitDuration => self.init_duration_ms,
            Metric::RestoreDuration => self.restore_duration_ms,
            Metric::TotalColdStart => self.total_cold_start_ms(),
        }
    }
}

/// Numeric fields that can be projected out of a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Duration,
    BilledDuration,
    MemoryUsed,
    MemoryConfigured,
    InitDuration,
    RestoreDuration,
    TotalColdStart,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Duration => "Duration",
            Metric::BilledDuration => "Billed Duration",
            Metric::MemoryUsed => "Memory Used",
            Metric::MemoryConfigured => "Memory Size",
            Metric::InitDuration => "Init Duration",
            Metric::RestoreDuration => "Restore Duration",
            Metric::TotalColdStart => "Cold Start Duration",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::MemoryUsed | Metric::MemoryConfigured => "MB",
            _ => "ms",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A raw log event as delivered by a log source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// Inclusive time bounds of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(init: Option<f64>) -> InvocationRecord {
        InvocationRecord {
            request_id: "req-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            duration_ms: 100.0,
            billed_duration_ms: 100.0,
            memory_configured_mb: 1024,
            memory_used_mb: 80.0,
            init_duration_ms: init,
            restore_duration_ms: None,
        }
    }

    #[test]
    fn test_total_cold_start_only_for_cold_starts() {
        assert_eq!(record(Some(250.0)).total_cold_start_ms(), Some(350.0));
        assert_eq!(record(None).total_cold_start_ms(), None);
        assert_eq!(record(None).value(Metric::InitDuration), None);
    }

    #[test]
    fn test_cost_uses_gb_ms() {
        // 100ms at 1GB
        let cost = record(None).cost(0.000_000_016_666_7);
        assert!((cost - 0.000_001_666_67).abs() < 1e-12);
    }

    #[test]
    fn test_window_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, end);
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(end + chrono::Duration::milliseconds(1)));
    }
}
