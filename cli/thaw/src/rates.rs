//! Cold-start and snapshot-restore rates, overall and per time bucket.

use crate::sample::SampleSet;
use crate::stats::AnalysisError;
use crate::types::InvocationRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartKind {
    ColdStart,
    Restore,
}

impl StartKind {
    fn matches(self, record: &InvocationRecord) -> bool {
        match self {
            StartKind::ColdStart => record.is_cold_start(),
            StartKind::Restore => record.is_snapstart_restore(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RateSummary {
    pub total: usize,
    pub cold_starts: usize,
    pub restores: usize,
    pub cold_start_rate: Option<f64>,
    pub restore_rate: Option<f64>,
}

impl RateSummary {
    pub fn from_set(set: &SampleSet) -> Self {
        let total = set.size();
        let cold_starts = count_matching(set.records(), StartKind::ColdStart);
        let restores = count_matching(set.records(), StartKind::Restore);
        Self {
            total,
            cold_starts,
            restores,
            cold_start_rate: fraction(cold_starts, total),
            restore_rate: fraction(restores, total),
        }
    }
}

/// One fixed-width slice of the set's time range. `rate` is absent when the slice holds no records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBucket {
    pub start: DateTime<Utc>,
    pub total: usize,
    pub matching: usize,
    pub rate: Option<f64>,
}

/// Fraction of records carrying an init duration; absent for an empty set.
pub fn cold_start_rate(set: &SampleSet) -> Option<f64> {
    rate(set, StartKind::ColdStart)
}

/// Fraction of records carrying a restore duration; absent for an empty set.
pub fn restore_rate(set: &SampleSet) -> Option<f64> {
    rate(set, StartKind::Restore)
}

pub fn rate(set: &SampleSet, kind: StartKind) -> Option<f64> {
    fraction(count_matching(set.records(), kind), set.size())
}

/// Upper bound on the number of buckets a single timeline may hold.
pub const MAX_TIME_BUCKETS: usize = 100_000;

/// Partitions the set into contiguous `width`-wide buckets starting at the window start
/// (or the first record when the set has no window) and reports the `kind` rate per bucket.
/// Widths resolve to the microsecond.
pub fn time_bucketed_rate(
    set: &SampleSet,
    width: Duration,
    kind: StartKind,
) -> Result<Vec<RateBucket>, AnalysisError> {
    if width <= Duration::zero() {
        return Err(AnalysisError::InvalidBucketWidth(width.to_string()));
    }
    let (start, end) = match set.window() {
        Some(window) => (window.start, window.end),
        None => match set.time_range() {
            Some(range) => range,
            None => return Ok(Vec::new()),
        },
    };

    // sub-microsecond widths cannot be represented
    let width_us = width.num_microseconds().unwrap_or(i64::MAX);
    if width_us == 0 {
        return Err(AnalysisError::InvalidBucketWidth(width.to_string()));
    }
    let span_us = (end - start).num_microseconds().unwrap_or(i64::MAX).max(0);
    let needed = (span_us / width_us + i64::from(span_us % width_us != 0)).max(1);
    let bucket_count = match usize::try_from(needed) {
        Ok(count) if count <= MAX_TIME_BUCKETS => count,
        _ => {
            return Err(AnalysisError::TooManyBuckets {
                requested: needed.unsigned_abs(),
                max: MAX_TIME_BUCKETS,
            })
        }
    };

    let mut buckets: Vec<RateBucket> = (0..bucket_count)
        .map(|i| RateBucket {
            start: start + Duration::microseconds(width_us.saturating_mul(i as i64)),
            total: 0,
            matching: 0,
            rate: None,
        })
        .collect();

    for record in set.records() {
        let Some(offset) = (record.timestamp - start).num_microseconds() else {
            continue;
        };
        if offset < 0 {
            continue;
        }
        let index = usize::try_from(offset / width_us)
            .unwrap_or(usize::MAX)
            .min(bucket_count - 1);
        let bucket = &mut buckets[index];
        bucket.total += 1;
        if kind.matches(record) {
            bucket.matching += 1;
        }
    }

    for bucket in &mut buckets {
        bucket.rate = fraction(bucket.matching, bucket.total);
    }
    Ok(buckets)
}

fn count_matching(records: &[InvocationRecord], kind: StartKind) -> usize {
    records.iter().filter(|r| kind.matches(r)).count()
}

fn fraction(part: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}
