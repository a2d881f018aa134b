//! Two-sample comparison: effect size, percentile deltas and distribution overlap.

use crate::sample::SampleSet;
use crate::stats::{self, DistributionSummary, StatsSettings};
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Percentiles at which deltas are always reported, independent of `StatsSettings::percentiles`.
pub const COMPARISON_PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 100.0];

const NEGLIGIBLE_EFFECT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileDelta {
    pub percentile: f64,
    pub a: f64,
    pub b: f64,
    /// `b - a`
    pub absolute: f64,
    /// `(b - a) / a`, absent when `a == 0`
    pub relative: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    pub fn from_cohens_d(d: f64) -> Self {
        match d.abs() {
            x if x < NEGLIGIBLE_EFFECT => EffectSize::Negligible,
            x if x < 0.5 => EffectSize::Small,
            x if x < 0.8 => EffectSize::Medium,
            _ => EffectSize::Large,
        }
    }
}

impl fmt::Display for EffectSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EffectSize::Negligible => "negligible",
            EffectSize::Small => "small",
            EffectSize::Medium => "medium",
            EffectSize::Large => "large",
        };
        f.write_str(s)
    }
}

/// Movement of `b` relative to `a` for metrics where lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Improved,
    Regressed,
    Unchanged,
}

impl Direction {
    pub fn from_cohens_d(d: f64) -> Self {
        if d < -NEGLIGIBLE_EFFECT {
            Direction::Improved
        } else if d > NEGLIGIBLE_EFFECT {
            Direction::Regressed
        } else {
            Direction::Unchanged
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Improved => "improved",
            Direction::Regressed => "regressed",
            Direction::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Result of comparing metric `metric` between sample sets `a` (before/baseline) and `b`.
///
/// Undefined quantities are `None`; nothing here is ever NaN or infinite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub metric: Metric,
    pub a: DistributionSummary,
    pub b: DistributionSummary,
    pub n_a: usize,
    pub n_b: usize,
    pub cohens_d: Option<f64>,
    pub percentile_deltas: Vec<PercentileDelta>,
    /// Histogram overlapping coefficient in `[0, 1]`.
    pub overlap: Option<f64>,
}

impl ComparisonResult {
    pub fn is_low_confidence(&self, threshold: usize) -> bool {
        self.n_a < threshold || self.n_b < threshold
    }

    pub fn effect_size(&self) -> Option<EffectSize> {
        self.cohens_d.map(EffectSize::from_cohens_d)
    }

    pub fn direction(&self) -> Option<Direction> {
        self.cohens_d.map(Direction::from_cohens_d)
    }

    pub fn delta_at(&self, percentile: f64) -> Option<&PercentileDelta> {
        self.percentile_deltas
            .iter()
            .find(|d| (d.percentile - percentile).abs() < f64::EPSILON)
    }

    /// Relative change of the mean, absent when either side is empty or `a`'s mean is zero.
    pub fn mean_change(&self) -> Option<f64> {
        match (self.a.mean, self.b.mean) {
            (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonEngine {
    settings: StatsSettings,
}

impl ComparisonEngine {
    pub fn new(settings: StatsSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StatsSettings {
        &self.settings
    }

    pub fn compare(&self, a: &SampleSet, b: &SampleSet, metric: Metric) -> ComparisonResult {
        self.compare_values(&a.project(metric), &b.project(metric), metric)
    }

    pub fn compare_values(&self, a: &[f64], b: &[f64], metric: Metric) -> ComparisonResult {
        let summary_a = stats::summarize_with(a, &self.settings);
        let summary_b = stats::summarize_with(b, &self.settings);

        let sorted_a = stats::sorted_copy(a);
        let sorted_b = stats::sorted_copy(b);
        let percentile_deltas = COMPARISON_PERCENTILES
            .iter()
            .filter_map(|&p| {
                let va = stats::percentile(&sorted_a, p)?;
                let vb = stats::percentile(&sorted_b, p)?;
                Some(PercentileDelta {
                    percentile: p,
                    a: va,
                    b: vb,
                    absolute: vb - va,
                    relative: (va != 0.0).then(|| (vb - va) / va),
                })
            })
            .collect();

        ComparisonResult {
            metric,
            n_a: summary_a.count,
            n_b: summary_b.count,
            cohens_d: cohens_d(&summary_a, &summary_b),
            percentile_deltas,
            overlap: overlap_coefficient(&sorted_a, &sorted_b, self.settings.bucket_count),
            a: summary_a,
            b: summary_b,
        }
    }
}

/// Standardized mean difference `(mean_b - mean_a) / pooled_stddev`.
///
/// Absent when either side has fewer than two samples or the pooled stddev is zero.
pub fn cohens_d(a: &DistributionSummary, b: &DistributionSummary) -> Option<f64> {
    if a.count < 2 || b.count < 2 {
        return None;
    }
    let (mean_a, sd_a) = (a.mean?, a.stddev?);
    let (mean_b, sd_b) = (b.mean?, b.stddev?);
    let n_a = a.count as f64;
    let n_b = b.count as f64;
    let pooled_variance =
        ((n_a - 1.0) * sd_a.powi(2) + (n_b - 1.0) * sd_b.powi(2)) / (n_a + n_b - 2.0);
    let pooled = pooled_variance.sqrt();
    if pooled == 0.0 || !pooled.is_finite() {
        return None;
    }
    Some((mean_b - mean_a) / pooled)
}

/// Overlapping coefficient estimated from histograms built over the shared `[min, max]` range.
///
/// The estimate coarsens as `bucket_count` shrinks: with one bucket any two non-empty
/// samples overlap fully.
pub fn overlap_coefficient(a: &[f64], b: &[f64], bucket_count: usize) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (lo, hi) = a
        .iter()
        .chain(b.iter())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if hi <= lo {
        return Some(1.0);
    }

    let hist_a = stats::histogram(a, lo, hi, bucket_count);
    let hist_b = stats::histogram(b, lo, hi, bucket_count);
    let total_a = a.len() as f64;
    let total_b = b.len() as f64;
    let overlap = hist_a
        .iter()
        .zip(hist_b.iter())
        .map(|(x, y)| (x.count as f64 / total_a).min(y.count as f64 / total_b))
        .sum::<f64>();
    Some(overlap.clamp(0.0, 1.0))
}
