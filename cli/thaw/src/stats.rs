use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use thiserror::Error;

pub const DEFAULT_BUCKET_COUNT: usize = 20;
pub const DEFAULT_PERCENTILES: [f64; 5] = [50.0, 90.0, 95.0, 99.0, 100.0];
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: usize = 30;

/// Tunables for distribution summaries.
///
/// `bucket_count` also drives the precision of the overlap estimate in comparisons:
/// fewer buckets merge nearby values and overstate overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSettings {
    pub bucket_count: usize,
    pub percentiles: Vec<f64>,
    /// Comparisons with fewer samples on either side are flagged, never rejected.
    pub low_confidence_threshold: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

impl StatsSettings {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.bucket_count == 0 {
            return Err(AnalysisError::InvalidBucketCount(self.bucket_count));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(AnalysisError::InvalidPercentile(*p));
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("bucket width must be positive, got {0}")]
    InvalidBucketWidth(String),
    #[error("time range needs {requested} buckets, more than the limit of {max}; use a wider bucket")]
    TooManyBuckets { requested: u64, max: usize },
    #[error("bucket count must be at least 1, got {0}")]
    InvalidBucketCount(usize),
    #[error("percentile must be within 0..=100, got {0}")]
    InvalidPercentile(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Descriptive statistics over one projection of a sample set.
///
/// Every derived field is `None` when `count == 0`; `stddev` is also `None` when `count == 1`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub percentiles: Vec<PercentileValue>,
    pub histogram: Vec<HistogramBucket>,
}

impl DistributionSummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| (p.percentile - percentile).abs() < f64::EPSILON)
            .map(|p| p.value)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }
}

pub fn summarize(values: &[f64]) -> DistributionSummary {
    summarize_with(values, &StatsSettings::default())
}

pub fn summarize_with(values: &[f64], settings: &StatsSettings) -> DistributionSummary {
    if values.is_empty() {
        return DistributionSummary::default();
    }

    let sorted = sorted_copy(values);
    let count = sorted.len();
    let min = sorted[0];
    let max = sorted[count - 1];

    let data = Data::new(sorted.clone());
    let mean = data.mean();
    let stddev = if count > 1 { data.std_dev() } else { None };

    let percentiles = settings
        .percentiles
        .iter()
        .filter_map(|&p| {
            percentile(&sorted, p).map(|value| PercentileValue {
                percentile: p,
                value,
            })
        })
        .collect();

    DistributionSummary {
        count,
        mean,
        stddev,
        min: Some(min),
        max: Some(max),
        percentiles,
        histogram: histogram(&sorted, min, max, settings.bucket_count),
    }
}

pub(crate) fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Linear interpolation between the two order statistics bracketing `p/100 * (n-1)`.
///
/// `sorted` must be ascending. Returns `None` for an empty slice or a percentile outside `0..=100`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let n = sorted.len();
    if n == 1 {
        return Some(sorted[0]);
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = lower + 1;
    if upper >= n {
        return Some(sorted[n - 1]);
    }
    let fraction = rank - lower as f64;
    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Counts `values` into `bucket_count` equal-width buckets spanning `[lower, upper]`.
///
/// A zero-width range yields a single bucket holding every in-range value. Values outside
/// the range are not counted.
pub fn histogram(
    values: &[f64],
    lower: f64,
    upper: f64,
    bucket_count: usize,
) -> Vec<HistogramBucket> {
    if values.is_empty() {
        return Vec::new();
    }
    let in_range = |v: &&f64| **v >= lower && **v <= upper;

    if upper <= lower {
        return vec![HistogramBucket {
            lower,
            upper,
            count: values.iter().filter(in_range).count(),
        }];
    }

    let bucket_count = bucket_count.max(1);
    let width = (upper - lower) / bucket_count as f64;
    let mut buckets: Vec<HistogramBucket> = (0..bucket_count)
        .map(|i| HistogramBucket {
            lower: lower + width * i as f64,
            upper: if i + 1 == bucket_count {
                upper
            } else {
                lower + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for value in values.iter().filter(in_range) {
        let index = (((value - lower) / width) as usize).min(bucket_count - 1);
        buckets[index].count += 1;
    }
    buckets
}
