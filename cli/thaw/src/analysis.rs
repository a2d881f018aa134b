//! Composite views built from sample sets: single-function analysis, before/after comparison
//! and multi-function ranking.

use crate::compare::{self, ComparisonEngine, ComparisonResult};
use crate::rates::{self, RateBucket, RateSummary, StartKind};
use crate::sample::{FetchStats, SampleSet};
use crate::stats::{self, AnalysisError, DistributionSummary, StatsSettings};
use crate::types::{Metric, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionAnalysis {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    pub invocations: usize,
    pub duration: DistributionSummary,
    pub billed_duration: DistributionSummary,
    pub memory_used: DistributionSummary,
    pub init_duration: DistributionSummary,
    pub restore_duration: DistributionSummary,
    pub total_cold_start: DistributionSummary,
    pub rates: RateSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cold_start_timeline: Vec<RateBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchStats>,
}

impl FunctionAnalysis {
    pub fn from_set(set: &SampleSet, settings: &StatsSettings) -> Self {
        let summarize = |metric| stats::summarize_with(&set.project(metric), settings);
        Self {
            function_name: set.function_name().to_string(),
            window: set.window().copied(),
            invocations: set.size(),
            duration: summarize(Metric::Duration),
            billed_duration: summarize(Metric::BilledDuration),
            memory_used: summarize(Metric::MemoryUsed),
            init_duration: summarize(Metric::InitDuration),
            restore_duration: summarize(Metric::RestoreDuration),
            total_cold_start: summarize(Metric::TotalColdStart),
            rates: RateSummary::from_set(set),
            cold_start_timeline: Vec::new(),
            fetch: None,
        }
    }

    /// Adds the per-bucket cold-start rate over the set's time range.
    pub fn with_cold_start_timeline(
        mut self,
        set: &SampleSet,
        bucket_width: Duration,
    ) -> Result<Self, AnalysisError> {
        self.cold_start_timeline =
            rates::time_bucketed_rate(set, bucket_width, StartKind::ColdStart)?;
        Ok(self)
    }

    pub fn with_fetch_stats(mut self, fetch: FetchStats) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.invocations == 0
    }
}

/// Before/after comparison of one function, usually split at a deployment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetComparison {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_window: Option<TimeWindow>,
    pub before_count: usize,
    pub after_count: usize,
    pub duration: ComparisonResult,
    pub billed_duration: ComparisonResult,
    pub memory_used: ComparisonResult,
    pub cold_start_rate_before: Option<f64>,
    pub cold_start_rate_after: Option<f64>,
    /// Absolute change in cold-start rate, `after - before`.
    pub cold_start_rate_change: Option<f64>,
}

impl SetComparison {
    pub fn between(engine: &ComparisonEngine, before: &SampleSet, after: &SampleSet) -> Self {
        let cold_start_rate_before = rates::cold_start_rate(before);
        let cold_start_rate_after = rates::cold_start_rate(after);
        Self {
            function_name: before.function_name().to_string(),
            pivot: None,
            before_window: before.window().copied(),
            after_window: after.window().copied(),
            before_count: before.size(),
            after_count: after.size(),
            duration: engine.compare(before, after, Metric::Duration),
            billed_duration: engine.compare(before, after, Metric::BilledDuration),
            memory_used: engine.compare(before, after, Metric::MemoryUsed),
            cold_start_rate_before,
            cold_start_rate_after,
            cold_start_rate_change: match (cold_start_rate_before, cold_start_rate_after) {
                (Some(b), Some(a)) => Some(a - b),
                _ => None,
            },
        }
    }

    /// Splits `set` at `pivot` and compares the two halves.
    pub fn at_pivot(engine: &ComparisonEngine, set: &SampleSet, pivot: DateTime<Utc>) -> Self {
        let (before, after) = set.split_at(pivot);
        Self {
            pivot: Some(pivot),
            ..Self::between(engine, &before, &after)
        }
    }

    pub fn has_both_sides(&self) -> bool {
        self.before_count > 0 && self.after_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFunction {
    pub rank: usize,
    pub is_baseline: bool,
    /// Effect size of this function's duration against the baseline's; positive means slower.
    pub cohens_d_vs_baseline: Option<f64>,
    pub analysis: FunctionAnalysis,
}

/// Functions ordered by mean duration, fastest first; the fastest is the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFunctionComparison {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    pub functions: Vec<RankedFunction>,
}

impl MultiFunctionComparison {
    /// Ranks the analyses. Functions without any duration samples sort last and carry no effect size.
    pub fn rank(window: Option<TimeWindow>, mut analyses: Vec<FunctionAnalysis>) -> Self {
        analyses.sort_by(|a, b| match (a.duration.mean, b.duration.mean) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let baseline = analyses
            .first()
            .filter(|a| a.duration.mean.is_some())
            .cloned();

        let functions = analyses
            .into_iter()
            .enumerate()
            .map(|(i, analysis)| {
                let is_baseline = baseline.is_some() && i == 0;
                let cohens_d_vs_baseline = match &baseline {
                    Some(base) if !is_baseline => {
                        compare::cohens_d(&base.duration, &analysis.duration)
                    }
                    Some(_) => Some(0.0),
                    None => None,
                };
                RankedFunction {
                    rank: i + 1,
                    is_baseline,
                    cohens_d_vs_baseline,
                    analysis,
                }
            })
            .collect();

        Self {
            window,
            baseline: baseline.map(|b| b.function_name),
            functions,
        }
    }

    /// Same functions ordered by cold-start rate, lowest first.
    pub fn by_cold_start_rate(&self) -> Vec<&RankedFunction> {
        let mut ordered: Vec<&RankedFunction> = self.functions.iter().collect();
        ordered.sort_by(|a, b| {
            let ra = a.analysis.rates.cold_start_rate.unwrap_or(f64::INFINITY);
            let rb = b.analysis.rates.cold_start_rate.unwrap_or(f64::INFINITY);
            ra.total_cmp(&rb)
        });
        ordered
    }
}
