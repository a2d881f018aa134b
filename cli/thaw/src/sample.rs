//! Sample sets: immutable, timestamp-ordered groups of invocation records.

use crate::parser::RecordParser;
use crate::types::{InvocationRecord, LogEvent, Metric, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What a sample set was grouped by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleKey {
    pub function_name: String,
    /// Configuration label for benchmark-produced sets, e.g. `512mb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Fetch bounds for log-mined sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

/// Bookkeeping from building a set out of a log fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStats {
    pub events: usize,
    pub parsed: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub out_of_window: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub malformed_by_reason: BTreeMap<String, usize>,
}

/// Ordered collection of records sharing a grouping key. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    key: SampleKey,
    records: Vec<InvocationRecord>,
}

impl SampleSet {
    fn sorted(key: SampleKey, mut records: Vec<InvocationRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self { key, records }
    }

    /// A set with no window or label, e.g. for ad-hoc analysis of already-filtered records.
    pub fn from_records(function_name: impl Into<String>, records: Vec<InvocationRecord>) -> Self {
        Self::sorted(
            SampleKey {
                function_name: function_name.into(),
                label: None,
                window: None,
            },
            records,
        )
    }

    /// Builds a set from a bounded log fetch: drops duplicate request ids (first one wins)
    /// and records outside the window.
    pub fn from_fetch(
        function_name: impl Into<String>,
        window: TimeWindow,
        records: Vec<InvocationRecord>,
    ) -> (Self, FetchStats) {
        let mut stats = FetchStats {
            parsed: records.len(),
            ..FetchStats::default()
        };
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.request_id.clone()) {
                stats.duplicates += 1;
                continue;
            }
            if !window.contains(record.timestamp) {
                stats.out_of_window += 1;
                continue;
            }
            kept.push(record);
        }
        if stats.duplicates > 0 || stats.out_of_window > 0 {
            tracing::debug!(
                duplicates = stats.duplicates,
                out_of_window = stats.out_of_window,
                "Dropped records while building sample set"
            );
        }

        let set = Self::sorted(
            SampleKey {
                function_name: function_name.into(),
                label: None,
                window: Some(window),
            },
            kept,
        );
        (set, stats)
    }

    /// Parses raw log events and builds a fetch-bounded set, counting every skipped line.
    pub fn from_events(
        function_name: impl Into<String>,
        window: TimeWindow,
        events: &[LogEvent],
        parser: &RecordParser,
    ) -> (Self, FetchStats) {
        let outcome = parser.parse_batch(events);
        let malformed_by_reason = outcome
            .failure_counts()
            .into_iter()
            .map(|(code, count)| (code.to_string(), count))
            .collect();
        let malformed = outcome.failure_count();
        let (set, mut stats) = Self::from_fetch(function_name, window, outcome.records);
        stats.events = events.len();
        stats.malformed = malformed;
        stats.malformed_by_reason = malformed_by_reason;
        (set, stats)
    }

    /// Builds a set from a finished benchmark configuration.
    pub fn from_benchmark(
        function_name: impl Into<String>,
        label: impl Into<String>,
        records: Vec<InvocationRecord>,
    ) -> Self {
        Self::sorted(
            SampleKey {
                function_name: function_name.into(),
                label: Some(label.into()),
                window: None,
            },
            records,
        )
    }

    pub fn key(&self) -> &SampleKey {
        &self.key
    }

    pub fn function_name(&self) -> &str {
        &self.key.function_name
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.key.window.as_ref()
    }

    pub fn records(&self) -> &[InvocationRecord] {
        &self.records
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of `metric` in timestamp order, skipping records where it is absent.
    pub fn project(&self, metric: Metric) -> Vec<f64> {
        self.records
            .iter()
            .filter_map(|r| r.value(metric))
            .collect()
    }

    /// New set holding the records that satisfy `predicate`; the key is kept.
    pub fn filter<P>(&self, predicate: P) -> SampleSet
    where
        P: Fn(&InvocationRecord) -> bool,
    {
        SampleSet {
            key: self.key.clone(),
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        }
    }

    /// Timestamps of the first and last record.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Splits at `pivot` into records strictly before it and records at or after it.
    pub fn split_at(&self, pivot: DateTime<Utc>) -> (SampleSet, SampleSet) {
        let (before, after): (Vec<_>, Vec<_>) = self
            .records
            .iter()
            .cloned()
            .partition(|r| r.timestamp < pivot);
        let before_key = SampleKey {
            window: self.key.window.map(|w| TimeWindow::new(w.start, pivot)),
            ..self.key.clone()
        };
        let after_key = SampleKey {
            window: self.key.window.map(|w| TimeWindow::new(pivot, w.end)),
            ..self.key.clone()
        };
        (
            SampleSet {
                key: before_key,
                records: before,
            },
            SampleSet {
                key: after_key,
                records: after,
            },
        )
    }
}
