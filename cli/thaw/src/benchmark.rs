//! Memory-configuration sweeps against a live invocation target.
//!
//! Configurations run strictly one after another. Within a configuration, invocations are
//! dispatched through a semaphore so at most `concurrency` are in flight, each retried with
//! exponential backoff. Results flow back to the coordinating task through a `JoinSet`;
//! worker tasks never touch the sample set directly.

use crate::parser::{ParseFailure, RecordParser};
use crate::sample::SampleSet;
use crate::types::InvocationRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn, Instrument};

pub const DEFAULT_INVOCATIONS: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);
/// x86 on-demand price in USD.
pub const DEFAULT_PRICE_PER_GB_SECOND: f64 = 0.000_016_666_7;

/// Errors reported by an [`InvocationTarget`].
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target unreachable: {0}")]
    Unreachable(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("function error: {0}")]
    FunctionError(String),
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),
    #[error("invocation returned no platform report")]
    MissingReport,
    #[error("invalid platform report: {0}")]
    Parse(#[from] ParseFailure),
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TargetError::ConfigurationRejected(_) | TargetError::Parse(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("invocation target '{function}' is unreachable")]
    TargetUnreachable {
        function: String,
        #[source]
        source: TargetError,
    },
    #[error("invalid benchmark settings: {0}")]
    InvalidConfig(String),
}

/// What a successful invoke hands back: either a finished record or the raw log tail
/// holding the platform report.
#[derive(Debug, Clone)]
pub enum InvocationOutput {
    Record(InvocationRecord),
    LogTail(String),
}

#[async_trait]
pub trait InvocationTarget: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Memory size currently configured. Also serves as the reachability probe before a sweep.
    async fn current_memory(&self) -> Result<u32, TargetError>;

    /// Applies a memory size and returns how long to wait before it is in effect.
    async fn apply_memory(&self, memory_mb: u32) -> Result<Duration, TargetError>;

    async fn invoke(&self) -> Result<InvocationOutput, TargetError>;
}

/// Progress notifications from a sweep. Called only from the coordinating task.
pub trait SweepObserver: Send + Sync {
    fn configuration_started(&self, _memory_mb: u32, _invocations: usize) {}
    fn invocation_finished(&self, _memory_mb: u32, _succeeded: bool) {}
    fn configuration_finished(&self, _run: &BenchmarkRun) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SweepObserver for NoopObserver {}

/// Cooperative cancellation shared between the caller and a running sweep.
///
/// Cancelling stops new invocations (including retries) from being issued; invocations
/// already in flight are allowed to finish or time out.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSettings {
    pub memory_sizes: Vec<u32>,
    pub invocations: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub retry_backoff: Duration,
    pub invocation_timeout: Duration,
    pub price_per_gb_second: f64,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            memory_sizes: Vec::new(),
            invocations: DEFAULT_INVOCATIONS,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            price_per_gb_second: DEFAULT_PRICE_PER_GB_SECOND,
        }
    }
}

impl BenchmarkSettings {
    pub fn price_per_gb_ms(&self) -> f64 {
        self.price_per_gb_second / 1000.0
    }

    pub fn validate(&self) -> Result<(), BenchmarkError> {
        if self.memory_sizes.is_empty() {
            return Err(BenchmarkError::InvalidConfig(
                "at least one memory size is required".to_string(),
            ));
        }
        if self.memory_sizes.contains(&0) {
            return Err(BenchmarkError::InvalidConfig(
                "memory sizes must be positive".to_string(),
            ));
        }
        if self.invocations == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "invocations per configuration must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.invocation_timeout.is_zero() {
            return Err(BenchmarkError::InvalidConfig(
                "invocation timeout must be positive".to_string(),
            ));
        }
        if !self.price_per_gb_second.is_finite() || self.price_per_gb_second < 0.0 {
            return Err(BenchmarkError::InvalidConfig(format!(
                "invalid price per GB-second: {}",
                self.price_per_gb_second
            )));
        }
        Ok(())
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    Throttled,
    Timeout,
    FunctionError,
    ConfigurationRejected,
    MissingReport,
    InvalidReport,
    Panicked,
    Other,
}

impl From<&TargetError> for FailureKind {
    fn from(err: &TargetError) -> Self {
        match err {
            TargetError::Unreachable(_) => FailureKind::Unreachable,
            TargetError::Throttled(_) => FailureKind::Throttled,
            TargetError::Timeout(_) => FailureKind::Timeout,
            TargetError::FunctionError(_) => FailureKind::FunctionError,
            TargetError::ConfigurationRejected(_) => FailureKind::ConfigurationRejected,
            TargetError::MissingReport => FailureKind::MissingReport,
            TargetError::Parse(_) => FailureKind::InvalidReport,
            TargetError::Other(_) => FailureKind::Other,
        }
    }
}

/// An invocation that ended without a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationFailure {
    pub attempts: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one configuration. `failure_count + samples.size() == requested` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub memory_mb: u32,
    pub requested: usize,
    pub samples: SampleSet,
    pub failure_count: usize,
    /// Total invoke calls issued, retries included.
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<InvocationFailure>,
    /// Invocations never issued because the sweep was cancelled or the configuration failed to apply.
    pub not_issued: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_error: Option<String>,
    pub interrupted: bool,
    /// Mean cost of the successful invocations, absent when there were none.
    pub cost_per_invocation: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BenchmarkRun {
    pub fn label(memory_mb: u32) -> String {
        format!("{}mb", memory_mb)
    }

    pub fn success_count(&self) -> usize {
        self.samples.size()
    }

    pub fn failure_rate(&self) -> Option<f64> {
        (self.requested > 0).then(|| self.failure_count as f64 / self.requested as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub function_name: String,
    pub original_memory_mb: u32,
    pub runs: Vec<BenchmarkRun>,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct InvocationAttempt {
    outcome: Result<InvocationRecord, InvocationFailure>,
    attempts: usize,
}

pub struct BenchmarkOrchestrator<T: InvocationTarget> {
    target: Arc<T>,
    settings: BenchmarkSettings,
    parser: RecordParser,
    cancel: CancellationHandle,
}

impl<T: InvocationTarget> BenchmarkOrchestrator<T> {
    pub fn new(target: T, settings: BenchmarkSettings) -> Self {
        Self {
            target: Arc::new(target),
            settings,
            parser: RecordParser::new(),
            cancel: CancellationHandle::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn settings(&self) -> &BenchmarkSettings {
        &self.settings
    }

    /// Runs every configuration in order and restores the original memory size afterwards.
    ///
    /// Fails only when the settings are invalid or the target cannot be reached before the
    /// first configuration is applied.
    pub async fn run_sweep(
        &self,
        observer: &dyn SweepObserver,
    ) -> Result<SweepReport, BenchmarkError> {
        self.settings.validate()?;
        let function_name = self.target.name().to_string();

        let original_memory_mb = self.target.current_memory().await.map_err(|source| {
            BenchmarkError::TargetUnreachable {
                function: function_name.clone(),
                source,
            }
        })?;
        info!(
            function = %function_name,
            original_memory_mb,
            configurations = self.settings.memory_sizes.len(),
            invocations = self.settings.invocations,
            concurrency = self.settings.concurrency,
            "Starting benchmark sweep"
        );

        let started_at = Utc::now();
        let mut runs = Vec::with_capacity(self.settings.memory_sizes.len());
        for &memory_mb in &self.settings.memory_sizes {
            if self.cancel.is_cancelled() {
                info!("Sweep cancelled, skipping remaining configurations");
                break;
            }
            let run = self.run_configuration(memory_mb, observer).await;
            observer.configuration_finished(&run);
            runs.push(run);
        }

        let restore_error = self.restore_memory(original_memory_mb, &runs).await;
        let interrupted = self.cancel.is_cancelled();
        info!(
            function = %function_name,
            runs = runs.len(),
            interrupted,
            "Benchmark sweep finished"
        );

        Ok(SweepReport {
            function_name,
            original_memory_mb,
            runs,
            interrupted,
            restore_error,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn restore_memory(&self, original_memory_mb: u32, runs: &[BenchmarkRun]) -> Option<String> {
        let touched = runs.iter().any(|r| r.memory_mb != original_memory_mb);
        if !touched {
            return None;
        }
        info!(memory_mb = original_memory_mb, "Restoring original memory size");
        match self.target.apply_memory(original_memory_mb).await {
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, memory_mb = original_memory_mb, "Failed to restore original memory size");
                Some(e.to_string())
            }
        }
    }

    #[tracing::instrument(skip_all, fields(function = %self.target.name(), memory_mb = memory_mb))]
    async fn run_configuration(&self, memory_mb: u32, observer: &dyn SweepObserver) -> BenchmarkRun {
        let requested = self.settings.invocations;
        let started_at = Utc::now();
        let label = BenchmarkRun::label(memory_mb);
        observer.configuration_started(memory_mb, requested);

        info!("Applying configuration");
        let settle = match self.target.apply_memory(memory_mb).await {
            Ok(settle) => settle,
            Err(e) => {
                warn!(error = %e, "Configuration rejected, skipping");
                return BenchmarkRun {
                    memory_mb,
                    requested,
                    samples: SampleSet::from_benchmark(self.target.name(), label, Vec::new()),
                    failure_count: requested,
                    attempts: 0,
                    failures: Vec::new(),
                    not_issued: requested,
                    apply_error: Some(e.to_string()),
                    interrupted: false,
                    cost_per_invocation: None,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        if !settle.is_zero() {
            debug!(settle_ms = settle.as_millis() as u64, "Waiting for configuration to settle");
            tokio::select! {
                _ = tokio::time::sleep(settle) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks: JoinSet<InvocationAttempt> = JoinSet::new();
        let mut records = Vec::with_capacity(requested);
        let mut failures = Vec::new();
        let mut attempts = 0;
        let mut dispatched = 0;
        let mut interrupted = self.cancel.is_cancelled();

        loop {
            if tasks.is_empty() && (dispatched == requested || interrupted) {
                break;
            }
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let (succeeded, issued) = self.collect(memory_mb, joined, &mut records, &mut failures);
                    attempts += issued;
                    observer.invocation_finished(memory_mb, succeeded);
                }
                _ = self.cancel.cancelled(), if !interrupted && dispatched < requested => {
                    info!(dispatched, requested, "Cancellation requested, draining in-flight invocations");
                    interrupted = true;
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if !interrupted && dispatched < requested => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            interrupted = true;
                            continue;
                        }
                    };
                    dispatched += 1;
                    let target = Arc::clone(&self.target);
                    let settings = self.settings.clone();
                    let parser = self.parser;
                    let cancel = self.cancel.clone();
                    let span = tracing::debug_span!("invocation", index = dispatched);
                    tasks.spawn(
                        async move {
                            let attempt = invoke_with_retry(target.as_ref(), &settings, &parser, &cancel).await;
                            drop(permit);
                            attempt
                        }
                        .instrument(span),
                    );
                }
            }
        }

        let not_issued = requested - dispatched;
        let failure_count = failures.len() + not_issued;
        let price = self.settings.price_per_gb_ms();
        let cost_per_invocation = (!records.is_empty()).then(|| {
            records.iter().map(|r| r.cost(price)).sum::<f64>() / records.len() as f64
        });
        if failure_count > 0 {
            warn!(failure_count, requested, "Configuration finished with failures");
        }

        BenchmarkRun {
            memory_mb,
            requested,
            samples: SampleSet::from_benchmark(self.target.name(), label, records),
            failure_count,
            attempts,
            failures,
            not_issued,
            apply_error: None,
            interrupted,
            cost_per_invocation,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Folds one finished task into the run. Returns whether it succeeded and how many
    /// invoke calls it issued.
    fn collect(
        &self,
        memory_mb: u32,
        joined: Result<InvocationAttempt, JoinError>,
        records: &mut Vec<InvocationRecord>,
        failures: &mut Vec<InvocationFailure>,
    ) -> (bool, usize) {
        match joined {
            Ok(InvocationAttempt {
                outcome: Ok(record),
                attempts,
            }) => {
                if record.memory_configured_mb != memory_mb {
                    warn!(
                        request_id = %record.request_id,
                        reported_mb = record.memory_configured_mb,
                        "Invocation ran with a different memory size than requested"
                    );
                }
                records.push(record);
                (true, attempts)
            }
            Ok(InvocationAttempt {
                outcome: Err(failure),
                attempts,
            }) => {
                warn!(kind = ?failure.kind, attempts, error = %failure.message, "Invocation failed");
                failures.push(failure);
                (false, attempts)
            }
            Err(join_error) => {
                warn!(error = %join_error, "Invocation task aborted");
                failures.push(InvocationFailure {
                    attempts: 1,
                    kind: FailureKind::Panicked,
                    message: join_error.to_string(),
                });
                (false, 1)
            }
        }
    }
}

async fn invoke_with_retry<T: InvocationTarget + ?Sized>(
    target: &T,
    settings: &BenchmarkSettings,
    parser: &RecordParser,
    cancel: &CancellationHandle,
) -> InvocationAttempt {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(settings.invocation_timeout, target.invoke()).await {
            Ok(result) => result.and_then(|output| resolve_output(output, parser)),
            Err(_) => Err(TargetError::Timeout(settings.invocation_timeout)),
        };

        let err = match result {
            Ok(record) => {
                return InvocationAttempt {
                    outcome: Ok(record),
                    attempts,
                }
            }
            Err(err) => err,
        };

        let retries_used = (attempts - 1) as u32;
        if err.is_retryable() && retries_used < settings.max_retries && !cancel.is_cancelled() {
            let backoff = settings.backoff_for(retries_used);
            info!(
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying invocation"
            );
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(backoff) => false,
                _ = cancel.cancelled() => true,
            };
            if !cancelled {
                continue;
            }
        }

        return InvocationAttempt {
            outcome: Err(InvocationFailure {
                attempts,
                kind: FailureKind::from(&err),
                message: err.to_string(),
            }),
            attempts,
        };
    }
}

fn resolve_output(
    output: InvocationOutput,
    parser: &RecordParser,
) -> Result<InvocationRecord, TargetError> {
    match output {
        InvocationOutput::Record(record) => Ok(record),
        InvocationOutput::LogTail(tail) => match parser.parse_log_tail(&tail, Utc::now()) {
            Some(parsed) => Ok(parsed?),
            None => Err(TargetError::MissingReport),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTarget {
        memory: Mutex<u32>,
        unreachable: bool,
        rejected: HashSet<u32>,
        /// The first `failing_calls` invoke calls fail with a throttling error.
        failing_calls: usize,
        delay: Duration,
        settle: Duration,
        log_tail: bool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        applied: Mutex<Vec<u32>>,
    }

    impl MockTarget {
        fn new(memory: u32) -> Self {
            Self {
                memory: Mutex::new(memory),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl InvocationTarget for MockTarget {
        fn name(&self) -> &str {
            "mock-fn"
        }

        async fn current_memory(&self) -> Result<u32, TargetError> {
            if self.unreachable {
                return Err(TargetError::Unreachable("no route".to_string()));
            }
            Ok(*self.memory.lock().unwrap())
        }

        async fn apply_memory(&self, memory_mb: u32) -> Result<Duration, TargetError> {
            if self.rejected.contains(&memory_mb) {
                return Err(TargetError::ConfigurationRejected(format!(
                    "{} MB not allowed",
                    memory_mb
                )));
            }
            *self.memory.lock().unwrap() = memory_mb;
            self.applied.lock().unwrap().push(memory_mb);
            Ok(self.settle)
        }

        async fn invoke(&self) -> Result<InvocationOutput, TargetError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call < self.failing_calls {
                return Err(TargetError::Throttled("rate exceeded".to_string()));
            }
            let memory = *self.memory.lock().unwrap();
            if self.log_tail {
                return Ok(InvocationOutput::LogTail(format!(
                    "START RequestId: req-{call}\nEND RequestId: req-{call}\n\
                     REPORT RequestId: req-{call}\tDuration: 10.5 ms\tBilled Duration: 11 ms\t\
                     Memory Size: {memory} MB\tMax Memory Used: 60 MB\t\n"
                )));
            }
            Ok(InvocationOutput::Record(InvocationRecord {
                request_id: format!("req-{}", call),
                timestamp: Utc::now(),
                duration_ms: 10.0,
                billed_duration_ms: 10.0,
                memory_configured_mb: memory,
                memory_used_mb: 60.0,
                init_duration_ms: (call == 0).then_some(150.0),
                restore_duration_ms: None,
            }))
        }
    }

    fn settings(memory_sizes: &[u32], invocations: usize) -> BenchmarkSettings {
        BenchmarkSettings {
            memory_sizes: memory_sizes.to_vec(),
            invocations,
            retry_backoff: Duration::from_millis(1),
            invocation_timeout: Duration::from_secs(5),
            ..BenchmarkSettings::default()
        }
    }

    struct CancelAfter {
        handle: CancellationHandle,
        after: usize,
        seen: AtomicUsize,
    }

    impl SweepObserver for CancelAfter {
        fn invocation_finished(&self, _memory_mb: u32, _succeeded: bool) {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.handle.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_every_invocation_accounted_for() {
        let target = MockTarget::new(128);
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256, 512], 7));
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();

        assert_eq!(report.runs.len(), 2);
        for run in &report.runs {
            assert_eq!(run.failure_count + run.samples.size(), 7);
            assert_eq!(run.samples.size(), 7);
            assert!(run.attempts <= 7 * 3);
            assert!(run.cost_per_invocation.unwrap() > 0.0);
            assert!(run
                .samples
                .records()
                .iter()
                .all(|r| r.memory_configured_mb == run.memory_mb));
        }
        assert_eq!(report.runs[0].samples.key().label.as_deref(), Some("256mb"));
        assert!(!report.interrupted);
    }

    #[tokio::test]
    async fn test_waits_for_target_settle_time() {
        let target = MockTarget {
            settle: Duration::from_millis(150),
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256], 1));
        let run = orchestrator.run_sweep(&NoopObserver).await.unwrap().runs.remove(0);
        assert_eq!(run.samples.size(), 1);
        assert!(run.finished_at - run.started_at >= chrono::Duration::milliseconds(150));
    }

    #[tokio::test]
    async fn test_retries_recover_transient_failures() {
        let target = MockTarget {
            failing_calls: 2,
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256], 1));
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();
        let run = &report.runs[0];
        assert_eq!(run.samples.size(), 1);
        assert_eq!(run.failure_count, 0);
        assert_eq!(run.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_failure() {
        let target = MockTarget {
            failing_calls: usize::MAX,
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256, 512], 4));
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();

        assert_eq!(report.runs.len(), 2);
        for run in &report.runs {
            assert_eq!(run.failure_count, 4);
            assert!(run.samples.is_empty());
            assert_eq!(run.attempts, 4 * 3);
            assert_eq!(run.cost_per_invocation, None);
            assert!(run.failures.iter().all(|f| f.kind == FailureKind::Throttled));
            assert!(run.failures.iter().all(|f| f.attempts == 3));
        }
        assert_eq!(orchestrator.target().calls.load(Ordering::SeqCst), 2 * 4 * 3);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure_kind() {
        let target = MockTarget {
            delay: Duration::from_millis(200),
            ..MockTarget::new(128)
        };
        let mut s = settings(&[256], 2);
        s.invocation_timeout = Duration::from_millis(10);
        s.max_retries = 0;
        let orchestrator = BenchmarkOrchestrator::new(target, s);
        let run = orchestrator.run_sweep(&NoopObserver).await.unwrap().runs.remove(0);
        assert_eq!(run.failure_count, 2);
        assert_eq!(run.attempts, 2);
        assert!(run.failures.iter().all(|f| f.kind == FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_rejected_configuration_does_not_stop_sweep() {
        let target = MockTarget {
            rejected: [256].into_iter().collect(),
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256, 512], 3));
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();

        let rejected = &report.runs[0];
        assert!(rejected.apply_error.is_some());
        assert_eq!(rejected.failure_count, 3);
        assert_eq!(rejected.not_issued, 3);
        assert!(rejected.samples.is_empty());
        assert_eq!(rejected.attempts, 0);

        let next = &report.runs[1];
        assert_eq!(next.samples.size(), 3);
        assert!(next.apply_error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target_aborts_before_any_configuration() {
        let target = MockTarget {
            unreachable: true,
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[256], 3));
        let err = orchestrator.run_sweep(&NoopObserver).await.unwrap_err();
        assert!(matches!(err, BenchmarkError::TargetUnreachable { .. }));
        assert!(orchestrator.target().applied.lock().unwrap().is_empty());
        assert_eq!(orchestrator.target().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let orchestrator = BenchmarkOrchestrator::new(MockTarget::new(128), settings(&[], 3));
        assert!(matches!(
            orchestrator.run_sweep(&NoopObserver).await,
            Err(BenchmarkError::InvalidConfig(_))
        ));
        let mut s = settings(&[256], 3);
        s.concurrency = 0;
        assert!(s.validate().is_err());
    }

    #[tokio::test]
    async fn test_configurations_run_in_order_and_original_is_restored() {
        let target = MockTarget {
            delay: Duration::from_millis(2),
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[1024, 256, 512], 4));
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();

        let order: Vec<u32> = report.runs.iter().map(|r| r.memory_mb).collect();
        assert_eq!(order, vec![1024, 256, 512]);
        for pair in report.runs.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);
            let last = earlier.samples.time_range().unwrap().1;
            assert!(last <= later.started_at);
            assert!(earlier.finished_at <= later.started_at);
        }
        assert_eq!(report.original_memory_mb, 128);
        assert_eq!(
            *orchestrator.target().applied.lock().unwrap(),
            vec![1024, 256, 512, 128]
        );
        assert!(report.restore_error.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let target = MockTarget {
            delay: Duration::from_millis(5),
            ..MockTarget::new(128)
        };
        let mut s = settings(&[256], 20);
        s.concurrency = 3;
        let orchestrator = BenchmarkOrchestrator::new(target, s);
        let report = orchestrator.run_sweep(&NoopObserver).await.unwrap();
        assert_eq!(report.runs[0].samples.size(), 20);
        let max = orchestrator.target().max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max in flight {}", max);
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_invocations() {
        let target = MockTarget {
            delay: Duration::from_millis(2),
            ..MockTarget::new(128)
        };
        let mut s = settings(&[256, 512], 10);
        s.concurrency = 1;
        let orchestrator = BenchmarkOrchestrator::new(target, s);
        let observer = CancelAfter {
            handle: orchestrator.cancellation_handle(),
            after: 2,
            seen: AtomicUsize::new(0),
        };
        let report = orchestrator.run_sweep(&observer).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.runs.len(), 1);
        let run = &report.runs[0];
        assert!(run.interrupted);
        assert_eq!(run.failure_count + run.samples.size(), 10);
        assert!(run.samples.size() >= 2 && run.samples.size() < 10);
        assert!(run.not_issued > 0);
        // the original size is still restored after an abort
        assert_eq!(*orchestrator.target().memory.lock().unwrap(), 128);
    }

    #[tokio::test]
    async fn test_log_tail_output_is_parsed() {
        let target = MockTarget {
            log_tail: true,
            ..MockTarget::new(128)
        };
        let orchestrator = BenchmarkOrchestrator::new(target, settings(&[512], 3));
        let run = orchestrator.run_sweep(&NoopObserver).await.unwrap().runs.remove(0);
        assert_eq!(run.samples.size(), 3);
        assert!(run
            .samples
            .records()
            .iter()
            .all(|r| r.memory_configured_mb == 512 && r.billed_duration_ms == 11.0));
    }

    #[test]
    fn test_backoff_doubles() {
        let s = BenchmarkSettings::default();
        assert_eq!(s.backoff_for(0), Duration::from_millis(200));
        assert_eq!(s.backoff_for(1), Duration::from_millis(400));
        assert_eq!(s.backoff_for(2), Duration::from_millis(800));
    }

    #[test]
    fn test_cancellation_handle() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
