use crate::benchmark::{BenchmarkRun, SweepObserver};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Draws one progress bar per memory configuration.
pub struct ProgressObserver {
    bars: MultiProgress,
    current: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            bars: MultiProgress::new(),
            current: Mutex::new(None),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {prefix:>8} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} invocations {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    fn with_current(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.current.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepObserver for ProgressObserver {
    fn configuration_started(&self, memory_mb: u32, invocations: usize) {
        let bar = self.bars.add(ProgressBar::new(invocations as u64));
        bar.set_style(Self::style());
        bar.set_prefix(BenchmarkRun::label(memory_mb));
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(bar);
        }
    }

    fn invocation_finished(&self, _memory_mb: u32, succeeded: bool) {
        self.with_current(|bar| {
            if !succeeded {
                bar.set_message("(with failures)");
            }
            bar.inc(1);
        });
    }

    fn configuration_finished(&self, run: &BenchmarkRun) {
        self.with_current(|bar| {
            let message = if let Some(err) = &run.apply_error {
                format!("✗ {}", err)
            } else if run.interrupted {
                "interrupted".to_string()
            } else {
                format!("✓ {} ok, {} failed", run.success_count(), run.failure_count)
            };
            bar.finish_with_message(message);
        });
    }
}
