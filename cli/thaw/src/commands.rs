//! One handler per subcommand. Handlers fetch, analyze, then either print tables or JSON.

use crate::analysis::{FunctionAnalysis, MultiFunctionComparison, SetComparison};
use crate::aws_setup::AwsClients;
use crate::benchmark::{BenchmarkOrchestrator, CancellationHandle, NoopObserver, SweepObserver};
use crate::cli::{AnalyzeArgs, BenchmarkArgs, CompareArgs};
use crate::cloudwatch::{fetch_sample_set, CloudWatchLogSource, LogSource};
use crate::compare::ComparisonEngine;
use crate::config::EffectiveConfig;
use crate::console;
use crate::lambda::LambdaTarget;
use crate::parser::RecordParser;
use crate::progress::ProgressObserver;
use crate::report::save_report;
use crate::types::TimeWindow;
use crate::utils::{parse_duration, parse_instant, parse_timestamp};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::time::Duration;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration).context("Duration out of range")
}

/// `[from, to]` where `from` may be relative to `to`.
pub(crate) fn analysis_window(from: &str, to: &str, now: DateTime<Utc>) -> Result<TimeWindow> {
    let end = parse_instant(to, now).context("Invalid --to")?;
    let start = parse_instant(from, end).context("Invalid --from")?;
    if start >= end {
        bail!("Start of the time range must be before its end");
    }
    Ok(TimeWindow::new(start, end))
}

/// `[pivot - half, pivot + half]`, with the end capped at `now`.
pub(crate) fn pivot_window(
    pivot: DateTime<Utc>,
    half: Duration,
    now: DateTime<Utc>,
) -> Result<TimeWindow> {
    if pivot > now {
        bail!("Pivot {} is in the future", pivot.to_rfc3339());
    }
    let half = to_chrono(half)?;
    let start = pivot
        .checked_sub_signed(half)
        .ok_or_else(|| anyhow!("--window reaches before the earliest supported time"))?;
    let end = pivot
        .checked_add_signed(half)
        .map_or(now, |end| end.min(now));
    Ok(TimeWindow::new(start, end))
}

pub(crate) fn lookback_window(lookback: Duration, now: DateTime<Utc>) -> Result<TimeWindow> {
    let start = now
        .checked_sub_signed(to_chrono(lookback)?)
        .ok_or_else(|| anyhow!("Lookback reaches before the earliest supported time"))?;
    Ok(TimeWindow::new(start, now))
}

fn fetch_spinner(json: bool, function: &str) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Fetching CloudWatch logs for {}...", function));
    spinner
}

pub async fn analyze(
    args: &AnalyzeArgs,
    config: &EffectiveConfig,
    clients: AwsClients,
    json: bool,
) -> Result<()> {
    let window = analysis_window(&args.from, &args.to, Utc::now())?;
    let source = CloudWatchLogSource::new(clients.logs, clients.lambda, config.max_results);
    let parser = RecordParser::new();

    let spinner = fetch_spinner(json, &args.function_name);
    let fetched = fetch_sample_set(&source, &parser, &args.function_name, window).await;
    spinner.finish_and_clear();
    let (set, fetch) = fetched?;

    let mut analysis = FunctionAnalysis::from_set(&set, &config.stats).with_fetch_stats(fetch);
    if let Some(width) = config.bucket_width {
        analysis = analysis.with_cold_start_timeline(&set, to_chrono(width)?)?;
    }

    if json {
        print_json(&analysis)
    } else {
        console::print_function_analysis(&analysis);
        Ok(())
    }
}

pub async fn compare(
    args: &CompareArgs,
    config: &EffectiveConfig,
    clients: AwsClients,
    json: bool,
) -> Result<()> {
    let engine = ComparisonEngine::new(config.stats.clone());
    let parser = RecordParser::new();
    let now = Utc::now();

    match &args.pivot {
        Some(pivot) => {
            let [function] = args.function_names.as_slice() else {
                bail!("Pivot mode only supports one function. Remove --pivot for multi-function comparison.");
            };
            let pivot = parse_timestamp(pivot).context("Invalid --pivot")?;
            let half = parse_duration(&args.window).context("Invalid --window")?;
            let window = pivot_window(pivot, half, now)?;
            // both halves share one fetch
            let source = CloudWatchLogSource::new(
                clients.logs,
                clients.lambda,
                config.max_results.saturating_mul(2),
            );

            let spinner = fetch_spinner(json, function);
            let fetched = fetch_sample_set(&source, &parser, function, window).await;
            spinner.finish_and_clear();
            let (set, _) = fetched?;

            let comparison = SetComparison::at_pivot(&engine, &set, pivot);
            if json {
                print_json(&comparison)
            } else {
                console::print_set_comparison(&comparison, &config.stats);
                Ok(())
            }
        }
        None => {
            if args.function_names.len() < 2 {
                bail!("Multi-function mode requires at least 2 functions. Use --pivot for a single function before/after comparison.");
            }
            let lookback = args.from.as_deref().unwrap_or(&args.window);
            let lookback = parse_duration(lookback).context("Invalid time range")?;
            let window = lookback_window(lookback, now)?;
            let source = CloudWatchLogSource::new(clients.logs, clients.lambda, config.max_results);

            let analyses =
                analyze_functions(&source, &parser, &args.function_names, window, config, json)
                    .await;
            if analyses.is_empty() {
                bail!("No data fetched for any function");
            }

            let comparison = MultiFunctionComparison::rank(Some(window), analyses);
            if json {
                print_json(&comparison)
            } else {
                console::print_multi_function_comparison(&comparison, &config.stats);
                Ok(())
            }
        }
    }
}

/// Analyzes each function in turn. Functions whose logs cannot be fetched are reported and skipped.
async fn analyze_functions(
    source: &dyn LogSource,
    parser: &RecordParser,
    functions: &[String],
    window: TimeWindow,
    config: &EffectiveConfig,
    json: bool,
) -> Vec<FunctionAnalysis> {
    let mut analyses = Vec::with_capacity(functions.len());
    for function in functions {
        let spinner = fetch_spinner(json, function);
        let fetched = fetch_sample_set(source, parser, function, window).await;
        spinner.finish_and_clear();
        match fetched {
            Ok((set, fetch)) => {
                analyses.push(FunctionAnalysis::from_set(&set, &config.stats).with_fetch_stats(fetch));
            }
            Err(e) => {
                tracing::warn!(function = %function, error = %e, "Skipping function");
                eprintln!("{}", format!("Error fetching {}: {:#}", function, e).red());
            }
        }
    }
    analyses
}

fn load_payload(args: &BenchmarkArgs, config: &EffectiveConfig) -> Result<Option<String>> {
    let payload = match &args.payload_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
        ),
        None => config.payload.clone(),
    };
    if let Some(payload) = &payload {
        serde_json::from_str::<serde_json::Value>(payload).context("Payload is not valid JSON")?;
    }
    Ok(payload)
}

pub async fn benchmark(
    args: &BenchmarkArgs,
    config: &EffectiveConfig,
    clients: AwsClients,
    json: bool,
) -> Result<()> {
    let payload = load_payload(args, config)?;
    let target = LambdaTarget::new(clients.lambda, args.function_name.clone())
        .with_payload(payload)
        .with_settle_time(config.settle_time);
    let cancel = CancellationHandle::new();
    let orchestrator = BenchmarkOrchestrator::new(target, config.benchmark.clone())
        .with_cancellation(cancel.clone());

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight invocations");
            cancel.cancel();
        }
    });

    let observer: Box<dyn SweepObserver> = if json {
        Box::new(NoopObserver)
    } else {
        Box::new(ProgressObserver::new())
    };
    let result = orchestrator.run_sweep(observer.as_ref()).await;
    ctrl_c.abort();
    let report = result?;

    if let Some(output_dir) = &config.output_dir {
        let written = save_report(&report, &config.stats, output_dir)?;
        for path in &written {
            eprintln!("Report saved to: {}", path.display());
        }
    }

    if json {
        print_json(&report)
    } else {
        console::print_sweep_report(&report, &config.stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_analysis_window_relative_to_end() {
        let window = analysis_window("24h", "now", now()).unwrap();
        assert_eq!(window.end, now());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap());

        let window = analysis_window("2h", "2024-01-10T10:00:00Z", now()).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_analysis_window_rejects_inverted_range() {
        assert!(analysis_window("2024-01-16T00:00:00Z", "now", now()).is_err());
        assert!(analysis_window("tomorrow", "now", now()).is_err());
    }

    #[test]
    fn test_pivot_window_caps_end_at_now() {
        let pivot = now() - chrono::Duration::hours(6);
        let window = pivot_window(pivot, Duration::from_secs(24 * 3600), now()).unwrap();
        assert_eq!(window.start, pivot - chrono::Duration::hours(24));
        assert_eq!(window.end, now());

        let pivot = now() - chrono::Duration::days(3);
        let window = pivot_window(pivot, Duration::from_secs(3600), now()).unwrap();
        assert_eq!(window.end, pivot + chrono::Duration::hours(1));
    }

    #[test]
    fn test_pivot_in_future_is_rejected() {
        let pivot = now() + chrono::Duration::hours(1);
        assert!(pivot_window(pivot, Duration::from_secs(3600), now()).is_err());
    }

    #[test]
    fn test_lookback_window() {
        let window = lookback_window(Duration::from_secs(7 * 86_400), now()).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap());
        assert_eq!(window.end, now());
    }

    #[test]
    fn test_oversized_windows_are_errors() {
        let huge = parse_duration("99999999w").unwrap();
        assert!(pivot_window(now(), huge, now()).is_err());
        assert!(lookback_window(huge, now()).is_err());
    }
}
