use crate::analysis::{FunctionAnalysis, MultiFunctionComparison, SetComparison};
use crate::benchmark::SweepReport;
use crate::compare::ComparisonResult;
use crate::stats::{DistributionSummary, StatsSettings};
use crate::types::TimeWindow;
use crate::utils::{format_megabytes, format_millis, format_percentage, truncate_name};
use colored::*;
use comfy_table::{
    presets::*, Attribute, Cell, CellAlignment, ColumnConstraint, ContentArrangement, Table,
    TableComponent, Width,
};

const TABLE_WIDTH: u16 = 100;
const DESCRIPTION_WIDTH: u16 = 22;
const NAME_WIDTH: usize = 40;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_style(TableComponent::MiddleHeaderIntersections, '┴')
        .set_style(TableComponent::BottomBorder, '─')
        .set_style(TableComponent::BottomBorderIntersections, '─')
        .set_style(TableComponent::HeaderLines, '─')
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(TABLE_WIDTH)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        )
        .set_constraints(vec![ColumnConstraint::LowerBoundary(Width::Fixed(
            DESCRIPTION_WIDTH,
        ))]);
    table
}

fn right(content: impl ToString) -> Cell {
    Cell::new(content).set_alignment(CellAlignment::Right)
}

fn or_na(value: Option<f64>, format: fn(f64) -> String) -> String {
    value.map(format).unwrap_or_else(|| "N/A".to_string())
}

fn print_title(title: String) {
    println!("{}", title.bright_blue().bold());
    println!("{}", "─".repeat(TABLE_WIDTH as usize).bright_black());
}

fn describe_window(window: Option<&TimeWindow>) -> String {
    match window {
        Some(w) => format!(
            "{} → {}",
            w.start.format("%Y-%m-%d %H:%M:%S UTC"),
            w.end.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => "all samples".to_string(),
    }
}

/// Low cold-start rates are good.
pub(crate) fn cold_rate_color(rate: f64) -> Color {
    if rate < 0.05 {
        Color::Green
    } else if rate < 0.10 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Positive d means slower than the reference, which is bad.
pub(crate) fn cohens_d_color(d: f64) -> Option<Color> {
    if d.abs() < 0.2 {
        None
    } else if d > 0.0 {
        Some(Color::Red)
    } else {
        Some(Color::Green)
    }
}

pub(crate) fn format_cohens_d(d: Option<f64>) -> String {
    match d {
        Some(d) => format!("{:+.2}", d),
        None => "N/A".to_string(),
    }
}

pub(crate) fn format_relative(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{:+.1}%", c * 100.0),
        None => "N/A".to_string(),
    }
}

/// Percentage-point change between two rates.
pub(crate) fn format_rate_change(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{:+.1}pp", c * 100.0),
        None => "N/A".to_string(),
    }
}

fn colored_rate(rate: Option<f64>) -> ColoredString {
    match rate {
        Some(r) => format_percentage(r).color(cold_rate_color(r)),
        None => "N/A".normal(),
    }
}

fn colored_d(d: Option<f64>) -> ColoredString {
    let text = format_cohens_d(d);
    match d.and_then(cohens_d_color) {
        Some(color) => text.color(color),
        None => text.dimmed(),
    }
}

fn distribution_row(label: &str, summary: &DistributionSummary, format: fn(f64) -> String) -> Vec<Cell> {
    vec![
        Cell::new(label),
        right(summary.count),
        right(or_na(summary.mean, format)),
        right(or_na(summary.median(), format)),
        right(or_na(summary.percentile(95.0), format)),
        right(or_na(summary.percentile(99.0), format)),
        right(or_na(summary.max, format)),
        right(or_na(summary.stddev, format)),
    ]
}

pub fn print_function_analysis(analysis: &FunctionAnalysis) {
    print_title(format!(
        "Function: {} | {} invocations | {}",
        analysis.function_name,
        analysis.invocations,
        describe_window(analysis.window.as_ref())
    ));

    if analysis.is_empty() {
        println!("{}", "No invocations found in this window.".yellow());
        return;
    }

    let mut table = new_table(&["Metric", "Count", "Mean", "P50", "P95", "P99", "Max", "Std Dev"]);
    table.add_row(distribution_row("Duration", &analysis.duration, format_millis));
    table.add_row(distribution_row("Billed Duration", &analysis.billed_duration, format_millis));
    table.add_row(distribution_row("Memory Used", &analysis.memory_used, format_megabytes));
    if !analysis.init_duration.is_empty() {
        table.add_row(distribution_row("Init Duration", &analysis.init_duration, format_millis));
        table.add_row(distribution_row(
            "Cold Start Total",
            &analysis.total_cold_start,
            format_millis,
        ));
    }
    if !analysis.restore_duration.is_empty() {
        table.add_row(distribution_row(
            "Restore Duration",
            &analysis.restore_duration,
            format_millis,
        ));
    }
    println!("{table}");

    let rates = &analysis.rates;
    println!(
        "Cold starts: {} of {} ({})",
        rates.cold_starts,
        rates.total,
        colored_rate(rates.cold_start_rate)
    );
    if rates.restores > 0 {
        println!(
            "SnapStart restores: {} of {} ({})",
            rates.restores,
            rates.total,
            or_na(rates.restore_rate, format_percentage)
        );
    }

    if !analysis.cold_start_timeline.is_empty() {
        let mut timeline = new_table(&["Bucket Start", "Invocations", "Cold Starts", "Rate"]);
        for bucket in &analysis.cold_start_timeline {
            timeline.add_row(vec![
                Cell::new(bucket.start.format("%Y-%m-%d %H:%M")),
                right(bucket.total),
                right(bucket.matching),
                right(colored_rate(bucket.rate)),
            ]);
        }
        println!();
        println!("{timeline}");
    }

    if let Some(fetch) = &analysis.fetch {
        if fetch.malformed > 0 || fetch.duplicates > 0 {
            println!(
                "{}",
                format!(
                    "Skipped {} unparseable lines and {} duplicate reports out of {} events",
                    fetch.malformed, fetch.duplicates, fetch.events
                )
                .bright_black()
            );
        }
    }
}

fn comparison_row(label: &str, result: &ComparisonResult, format: fn(f64) -> String) -> Vec<Cell> {
    let p99 = result.delta_at(99.0);
    vec![
        Cell::new(label),
        right(or_na(result.a.mean, format)),
        right(or_na(result.b.mean, format)),
        right(format_relative(result.mean_change())),
        right(format_relative(p99.and_then(|d| d.relative))),
        right(colored_d(result.cohens_d)),
        right(
            result
                .effect_size()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        right(or_na(result.overlap, format_percentage)),
    ]
}

pub fn print_set_comparison(comparison: &SetComparison, settings: &StatsSettings) {
    let pivot = comparison
        .pivot
        .map(|p| format!(" | pivot {}", p.format("%Y-%m-%d %H:%M:%S UTC")))
        .unwrap_or_default();
    print_title(format!(
        "Function: {}{} | before {} / after {} invocations",
        comparison.function_name, pivot, comparison.before_count, comparison.after_count
    ));

    if !comparison.has_both_sides() {
        println!(
            "{}",
            "Not enough data on both sides of the pivot to compare.".yellow()
        );
        return;
    }

    let mut table = new_table(&[
        "Metric", "Before", "After", "Mean Δ", "P99 Δ", "Cohen's d", "Effect", "Overlap",
    ]);
    table.add_row(comparison_row("Duration", &comparison.duration, format_millis));
    table.add_row(comparison_row(
        "Billed Duration",
        &comparison.billed_duration,
        format_millis,
    ));
    table.add_row(comparison_row("Memory Used", &comparison.memory_used, format_megabytes));
    println!("{table}");

    println!(
        "Cold start rate: {} → {} ({})",
        colored_rate(comparison.cold_start_rate_before),
        colored_rate(comparison.cold_start_rate_after),
        format_rate_change(comparison.cold_start_rate_change)
    );
    if let Some(direction) = comparison.duration.direction() {
        println!("Duration {}", direction.to_string().bold());
    }
    if comparison
        .duration
        .is_low_confidence(settings.low_confidence_threshold)
    {
        println!(
            "{}",
            format!(
                "⚠ Fewer than {} samples on one side; treat these results with caution.",
                settings.low_confidence_threshold
            )
            .yellow()
        );
    }
}

pub fn print_multi_function_comparison(
    comparison: &MultiFunctionComparison,
    settings: &StatsSettings,
) {
    print_title(format!(
        "Comparing {} functions | {}",
        comparison.functions.len(),
        describe_window(comparison.window.as_ref())
    ));

    let mut table = new_table(&[
        "Function", "Rank", "Invocations", "Mean", "P50", "P99", "Cold Rate", "Cohen's d",
    ]);
    for ranked in &comparison.functions {
        let analysis = &ranked.analysis;
        let mut name = truncate_name(&analysis.function_name, NAME_WIDTH);
        if ranked.is_baseline {
            name.push_str(" (baseline)");
        }
        let invocations = if analysis.invocations < settings.low_confidence_threshold {
            format!("{} ⚠", analysis.invocations)
        } else {
            analysis.invocations.to_string()
        };
        table.add_row(vec![
            Cell::new(name),
            right(ranked.rank),
            right(invocations),
            right(or_na(analysis.duration.mean, format_millis)),
            right(or_na(analysis.duration.median(), format_millis)),
            right(or_na(analysis.duration.percentile(99.0), format_millis)),
            right(colored_rate(analysis.rates.cold_start_rate)),
            right(colored_d(ranked.cohens_d_vs_baseline)),
        ]);
    }
    println!("{table}");

    if let Some(lowest) = comparison
        .by_cold_start_rate()
        .first()
        .filter(|r| r.analysis.rates.cold_start_rate.is_some())
    {
        println!(
            "Lowest cold start rate: {} ({})",
            lowest.analysis.function_name,
            colored_rate(lowest.analysis.rates.cold_start_rate)
        );
    }
}

pub fn print_sweep_report(report: &SweepReport, settings: &StatsSettings) {
    print_title(format!(
        "Function: {} | {} configurations | original memory {} MB",
        report.function_name,
        report.runs.len(),
        report.original_memory_mb
    ));

    let mut table = new_table(&[
        "Memory", "OK / Requested", "Mean", "P50", "P99", "Cold Starts", "Cost / Invocation",
    ]);
    for run in &report.runs {
        let analysis = FunctionAnalysis::from_set(&run.samples, settings);
        let cost = run
            .cost_per_invocation
            .map(|c| format!("${:.8}", c))
            .unwrap_or_else(|| "N/A".to_string());
        let mut memory = format!("{} MB", run.memory_mb);
        if run.interrupted {
            memory.push_str(" (interrupted)");
        }
        table.add_row(vec![
            Cell::new(memory),
            right(format!("{} / {}", run.success_count(), run.requested)),
            right(or_na(analysis.duration.mean, format_millis)),
            right(or_na(analysis.duration.median(), format_millis)),
            right(or_na(analysis.duration.percentile(99.0), format_millis)),
            right(analysis.rates.cold_starts),
            right(cost),
        ]);
    }
    println!("{table}");

    for run in &report.runs {
        if let Some(err) = &run.apply_error {
            println!(
                "{}",
                format!("✗ {} MB could not be applied: {}", run.memory_mb, err).red()
            );
        } else if run.failure_count > 0 {
            println!(
                "{}",
                format!(
                    "⚠ {} MB: {} of {} invocations failed",
                    run.memory_mb, run.failure_count, run.requested
                )
                .yellow()
            );
        }
    }
    if report.interrupted {
        println!("{}", "Sweep interrupted before completion.".yellow());
    }
    match &report.restore_error {
        Some(err) => println!(
            "{}",
            format!(
                "✗ Failed to restore original memory size ({} MB): {}",
                report.original_memory_mb, err
            )
            .red()
        ),
        None => println!("{}", "✓ Function configuration restored".green()),
    }
}
