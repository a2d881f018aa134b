//! JSON reports for finished benchmark sweeps.
//!
//! Each configuration is written to `<output_dir>/<memory>mb/<function>.json` so runs of
//! different functions at the same memory size sit side by side.

use crate::analysis::FunctionAnalysis;
use crate::benchmark::{BenchmarkRun, SweepReport};
use crate::stats::StatsSettings;
use crate::utils::fs_safe_name;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What lands on disk for one memory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub function_name: String,
    pub original_memory_mb: u32,
    pub sweep_interrupted: bool,
    pub analysis: FunctionAnalysis,
    pub run: BenchmarkRun,
}

impl ConfigurationReport {
    pub fn new(report: &SweepReport, run: &BenchmarkRun, settings: &StatsSettings) -> Self {
        Self {
            function_name: report.function_name.clone(),
            original_memory_mb: report.original_memory_mb,
            sweep_interrupted: report.interrupted,
            analysis: FunctionAnalysis::from_set(&run.samples, settings),
            run: run.clone(),
        }
    }
}

/// Writes one report per run and returns the paths written, in run order.
pub fn save_report(
    report: &SweepReport,
    settings: &StatsSettings,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let file_name = format!("{}.json", fs_safe_name(&report.function_name));
    let mut written = Vec::with_capacity(report.runs.len());

    for run in &report.runs {
        let memory_dir = output_dir.join(BenchmarkRun::label(run.memory_mb));
        fs::create_dir_all(&memory_dir)
            .with_context(|| format!("Failed to create directory {}", memory_dir.display()))?;

        let output_path = memory_dir.join(&file_name);
        let json = serde_json::to_string_pretty(&ConfigurationReport::new(report, run, settings))?;
        let mut file = File::create(&output_path)
            .with_context(|| format!("Failed to create {}", output_path.display()))?;
        file.write_all(json.as_bytes())?;
        tracing::debug!(path = %output_path.display(), "Report saved");
        written.push(output_path);
    }
    Ok(written)
}
