//! Loading and merging of the `.thaw.toml` configuration file.
//!
//! The file has an optional `[global]` table and any number of `[profiles.<name>]` tables,
//! all sharing the [`ProfileConfig`] shape. Command-line flags are expressed in the same shape
//! so every layer merges the same way: CLI flags > selected profile > global > built-in defaults.

use crate::benchmark::BenchmarkSettings;
use crate::stats::StatsSettings;
use crate::utils::parse_duration;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const THAW_TOML: &str = ".thaw.toml";
pub const DEFAULT_MAX_RESULTS: usize = 10_000;
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub global: Option<ProfileConfig>,

    #[serde(default)]
    pub profiles: IndexMap<String, ProfileConfig>,
}

/// One layer of settings. Every field is optional so layers can be stacked.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProfileConfig {
    // AWS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,

    // Log fetching and statistics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_confidence_threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_width: Option<String>,

    // Benchmarking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_gb_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

macro_rules! overlay {
    ($base:ident, $top:ident, $($field:ident),+ $(,)?) => {
        ProfileConfig {
            $($field: $top.$field.clone().or_else(|| $base.$field.clone()),)+
        }
    };
}

impl ProfileConfig {
    /// Returns `self` with every field that `top` sets replaced by `top`'s value.
    pub fn overlay(&self, top: &ProfileConfig) -> ProfileConfig {
        let base = self;
        overlay!(
            base,
            top,
            aws_region,
            aws_profile,
            max_results,
            bucket_count,
            percentiles,
            low_confidence_threshold,
            bucket_width,
            memory,
            invocations,
            concurrency,
            retries,
            retry_backoff,
            invocation_timeout,
            settle_time,
            price_per_gb_second,
            payload,
            output_dir,
        )
    }
}

/// Final settings after all layers are merged and duration strings parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub max_results: usize,
    pub stats: StatsSettings,
    pub bucket_width: Option<Duration>,
    pub benchmark: BenchmarkSettings,
    /// Extra wait after a memory update has finished propagating.
    pub settle_time: Duration,
    pub payload: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            aws_region: None,
            aws_profile: None,
            max_results: DEFAULT_MAX_RESULTS,
            stats: StatsSettings::default(),
            bucket_width: None,
            benchmark: BenchmarkSettings::default(),
            settle_time: DEFAULT_SETTLE_TIME,
            payload: None,
            output_dir: None,
        }
    }
}

impl EffectiveConfig {
    fn from_layer(layer: &ProfileConfig) -> Result<Self> {
        let mut effective = EffectiveConfig::default();
        let parse = |key: &str, value: &Option<String>| -> Result<Option<Duration>> {
            value
                .as_deref()
                .map(|v| parse_duration(v).with_context(|| format!("Invalid value for '{}'", key)))
                .transpose()
        };

        effective.aws_region = layer.aws_region.clone();
        effective.aws_profile = layer.aws_profile.clone();
        if let Some(max) = layer.max_results {
            effective.max_results = max;
        }

        if let Some(count) = layer.bucket_count {
            effective.stats.bucket_count = count;
        }
        if let Some(percentiles) = &layer.percentiles {
            effective.stats.percentiles = percentiles.clone();
        }
        if let Some(threshold) = layer.low_confidence_threshold {
            effective.stats.low_confidence_threshold = threshold;
        }
        effective.stats.validate()?;
        effective.bucket_width = parse("bucket-width", &layer.bucket_width)?;

        let bench = &mut effective.benchmark;
        if let Some(memory) = &layer.memory {
            bench.memory_sizes = memory.clone();
        }
        if let Some(n) = layer.invocations {
            bench.invocations = n;
        }
        if let Some(c) = layer.concurrency {
            bench.concurrency = c;
        }
        if let Some(r) = layer.retries {
            bench.max_retries = r;
        }
        if let Some(backoff) = parse("retry-backoff", &layer.retry_backoff)? {
            bench.retry_backoff = backoff;
        }
        if let Some(timeout) = parse("invocation-timeout", &layer.invocation_timeout)? {
            bench.invocation_timeout = timeout;
        }
        if let Some(price) = layer.price_per_gb_second {
            bench.price_per_gb_second = price;
        }
        if let Some(settle) = parse("settle-time", &layer.settle_time)? {
            effective.settle_time = settle;
        }

        effective.payload = layer.payload.clone();
        effective.output_dir = layer.output_dir.clone();
        Ok(effective)
    }
}

/// Config file location: the explicit path if given, else `.thaw.toml` in the current
/// directory, else in the home directory.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(THAW_TOML);
    if local.exists() {
        return Some(local);
    }
    env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(THAW_TOML))
        .filter(|path| path.exists())
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from config file: {}", path.display()))?;
    Ok(config)
}

/// Merges the config file (if any), the selected profile and the CLI layer.
pub fn resolve_config(
    file: Option<&ConfigFile>,
    profile_name: Option<&str>,
    cli: &ProfileConfig,
) -> Result<EffectiveConfig> {
    let mut merged = ProfileConfig::default();
    if let Some(global) = file.and_then(|f| f.global.as_ref()) {
        merged = merged.overlay(global);
    }
    if let Some(name) = profile_name {
        let profile = file
            .and_then(|f| f.profiles.get(name))
            .ok_or_else(|| anyhow!("Configuration profile '{}' not found", name))?;
        merged = merged.overlay(profile);
        tracing::info!(profile = %name, "Loaded configuration from profile");
    }
    merged = merged.overlay(cli);
    EffectiveConfig::from_layer(&merged)
}

/// Finds, loads and resolves configuration in one step.
pub fn load_and_resolve_config(
    explicit_path: Option<&Path>,
    profile_name: Option<&str>,
    cli: &ProfileConfig,
) -> Result<EffectiveConfig> {
    let file = match find_config_path(explicit_path) {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "Using config file");
            Some(load_config_file(&path)?)
        }
        Some(path) => {
            return Err(anyhow!("Config file not found: {}", path.display()));
        }
        None => None,
    };
    if file.is_none() {
        if let Some(name) = profile_name {
            return Err(anyhow!(
                "Configuration profile '{}' requested but no {} file was found",
                name,
                THAW_TOML
            ));
        }
    }
    resolve_config(file.as_ref(), profile_name, cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[global]
aws-region = "eu-west-1"
concurrency = 3
bucket-count = 40

[profiles.prod]
aws-region = "us-east-1"
memory = [512, 1024]
retry-backoff = "500ms"
settle-time = "10s"

[profiles.quick]
invocations = 3
"#;

    fn sample() -> ConfigFile {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_profiles_keep_file_order() {
        let file = sample();
        let names: Vec<&String> = file.profiles.keys().collect();
        assert_eq!(names, vec!["prod", "quick"]);
    }

    #[test]
    fn test_defaults_without_file() {
        let effective = resolve_config(None, None, &ProfileConfig::default()).unwrap();
        assert_eq!(effective, EffectiveConfig::default());
        assert_eq!(effective.benchmark.concurrency, 5);
        assert_eq!(effective.stats.bucket_count, 20);
    }

    #[test]
    fn test_precedence_cli_over_profile_over_global() {
        let file = sample();
        let cli = ProfileConfig {
            memory: Some(vec![128]),
            ..ProfileConfig::default()
        };
        let effective = resolve_config(Some(&file), Some("prod"), &cli).unwrap();
        assert_eq!(effective.aws_region.as_deref(), Some("us-east-1"));
        assert_eq!(effective.benchmark.memory_sizes, vec![128]);
        assert_eq!(effective.benchmark.concurrency, 3);
        assert_eq!(effective.stats.bucket_count, 40);
        assert_eq!(effective.benchmark.retry_backoff, Duration::from_millis(500));
        assert_eq!(effective.settle_time, Duration::from_secs(10));
        assert_eq!(effective.benchmark.invocations, 10);
    }

    #[test]
    fn test_global_applies_without_profile() {
        let effective = resolve_config(Some(&sample()), None, &ProfileConfig::default()).unwrap();
        assert_eq!(effective.aws_region.as_deref(), Some("eu-west-1"));
        assert!(effective.benchmark.memory_sizes.is_empty());
    }

    #[test]
    fn test_missing_profile_is_an_error() {
        let err = resolve_config(Some(&sample()), Some("staging"), &ProfileConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("[global]\nconcurrent = 4\n");
        assert!(result.is_err());
        let result: Result<ConfigFile, _> = toml::from_str("[unknown]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_duration_and_stats_rejected() {
        let bad_duration = ProfileConfig {
            retry_backoff: Some("soon".to_string()),
            ..ProfileConfig::default()
        };
        assert!(resolve_config(None, None, &bad_duration).is_err());

        let bad_buckets = ProfileConfig {
            bucket_count: Some(0),
            ..ProfileConfig::default()
        };
        assert!(resolve_config(None, None, &bad_buckets).is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let effective =
            load_and_resolve_config(Some(file.path()), Some("quick"), &ProfileConfig::default())
                .unwrap();
        assert_eq!(effective.benchmark.invocations, 3);
        assert_eq!(effective.aws_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_and_resolve_config(Some(&missing), None, &ProfileConfig::default()).is_err());
    }

    #[test]
    fn test_profile_round_trips_through_toml() {
        let profile = ProfileConfig {
            memory: Some(vec![256, 512]),
            invocation_timeout: Some("45s".to_string()),
            ..ProfileConfig::default()
        };
        let text = toml::to_string_pretty(&profile).unwrap();
        assert!(text.contains("invocation-timeout"));
        assert!(!text.contains("aws-region"));
        let parsed: ProfileConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, profile);
    }
}
