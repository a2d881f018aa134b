use crate::config::ProfileConfig;
use clap::{crate_authors, crate_description, Args, Parser, Subcommand};
use std::path::PathBuf;

const USAGE_EXAMPLES: &str = "\
EXAMPLES:
    # Summarize the last 24 hours of invocations
    thaw analyze my-function

    # Cold-start rate per hour over the last week
    thaw analyze my-function --from 7d --bucket-width 1h

    # Compare performance before and after a deployment
    thaw compare my-function --pivot 2024-01-15T10:00:00Z --window 12h

    # Rank several functions over the same period
    thaw compare func-a func-b func-c --from 7d

    # Benchmark three memory sizes, 20 invocations each, and save the results
    thaw benchmark my-function --memory 128,256,512 -n 20 --output-dir ./results";

#[derive(Parser, Debug, Clone)]
#[command(author = crate_authors!(", "), version, about = crate_description!(), long_about = None, after_help = USAGE_EXAMPLES)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// AWS Region to use. Defaults to environment/profile configuration.
    #[arg(short = 'r', long = "aws-region", global = true)]
    pub aws_region: Option<String>,

    /// AWS Profile to use. Defaults to environment/profile configuration.
    #[arg(short = 'p', long = "aws-profile", global = true)]
    pub aws_profile: Option<String>,

    /// Load settings from a named profile in .thaw.toml.
    #[arg(long = "config-profile", global = true)]
    pub config_profile: Option<String>,

    /// Path to the configuration file. Defaults to ./.thaw.toml, then ~/.thaw.toml.
    #[arg(long = "config", global = true)]
    pub config_path: Option<PathBuf>,

    /// Number of histogram buckets used for distribution overlap.
    #[arg(long, global = true)]
    pub bucket_count: Option<usize>,

    /// Print the result as JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Analyze invocation performance of a function from its logs
    Analyze(AnalyzeArgs),

    /// Compare a function before and after a point in time, or several functions side by side
    Compare(CompareArgs),

    /// Invoke a function at several memory sizes and measure each configuration
    Benchmark(BenchmarkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Lambda function name or ARN
    pub function_name: String,

    /// Start of the time range: a duration back from --to (24h, 7d, 1w) or an RFC 3339 timestamp
    #[arg(long = "from", default_value = "24h")]
    pub from: String,

    /// End of the time range: 'now' or an RFC 3339 timestamp
    #[arg(long = "to", default_value = "now")]
    pub to: String,

    /// Maximum number of invocations to fetch
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Report the cold-start rate per bucket of this width (e.g. 1h)
    #[arg(long)]
    pub bucket_width: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// One function with --pivot, or two or more functions to rank
    #[arg(required = true, num_args = 1..)]
    pub function_names: Vec<String>,

    /// Pivot timestamp (RFC 3339) for a before/after comparison of a single function
    #[arg(long)]
    pub pivot: Option<String>,

    /// Time on each side of the pivot, or the lookback for multi-function comparison
    #[arg(long, default_value = "24h")]
    pub window: String,

    /// Lookback for multi-function comparison. Overrides --window.
    #[arg(long = "from")]
    pub from: Option<String>,

    /// Maximum number of invocations to fetch per function
    #[arg(long)]
    pub max_results: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BenchmarkArgs {
    /// Lambda function name or ARN
    pub function_name: String,

    /// Memory sizes in MB to test, comma separated (e.g. 128,256,512)
    #[arg(short, long, value_delimiter = ',')]
    pub memory: Vec<u32>,

    /// Invocations per memory configuration
    #[arg(short = 'n', long = "number")]
    pub invocations: Option<usize>,

    /// Maximum number of invocations in flight
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Retries per invocation after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base delay before the first retry, doubled for each later one (e.g. 200ms)
    #[arg(long)]
    pub retry_backoff: Option<String>,

    /// Time limit for a single invocation attempt (e.g. 30s)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Extra wait after a memory change has been applied (e.g. 5s)
    #[arg(long)]
    pub settle_time: Option<String>,

    /// Price per GB-second used for cost estimates
    #[arg(long)]
    pub price_per_gb_second: Option<f64>,

    /// JSON payload to send with each invocation
    #[arg(long, conflicts_with = "payload_file")]
    pub payload: Option<String>,

    /// JSON file containing the payload to send with each invocation
    #[arg(long = "payload-file", conflicts_with = "payload")]
    pub payload_file: Option<PathBuf>,

    /// Directory to save one JSON report per memory configuration
    #[arg(short = 'd', long = "output-dir")]
    pub output_dir: Option<PathBuf>,
}

impl ProfileConfig {
    /// The settings given on the command line, as the top configuration layer.
    pub fn from_cli_args(args: &CliArgs) -> Self {
        let mut profile = ProfileConfig {
            aws_region: args.aws_region.clone(),
            aws_profile: args.aws_profile.clone(),
            bucket_count: args.bucket_count,
            ..ProfileConfig::default()
        };
        match &args.command {
            Commands::Analyze(a) => {
                profile.max_results = a.max_results;
                profile.bucket_width = a.bucket_width.clone();
            }
            Commands::Compare(c) => {
                profile.max_results = c.max_results;
            }
            Commands::Benchmark(b) => {
                profile.memory = (!b.memory.is_empty()).then(|| b.memory.clone());
                profile.invocations = b.invocations;
                profile.concurrency = b.concurrency;
                profile.retries = b.retries;
                profile.retry_backoff = b.retry_backoff.clone();
                profile.invocation_timeout = b.timeout.clone();
                profile.settle_time = b.settle_time.clone();
                profile.price_per_gb_second = b.price_per_gb_second;
                profile.payload = b.payload.clone();
                profile.output_dir = b.output_dir.clone();
            }
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_benchmark_args_become_top_layer() {
        let args = CliArgs::parse_from([
            "thaw",
            "benchmark",
            "my-func",
            "--memory",
            "128,256,512",
            "-n",
            "20",
            "--timeout",
            "10s",
            "-vv",
        ]);
        assert_eq!(args.verbose, 2);
        let profile = ProfileConfig::from_cli_args(&args);
        assert_eq!(profile.memory, Some(vec![128, 256, 512]));
        assert_eq!(profile.invocations, Some(20));
        assert_eq!(profile.invocation_timeout.as_deref(), Some("10s"));
        assert_eq!(profile.concurrency, None);
    }

    #[test]
    fn test_compare_accepts_several_functions() {
        let args = CliArgs::parse_from(["thaw", "compare", "a", "b", "c", "--from", "7d", "--json"]);
        assert!(args.json);
        match args.command {
            Commands::Compare(c) => {
                assert_eq!(c.function_names, vec!["a", "b", "c"]);
                assert_eq!(c.from.as_deref(), Some("7d"));
                assert_eq!(c.window, "24h");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_payload_options_conflict() {
        let result = CliArgs::try_parse_from([
            "thaw",
            "benchmark",
            "f",
            "--payload",
            "{}",
            "--payload-file",
            "p.json",
        ]);
        assert!(result.is_err());
    }
}
