//! Fetching platform reports from CloudWatch Logs.

use crate::parser::RecordParser;
use crate::sample::{FetchStats, SampleSet};
use crate::types::{LogEvent, TimeWindow};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::Client as CwlClient;
use aws_sdk_lambda::types::LogFormat;
use aws_sdk_lambda::Client as LambdaClient;
use chrono::{DateTime, Utc};

pub const TEXT_REPORT_FILTER: &str = "REPORT RequestId";
pub const JSON_REPORT_FILTER: &str = r#"{ $.type = "platform.report" }"#;

/// Anything that can hand back the raw report events of a function for a time window.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch(&self, function: &str, window: &TimeWindow) -> Result<Vec<LogEvent>>;
}

/// Where a function logs to, and in which format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroupTarget {
    pub log_group: String,
    pub json_format: bool,
}

impl LogGroupTarget {
    pub fn filter_pattern(&self) -> &'static str {
        if self.json_format {
            JSON_REPORT_FILTER
        } else {
            TEXT_REPORT_FILTER
        }
    }
}

/// Name of the default log group for a function name or ARN.
pub fn default_log_group(function: &str) -> String {
    let name = if function.starts_with("arn:") {
        function
            .split(":function:")
            .nth(1)
            .and_then(|rest| rest.split(':').next())
            .unwrap_or(function)
    } else {
        function
    };
    format!("/aws/lambda/{}", name)
}

pub struct CloudWatchLogSource {
    logs: CwlClient,
    lambda: LambdaClient,
    max_results: usize,
}

impl CloudWatchLogSource {
    pub fn new(logs: CwlClient, lambda: LambdaClient, max_results: usize) -> Self {
        Self {
            logs,
            lambda,
            max_results,
        }
    }

    /// Looks up the function's log group. A custom `LoggingConfig` group wins over
    /// `/aws/lambda/<name>`; lookup failures other than not-found or access-denied fall
    /// back to the default name.
    pub async fn resolve_log_group(&self, function: &str) -> Result<LogGroupTarget> {
        match self
            .lambda
            .get_function_configuration()
            .function_name(function)
            .send()
            .await
        {
            Ok(config) => {
                let logging = config.logging_config();
                let json_format = matches!(
                    logging.and_then(|l| l.log_format()),
                    Some(LogFormat::Json)
                );
                let log_group = match logging.and_then(|l| l.log_group()) {
                    Some(group) => group.to_string(),
                    None => default_log_group(config.function_name().unwrap_or(function)),
                };
                tracing::debug!(function, %log_group, json_format, "Resolved log group");
                Ok(LogGroupTarget {
                    log_group,
                    json_format,
                })
            }
            Err(SdkError::ServiceError(context)) => {
                let code = context.err().code().unwrap_or_default();
                match code {
                    "ResourceNotFoundException" => Err(anyhow!(
                        "Lambda function '{}' not found. Check the function name and region.",
                        function
                    )),
                    "AccessDeniedException" => Err(anyhow!(
                        "Access denied to Lambda function '{}'. Ensure you have lambda:GetFunctionConfiguration permission.",
                        function
                    )),
                    _ => {
                        tracing::warn!(function, code, "Could not read function configuration, using default log group");
                        Ok(LogGroupTarget {
                            log_group: default_log_group(function),
                            json_format: false,
                        })
                    }
                }
            }
            Err(other_err) => {
                tracing::warn!(function, error = %other_err, "Could not read function configuration, using default log group");
                Ok(LogGroupTarget {
                    log_group: default_log_group(function),
                    json_format: false,
                })
            }
        }
    }

    async fn filter_log_events(
        &self,
        target: &LogGroupTarget,
        window: &TimeWindow,
    ) -> Result<Vec<LogEvent>> {
        let mut next_token: Option<String> = None;
        let mut events = Vec::new();
        let mut pages = 0usize;

        loop {
            let mut request_builder = self
                .logs
                .filter_log_events()
                .log_group_name(&target.log_group)
                .start_time(window.start.timestamp_millis())
                .end_time(window.end.timestamp_millis())
                .filter_pattern(target.filter_pattern());
            if let Some(token) = next_token.take() {
                request_builder = request_builder.next_token(token);
            }

            let output = request_builder.send().await.map_err(|err| {
                let message = match &err {
                    SdkError::ServiceError(context) => match context.err().code() {
                        Some("ResourceNotFoundException") => format!(
                            "Log group '{}' not found. Ensure the function exists and has been invoked.",
                            target.log_group
                        ),
                        Some("AccessDeniedException") => format!(
                            "Access denied to log group '{}'. Check your AWS credentials and IAM permissions.",
                            target.log_group
                        ),
                        code => format!(
                            "CloudWatch error ({}): {}",
                            code.unwrap_or("Unknown"),
                            context.err().message().unwrap_or_default()
                        ),
                    },
                    other_err => format!("CloudWatch request failed: {}", other_err),
                };
                anyhow!(message)
            })?;
            pages += 1;

            for event in output.events() {
                let (Some(timestamp), Some(message)) = (event.timestamp(), event.message()) else {
                    continue;
                };
                let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(timestamp) else {
                    tracing::debug!(timestamp, "Skipping event with out-of-range timestamp");
                    continue;
                };
                events.push(LogEvent::new(timestamp, message));
            }
            tracing::trace!(log_group = %target.log_group, pages, events = events.len(), "Fetched page");

            if events.len() >= self.max_results {
                events.truncate(self.max_results);
                tracing::info!(max_results = self.max_results, "Reached result limit, stopping fetch");
                break;
            }
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl LogSource for CloudWatchLogSource {
    #[tracing::instrument(skip_all, fields(function = %function))]
    async fn fetch(&self, function: &str, window: &TimeWindow) -> Result<Vec<LogEvent>> {
        let target = self.resolve_log_group(function).await?;
        self.filter_log_events(&target, window).await
    }
}

/// Fetches a window of reports and turns them into a sample set.
pub async fn fetch_sample_set(
    source: &dyn LogSource,
    parser: &RecordParser,
    function: &str,
    window: TimeWindow,
) -> Result<(SampleSet, FetchStats)> {
    let events = source
        .fetch(function, &window)
        .await
        .with_context(|| format!("Failed to fetch logs for '{}'", function))?;
    let (set, stats) = SampleSet::from_events(function, window, &events, parser);
    tracing::info!(
        function,
        events = stats.events,
        records = set.size(),
        malformed = stats.malformed,
        "Fetched sample set"
    );
    Ok((set, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    struct StaticSource(Vec<LogEvent>);

    #[async_trait]
    impl LogSource for StaticSource {
        async fn fetch(&self, _function: &str, _window: &TimeWindow) -> Result<Vec<LogEvent>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl LogSource for FailingSource {
        async fn fetch(&self, _function: &str, _window: &TimeWindow) -> Result<Vec<LogEvent>> {
            Err(anyhow!("Log group not found"))
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn report(id: &str, duration: f64, init: Option<f64>) -> String {
        let init = init
            .map(|i| format!("\tInit Duration: {:.2} ms", i))
            .unwrap_or_default();
        format!(
            "REPORT RequestId: {}\tDuration: {:.2} ms\tBilled Duration: {} ms\tMemory Size: 256 MB\tMax Memory Used: 80 MB{}",
            id,
            duration,
            duration.ceil(),
            init
        )
    }

    #[test]
    fn test_default_log_group() {
        assert_eq!(default_log_group("my-func"), "/aws/lambda/my-func");
        assert_eq!(
            default_log_group("arn:aws:lambda:us-east-1:123456789012:function:my-func"),
            "/aws/lambda/my-func"
        );
        assert_eq!(
            default_log_group("arn:aws:lambda:us-east-1:123456789012:function:my-func:live"),
            "/aws/lambda/my-func"
        );
    }

    #[test]
    fn test_filter_pattern_follows_log_format() {
        let text = LogGroupTarget {
            log_group: "/aws/lambda/f".to_string(),
            json_format: false,
        };
        assert_eq!(text.filter_pattern(), TEXT_REPORT_FILTER);
        let json = LogGroupTarget {
            json_format: true,
            ..text
        };
        assert_eq!(json.filter_pattern(), JSON_REPORT_FILTER);
    }

    #[tokio::test]
    async fn test_fetch_sample_set_parses_and_bounds() {
        let window = TimeWindow::new(base(), base() + Duration::hours(1));
        let source = StaticSource(vec![
            LogEvent::new(base() + Duration::minutes(1), report("a", 100.0, None)),
            LogEvent::new(base() + Duration::minutes(2), report("b", 450.0, Some(120.0))),
            LogEvent::new(base() + Duration::minutes(3), "START RequestId: c Version: $LATEST"),
            LogEvent::new(base() + Duration::minutes(4), report("a", 100.0, None)),
            LogEvent::new(base() + Duration::hours(2), report("d", 110.0, None)),
        ]);

        let (set, stats) = fetch_sample_set(&source, &RecordParser::new(), "my-func", window)
            .await
            .unwrap();

        assert_eq!(set.size(), 2);
        assert_eq!(set.window(), Some(&window));
        assert_eq!(stats.events, 5);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.out_of_window, 1);
        assert!(set.records()[1].is_cold_start());
    }

    #[tokio::test]
    async fn test_fetch_sample_set_propagates_source_errors() {
        let window = TimeWindow::new(base(), base() + Duration::hours(1));
        let err = fetch_sample_set(&FailingSource, &RecordParser::new(), "my-func", window)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("my-func"));
        assert!(format!("{:#}", err).contains("Log group not found"));
    }
}
