//! AWS Lambda as an [`InvocationTarget`].

use crate::benchmark::{InvocationOutput, InvocationTarget, TargetError};
use async_trait::async_trait;
use aws_sdk_lambda::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{LastUpdateStatus, LogType};
use aws_sdk_lambda::Client as LambdaClient;
use base64::Engine;
use std::time::Duration;
use tracing::debug;

const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const UPDATE_POLL_ATTEMPTS: usize = 60;

/// Maps an SDK error to a [`TargetError`] using the service error code.
fn classify<E, R>(err: SdkError<E, R>, on_service_error: fn(String) -> TargetError) -> TargetError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or_default().to_string();
            let msg = format!(
                "Service error: {} ({})",
                context.err().message().unwrap_or_default(),
                code
            );
            match code.as_str() {
                "ResourceNotFoundException" | "AccessDeniedException" => {
                    TargetError::Unreachable(msg)
                }
                "TooManyRequestsException" | "ResourceConflictException" => {
                    TargetError::Throttled(msg)
                }
                _ => on_service_error(msg),
            }
        }
        SdkError::TimeoutError(_) => TargetError::Other("SDK request timed out".to_string()),
        other_err => TargetError::Other(format!("SDK error: {}", other_err)),
    }
}

/// A deployed function, invoked with `LogType::Tail` so each response carries its own
/// platform report.
pub struct LambdaTarget {
    client: LambdaClient,
    function_name: String,
    payload: Option<String>,
    settle_time: Duration,
}

impl LambdaTarget {
    pub fn new(client: LambdaClient, function_name: impl Into<String>) -> Self {
        Self {
            client,
            function_name: function_name.into(),
            payload: None,
            settle_time: crate::config::DEFAULT_SETTLE_TIME,
        }
    }

    /// JSON payload sent with every invocation. Defaults to `{}`.
    pub fn with_payload(mut self, payload: Option<String>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    async fn wait_for_update(&self) -> Result<(), TargetError> {
        for _ in 0..UPDATE_POLL_ATTEMPTS {
            let config = self
                .client
                .get_function_configuration()
                .function_name(&self.function_name)
                .send()
                .await
                .map_err(|e| classify(e, TargetError::Other))?;
            match config.last_update_status() {
                Some(LastUpdateStatus::Successful) | None => return Ok(()),
                Some(LastUpdateStatus::Failed) => {
                    return Err(TargetError::ConfigurationRejected(format!(
                        "Update failed: {}",
                        config.last_update_status_reason().unwrap_or("unknown reason")
                    )));
                }
                Some(status) => {
                    debug!(function = %self.function_name, status = %status.as_str(), "Waiting for configuration update");
                    tokio::time::sleep(UPDATE_POLL_INTERVAL).await;
                }
            }
        }
        Err(TargetError::Other(format!(
            "Configuration update of '{}' did not complete in time",
            self.function_name
        )))
    }
}

#[async_trait]
impl InvocationTarget for LambdaTarget {
    fn name(&self) -> &str {
        &self.function_name
    }

    async fn current_memory(&self) -> Result<u32, TargetError> {
        let config = self
            .client
            .get_function_configuration()
            .function_name(&self.function_name)
            .send()
            .await
            .map_err(|e| classify(e, TargetError::Unreachable))?;
        let memory = config.memory_size().unwrap_or(128);
        u32::try_from(memory)
            .map_err(|_| TargetError::Other(format!("Unexpected memory size: {}", memory)))
    }

    async fn apply_memory(&self, memory_mb: u32) -> Result<Duration, TargetError> {
        let memory = i32::try_from(memory_mb).map_err(|_| {
            TargetError::ConfigurationRejected(format!("Memory size out of range: {}", memory_mb))
        })?;
        self.client
            .update_function_configuration()
            .function_name(&self.function_name)
            .memory_size(memory)
            .send()
            .await
            .map_err(|e| classify(e, TargetError::ConfigurationRejected))?;
        self.wait_for_update().await?;
        Ok(self.settle_time)
    }

    async fn invoke(&self) -> Result<InvocationOutput, TargetError> {
        let payload = self.payload.as_deref().unwrap_or("{}");
        let response = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .log_type(LogType::Tail)
            .payload(Blob::new(payload.as_bytes().to_vec()))
            .send()
            .await
            .map_err(|e| classify(e, TargetError::Other))?;

        if let Some(function_error) = response.function_error() {
            return Err(TargetError::FunctionError(function_error.to_string()));
        }

        let tail = response.log_result().ok_or(TargetError::MissingReport)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(tail)
            .map_err(|e| TargetError::Other(format!("Failed to decode log tail: {}", e)))?;
        Ok(InvocationOutput::LogTail(
            String::from_utf8_lossy(&decoded).into_owned(),
        ))
    }
}
