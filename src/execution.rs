//! Client for the external code-execution service.
//!
//! Code is only ever executed by the remote sandbox. The client validates a
//! submission, posts `{code, language}` and maps every failure (network,
//! timeout, non-2xx status, unreadable body) to an [`ExecutionError`] the
//! caller can show to the user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Errors that can occur while running code remotely
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Nothing to run: submission is empty")]
    EmptySubmission,

    #[error("Execution request failed: {0}")]
    Request(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid execution response: {0}")]
    InvalidResponse(String),
}

/// A submission to the execution service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }

    /// Reject submissions that should never reach the network
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.code.trim().is_empty() {
            return Err(ExecutionError::EmptySubmission);
        }
        Ok(())
    }
}

/// Result reported by the execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Server-reported run time in milliseconds
    #[serde(rename = "executionTime", default)]
    pub execution_time_ms: f64,
}

impl ExecutionOutput {
    pub fn has_errors(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Anything that can run a submission
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutput, ExecutionError>;
}

/// HTTP client for the execution service
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CodeExecutor for HttpExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutput, ExecutionError> {
        request.validate()?;

        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Execution service returned {} for {}", status, request.language);
            return Err(ExecutionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let output: ExecutionOutput = response
            .json()
            .await
            .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))?;

        debug!(
            "Executed {} in {:?} (server reported {} ms)",
            request.language,
            start.elapsed(),
            output.execution_time_ms
        );

        Ok(output)
    }
}

impl HttpExecutor {
    fn map_error(&self, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout(self.timeout)
        } else {
            ExecutionError::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_validate_rejects_blank_code() {
        assert_err!(ExecutionRequest::new("  \n\t", "python").validate());
        assert_ok!(ExecutionRequest::new("print(1)", "python").validate());
    }

    #[tokio::test]
    async fn test_empty_submission_never_hits_network() {
        // Nothing listens here; reaching the network would give a Request error
        let executor = HttpExecutor::new("http://127.0.0.1:9/run", Duration::from_secs(1)).unwrap();
        let result = executor.execute(ExecutionRequest::new("", "javascript")).await;
        assert!(matches!(result, Err(ExecutionError::EmptySubmission)));
    }

    #[test]
    fn test_output_parses_service_body() {
        let body = r#"{"stdout":"3\n","stderr":"","executionTime":12.5}"#;
        let output: ExecutionOutput = serde_json::from_str(body).unwrap();
        assert_eq!(output.stdout, "3\n");
        assert_eq!(output.execution_time_ms, 12.5);
        assert!(!output.has_errors());
    }

    #[test]
    fn test_output_tolerates_missing_streams() {
        let output: ExecutionOutput = serde_json::from_str(r#"{"stderr":"boom"}"#).unwrap();
        assert!(output.stdout.is_empty());
        assert!(output.has_errors());
    }

    #[test]
    fn test_request_wire_shape() {
        let value = serde_json::to_value(ExecutionRequest::new("1+1", "javascript")).unwrap();
        assert_eq!(value, serde_json::json!({ "code": "1+1", "language": "javascript" }));
    }
}
