//! Remote code-execution API backend.
//!
//! The API keeps one named environment per sandbox session. Environments
//! are created with the assignment's language and requirements, receive code
//! to run, and are deleted on release.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use stepcode_core::error::SandboxError;
use stepcode_core::model::{ExecutionResult, Language};
use stepcode_core::traits::{ProvisionRequest, SandboxHandle, SandboxProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
/// Provisioning installs packages, so requests may take a while.
const DEFAULT_TIMEOUT_SECS: u64 = 180;
/// What the API reports when it runs past its own deadline.
const API_TIMEOUT_MS: u64 = 30_000;

/// Sandbox backend backed by the remote execution API.
pub struct ExecutionApiSandbox {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ExecutionApiSandbox {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> SandboxError {
        if e.is_timeout() {
            SandboxError::Timeout(self.timeout_secs * 1000)
        } else if e.is_connect() {
            SandboxError::Unavailable(format!(
                "execution API not reachable at {}",
                self.base_url
            ))
        } else {
            SandboxError::Unavailable(e.to_string())
        }
    }

    /// Environments the API currently holds.
    pub async fn list_environments(&self) -> anyhow::Result<Vec<RemoteEnvironment>> {
        let response = self
            .client
            .get(format!("{}/list/assignments", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = check_status(response).await?;

        let listing: ListResponse = response.json().await.map_err(|e| SandboxError::Backend {
            status: 0,
            message: format!("failed to parse listing: {e}"),
        })?;
        Ok(listing.assignments)
    }
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    assignment_name: &'a str,
    language: &'static str,
    requirements: &'a [String],
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    assignment_name: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
    /// Seconds.
    #[serde(default)]
    execution_time: f64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    assignments: Vec<RemoteEnvironment>,
}

/// An environment as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEnvironment {
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub created_at: String,
}

fn api_language(language: Language) -> &'static str {
    match language {
        Language::Python => "python",
        Language::JavaScript => "javascript",
        Language::Cpp => "cpp",
    }
}

/// Turn an error status into a `SandboxError`, passing successes through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SandboxError> {
    let status = response.status().as_u16();
    if status < 400 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.detail)
        .unwrap_or(body);
    if status == 404 {
        return Err(SandboxError::NotFound(message));
    }
    Err(SandboxError::Backend { status, message })
}

/// The API reports its own execution timeout as a normal response.
fn reported_timeout(error: &str) -> bool {
    error.to_lowercase().contains("execution timed out after")
}

#[async_trait]
impl SandboxProvider for ExecutionApiSandbox {
    fn name(&self) -> &str {
        "remote"
    }

    #[instrument(skip(self, request), fields(env = %request.environment_name()))]
    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<SandboxHandle> {
        let name = request.environment_name();
        let body = CreateRequest {
            assignment_name: &name,
            language: api_language(request.language),
            requirements: &request.requirements,
        };

        let response = self
            .client
            .post(format!("{}/create/assignment", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        check_status(response).await?;

        debug!("remote environment created");
        Ok(SandboxHandle {
            key: name,
            language: request.language,
        })
    }

    #[instrument(skip(self, handle, code), fields(env = %handle.key))]
    async fn execute(&self, handle: &SandboxHandle, code: &str) -> anyhow::Result<ExecutionResult> {
        let start = Instant::now();
        let body = ExecuteRequest {
            assignment_name: &handle.key,
            code,
        };

        let response = self
            .client
            .post(format!("{}/execute/code", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = check_status(response).await?;

        let api_response: ExecuteResponse =
            response.json().await.map_err(|e| SandboxError::Backend {
                status: 0,
                message: format!("failed to parse response: {e}"),
            })?;

        if api_response.output.is_empty() && reported_timeout(&api_response.error) {
            return Err(SandboxError::Timeout(API_TIMEOUT_MS).into());
        }

        let duration_ms = if api_response.execution_time > 0.0 {
            (api_response.execution_time * 1000.0).round() as u64
        } else {
            start.elapsed().as_millis() as u64
        };

        Ok(ExecutionResult {
            stdout: api_response.output,
            stderr: api_response.error,
            exit_status: None,
            duration_ms,
        })
    }

    #[instrument(skip(self, handle), fields(env = %handle.key))]
    async fn release(&self, handle: &SandboxHandle) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(format!("{}/delete/assignment/{}", self.base_url, handle.key))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(SandboxError::NotFound(_)) => {
                debug!("remote environment already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
