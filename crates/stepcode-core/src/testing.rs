//! In-crate sandbox double for coordinator and navigator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::model::ExecutionResult;
use crate::traits::{ProvisionRequest, SandboxHandle, SandboxProvider};

pub struct FakeSandbox {
    stdout: String,
    scripted: Vec<(String, String)>,
    provision_delay: Duration,
    execute_delay: Duration,
    fail_provision: bool,
    execute_error: Option<fn() -> SandboxError>,
    provisions: AtomicUsize,
    releases: AtomicUsize,
    executions: AtomicUsize,
    last_code: Mutex<Option<String>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            stdout: String::new(),
            scripted: Vec::new(),
            provision_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            fail_provision: false,
            execute_error: None,
            provisions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            last_code: Mutex::new(None),
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    /// Print `stdout` whenever the code contains `needle`.
    pub fn with_output_for(mut self, needle: &str, stdout: &str) -> Self {
        self.scripted.push((needle.to_string(), stdout.to_string()));
        self
    }

    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = delay;
        self
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    pub fn with_execute_error(mut self, error: fn() -> SandboxError) -> Self {
        self.execute_error = Some(error);
        self
    }

    pub fn failing_provision(mut self) -> Self {
        self.fail_provision = true;
        self
    }

    pub fn provisioned(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    fn name(&self) -> &str {
        "fake"
    }

    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<SandboxHandle> {
        if !self.provision_delay.is_zero() {
            tokio::time::sleep(self.provision_delay).await;
        }
        if self.fail_provision {
            return Err(SandboxError::Unavailable("fake backend is down".into()).into());
        }
        self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle {
            key: request.environment_name(),
            language: request.language,
        })
    }

    async fn execute(&self, _handle: &SandboxHandle, code: &str) -> anyhow::Result<ExecutionResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(code.to_string());
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        if let Some(error) = self.execute_error {
            return Err(error().into());
        }
        let stdout = self
            .scripted
            .iter()
            .find(|(needle, _)| code.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| self.stdout.clone());
        Ok(ExecutionResult {
            stdout,
            stderr: String::new(),
            exit_status: Some(0),
            duration_ms: 1,
        })
    }

    async fn release(&self, _handle: &SandboxHandle) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
