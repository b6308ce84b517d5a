//! Mock sandbox for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use stepcode_core::error::SandboxError;
use stepcode_core::model::ExecutionResult;
use stepcode_core::traits::{ProvisionRequest, SandboxHandle, SandboxProvider};

/// A mock sandbox for exercising the engine without running code.
///
/// Returns configurable output based on code content matching.
pub struct MockSandbox {
    /// Map of code substring → stdout.
    outputs: HashMap<String, String>,
    /// Default stdout if no code matches.
    default_output: String,
    provision_delay: Duration,
    execute_delay: Duration,
    fail_provision: bool,
    time_out_runs: bool,
    provision_count: AtomicU32,
    execute_count: AtomicU32,
    release_count: AtomicU32,
    /// Last code received.
    last_code: Mutex<Option<String>>,
    live: Mutex<Vec<String>>,
}

impl MockSandbox {
    /// Create a mock with the given code→stdout mappings.
    pub fn new(outputs: HashMap<String, String>) -> Self {
        Self {
            outputs,
            default_output: String::new(),
            provision_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            fail_provision: false,
            time_out_runs: false,
            provision_count: AtomicU32::new(0),
            execute_count: AtomicU32::new(0),
            release_count: AtomicU32::new(0),
            last_code: Mutex::new(None),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always prints the same output.
    pub fn with_fixed_output(output: &str) -> Self {
        Self::new(HashMap::new()).with_default_output(output)
    }

    /// Stdout for code that matches no mapping.
    pub fn with_default_output(mut self, output: &str) -> Self {
        self.default_output = output.to_string();
        self
    }

    /// Delay every provisioning call.
    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = delay;
        self
    }

    /// Delay every execution.
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Make provisioning fail as if the backend were down.
    pub fn failing_provision(mut self) -> Self {
        self.fail_provision = true;
        self
    }

    /// Make every run report a backend timeout.
    pub fn timing_out(mut self) -> Self {
        self.time_out_runs = true;
        self
    }

    pub fn provision_count(&self) -> u32 {
        self.provision_count.load(Ordering::Relaxed)
    }

    pub fn execute_count(&self) -> u32 {
        self.execute_count.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u32 {
        self.release_count.load(Ordering::Relaxed)
    }

    /// Environments provisioned and not yet released.
    pub fn live_environments(&self) -> Vec<String> {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Get the last code run in this sandbox.
    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SandboxProvider for MockSandbox {
    fn name(&self) -> &str {
        "mock"
    }

    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<SandboxHandle> {
        if !self.provision_delay.is_zero() {
            tokio::time::sleep(self.provision_delay).await;
        }
        if self.fail_provision {
            return Err(SandboxError::Unavailable("mock backend is down".into()).into());
        }
        self.provision_count.fetch_add(1, Ordering::Relaxed);
        let key = request.environment_name();
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());
        Ok(SandboxHandle {
            key,
            language: request.language,
        })
    }

    async fn execute(&self, handle: &SandboxHandle, code: &str) -> anyhow::Result<ExecutionResult> {
        self.execute_count.fetch_add(1, Ordering::Relaxed);
        *self.last_code.lock().unwrap_or_else(|e| e.into_inner()) = Some(code.to_string());

        if !self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&handle.key)
        {
            return Err(SandboxError::NotFound(handle.key.clone()).into());
        }
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        if self.time_out_runs {
            return Err(SandboxError::Timeout(30_000).into());
        }

        // Longest matching key wins so overlapping keys are deterministic.
        let stdout = self
            .outputs
            .iter()
            .filter(|(key, _)| code.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_output.clone());

        Ok(ExecutionResult {
            stdout,
            stderr: String::new(),
            exit_status: Some(0),
            duration_ms: 1,
        })
    }

    async fn release(&self, handle: &SandboxHandle) -> anyhow::Result<()> {
        self.release_count.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|k| k != &handle.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcode_core::ids::AttemptId;
    use stepcode_core::model::Language;

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            attempt_id: AttemptId::new(),
            assignment_id: "lists".into(),
            language: Language::Python,
            requirements: vec![],
        }
    }

    #[tokio::test]
    async fn fixed_output() {
        let sandbox = MockSandbox::with_fixed_output("hello\n");
        let handle = sandbox.provision(&request()).await.unwrap();
        let result = sandbox.execute(&handle, "anything").await.unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(sandbox.execute_count(), 1);
        assert_eq!(sandbox.last_code().as_deref(), Some("anything"));
    }

    #[tokio::test]
    async fn code_matching() {
        let mut outputs = HashMap::new();
        outputs.insert("prefix".to_string(), "[1, 3, 6, 10]".to_string());
        outputs.insert("prefix_sum".to_string(), "specific".to_string());
        let sandbox = MockSandbox::new(outputs);
        let handle = sandbox.provision(&request()).await.unwrap();

        let r = sandbox.execute(&handle, "print(prefix(xs))").await.unwrap();
        assert_eq!(r.stdout, "[1, 3, 6, 10]");
        let r = sandbox.execute(&handle, "prefix_sum(xs)").await.unwrap();
        assert_eq!(r.stdout, "specific");
    }

    #[tokio::test]
    async fn released_environment_is_not_found() {
        let sandbox = MockSandbox::with_fixed_output("");
        let handle = sandbox.provision(&request()).await.unwrap();
        assert_eq!(sandbox.live_environments().len(), 1);
        sandbox.release(&handle).await.unwrap();
        assert!(sandbox.live_environments().is_empty());

        let err = sandbox.execute(&handle, "x").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxError>(),
            Some(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures() {
        let down = MockSandbox::with_fixed_output("").failing_provision();
        assert!(down.provision(&request()).await.is_err());
        assert_eq!(down.provision_count(), 0);

        let slow = MockSandbox::with_fixed_output("").timing_out();
        let handle = slow.provision(&request()).await.unwrap();
        let err = slow.execute(&handle, "x").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxError>(),
            Some(SandboxError::Timeout(30_000))
        ));
    }
}
