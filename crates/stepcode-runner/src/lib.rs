//! stepcode-runner — Local process sandboxes.
//!
//! Provisions a temporary workspace per session, installs the assignment's
//! requirements into it, and runs student programs with the system's
//! interpreters and compilers.

pub mod exec;
pub mod sandbox;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stepcode_core::error::SandboxError;
use stepcode_core::model::{ExecutionResult, Language};
use stepcode_core::traits::{ProvisionRequest, SandboxHandle, SandboxProvider};

use crate::exec::{command_in, run_command};
use crate::sandbox::Workspace;

/// Programs used by the local sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSandboxConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_npm")]
    pub npm: String,
    #[serde(default = "default_cxx")]
    pub cxx: String,
    /// Deadline for a single run, including compilation.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Deadline for installing requirements.
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_npm() -> String {
    "npm".to_string()
}

fn default_cxx() -> String {
    "g++".to_string()
}

fn default_run_timeout() -> u64 {
    30
}

fn default_install_timeout() -> u64 {
    300
}

impl Default for LocalSandboxConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            npm: default_npm(),
            cxx: default_cxx(),
            run_timeout_secs: default_run_timeout(),
            install_timeout_secs: default_install_timeout(),
        }
    }
}

/// Sandbox backend running code as local child processes.
pub struct LocalSandbox {
    config: LocalSandboxConfig,
    workspaces: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl LocalSandbox {
    pub fn new(config: LocalSandboxConfig) -> Self {
        Self {
            config,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    /// Number of workspaces currently provisioned.
    pub fn active(&self) -> usize {
        self.workspaces().len()
    }

    fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.config.run_timeout_secs)
    }

    fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.config.install_timeout_secs)
    }

    fn workspaces(&self) -> MutexGuard<'_, HashMap<String, Arc<Workspace>>> {
        self.workspaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn install_requirements(&self, workspace: &mut Workspace, requirements: &[String]) -> Result<()> {
        if requirements.is_empty() {
            return Ok(());
        }
        match workspace.language() {
            Language::Python => {
                let venv = workspace.venv_dir();
                let mut cmd = command_in(&self.config.python, workspace.work_dir(), &workspace.build_env());
                cmd.arg("-m").arg("venv").arg(&venv);
                expect_success(run_command(cmd, self.install_timeout()).await?, "python -m venv")?;

                let pip = venv.join("bin").join("pip");
                let mut cmd = command_in(&pip.to_string_lossy(), workspace.work_dir(), &workspace.build_env());
                cmd.arg("install").arg("--quiet").args(requirements);
                expect_success(run_command(cmd, self.install_timeout()).await?, "pip install")?;

                workspace.set_venv(venv);
            }
            Language::JavaScript => {
                let mut cmd = command_in(&self.config.npm, workspace.work_dir(), &workspace.build_env());
                cmd.arg("install").arg("--no-audit").arg("--no-fund").args(requirements);
                expect_success(run_command(cmd, self.install_timeout()).await?, "npm install")?;
            }
            Language::Cpp => {
                warn!(?requirements, "requirements are not supported for C++ and were ignored");
            }
        }
        info!(count = requirements.len(), "installed requirements");
        Ok(())
    }

    async fn run_in(&self, workspace: &Workspace, code: &str) -> Result<ExecutionResult> {
        let _guard = workspace.lock_runs().await;
        let source = workspace.write_source(code)?;
        let env = workspace.build_env();
        let dir = workspace.work_dir();

        match workspace.language() {
            Language::Python => {
                let python = match workspace.venv() {
                    Some(venv) => venv.join("bin").join("python").to_string_lossy().to_string(),
                    None => self.config.python.clone(),
                };
                let mut cmd = command_in(&python, dir, &env);
                cmd.arg(&source);
                run_command(cmd, self.run_timeout()).await
            }
            Language::JavaScript => {
                let mut cmd = command_in(&self.config.node, dir, &env);
                cmd.arg(&source);
                run_command(cmd, self.run_timeout()).await
            }
            Language::Cpp => {
                let binary = workspace.binary_path();
                let mut compile = command_in(&self.config.cxx, dir, &env);
                compile.arg("-std=c++17").arg("-O2").arg("-o").arg(&binary).arg(&source);
                let compiled = run_command(compile, self.run_timeout()).await?;
                if !compiled.succeeded() {
                    debug!("compilation failed");
                    return Ok(compiled);
                }
                let cmd = command_in(&binary.to_string_lossy(), dir, &env);
                let mut result = run_command(cmd, self.run_timeout()).await?;
                result.duration_ms += compiled.duration_ms;
                Ok(result)
            }
        }
    }
}

fn expect_success(result: ExecutionResult, step: &str) -> Result<()> {
    if result.succeeded() {
        return Ok(());
    }
    Err(SandboxError::Unavailable(format!(
        "{step} failed (exit {:?}): {}",
        result.exit_status,
        result.stderr.trim()
    ))
    .into())
}

#[async_trait]
impl SandboxProvider for LocalSandbox {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip(self, request), fields(env = %request.environment_name(), language = %request.language))]
    async fn provision(&self, request: &ProvisionRequest) -> Result<SandboxHandle> {
        let key = request.environment_name();
        let mut workspace = Workspace::new(&key, request.language)
            .map_err(|e| SandboxError::Unavailable(format!("{e:#}")))?;
        self.install_requirements(&mut workspace, &request.requirements)
            .await
            .context("failed to install requirements")?;

        debug!(dir = %workspace.work_dir().display(), "workspace ready");
        self.workspaces().insert(key.clone(), Arc::new(workspace));
        Ok(SandboxHandle {
            key,
            language: request.language,
        })
    }

    #[instrument(skip(self, handle, code), fields(env = %handle.key))]
    async fn execute(&self, handle: &SandboxHandle, code: &str) -> Result<ExecutionResult> {
        let workspace = self
            .workspaces()
            .get(&handle.key)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(handle.key.clone()))?;
        self.run_in(&workspace, code).await
    }

    #[instrument(skip(self, handle), fields(env = %handle.key))]
    async fn release(&self, handle: &SandboxHandle) -> Result<()> {
        match self.workspaces().remove(&handle.key) {
            Some(_) => debug!("workspace removed"),
            None => debug!("workspace already released"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcode_core::ids::AttemptId;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn request(language: Language) -> ProvisionRequest {
        ProvisionRequest {
            attempt_id: AttemptId::new(),
            assignment_id: "prefix-sum".into(),
            language,
            requirements: vec![],
        }
    }

    #[tokio::test]
    async fn runs_python_and_captures_output() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default());
        let handle = sandbox.provision(&request(Language::Python)).await.unwrap();

        let result = sandbox
            .execute(&handle, "xs = [1, 2, 3, 4]\nprint([sum(xs[:i + 1]) for i in range(len(xs))])")
            .await
            .unwrap();
        assert_eq!(result.stdout, "[1, 3, 6, 10]\n");
        assert!(result.stderr.is_empty());
        assert_eq!(result.exit_status, Some(0));

        let failing = sandbox.execute(&handle, "raise SystemExit('boom')").await.unwrap();
        assert!(failing.stderr.contains("boom"));
        assert_eq!(failing.exit_status, Some(1));

        sandbox.release(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn runaway_program_times_out() {
        if !python_available() {
            return;
        }
        let sandbox = LocalSandbox::new(LocalSandboxConfig {
            run_timeout_secs: 1,
            ..Default::default()
        });
        let handle = sandbox.provision(&request(Language::Python)).await.unwrap();
        let err = sandbox.execute(&handle, "while True:\n    pass").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxError>(),
            Some(SandboxError::Timeout(1000))
        ));
    }

    #[tokio::test]
    async fn release_is_idempotent_and_forgets_workspace() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default());
        let handle = sandbox.provision(&request(Language::Python)).await.unwrap();
        assert_eq!(sandbox.active(), 1);

        sandbox.release(&handle).await.unwrap();
        sandbox.release(&handle).await.unwrap();
        assert_eq!(sandbox.active(), 0);

        let err = sandbox.execute(&handle, "print(1)").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxError>(),
            Some(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_interpreter_is_reported() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig {
            node: "no-such-node-binary".into(),
            ..Default::default()
        });
        let handle = sandbox.provision(&request(Language::JavaScript)).await.unwrap();
        let err = sandbox.execute(&handle, "console.log(1)").await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn config_defaults_from_empty_toml() {
        let config: LocalSandboxConfig = toml::from_str("").unwrap();
        assert_eq!(config.python, "python3");
        assert_eq!(config.cxx, "g++");
        assert_eq!(config.run_timeout_secs, 30);
    }
}
