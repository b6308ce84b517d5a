//! Configuration and sandbox factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use stepcode_core::model::Role;
use stepcode_core::session::CoordinatorConfig;
use stepcode_core::traits::SandboxProvider;
use stepcode_runner::{LocalSandbox, LocalSandboxConfig};

use crate::error::ConfigError;
use crate::http::ExecutionApiSandbox;
use crate::mock::MockSandbox;

/// Which sandbox backend runs student code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SandboxConfig {
    /// Child processes on this machine.
    Local(LocalSandboxConfig),
    /// The remote code-execution API.
    Remote {
        #[serde(default)]
        base_url: String,
        #[serde(default = "default_remote_timeout")]
        timeout_secs: u64,
    },
    /// Scripted output; nothing is executed.
    Mock {
        /// Code substring → stdout.
        #[serde(default)]
        outputs: HashMap<String, String>,
        #[serde(default)]
        default_output: String,
    },
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig::Local(LocalSandboxConfig::default())
    }
}

fn default_remote_timeout() -> u64 {
    180
}

/// A configured user.
///
/// Note: Custom Debug impl masks tokens to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub role: Role,
    /// Session token that identifies this user.
    #[serde(default)]
    pub token: Option<String>,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("role", &self.role)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Top-level stepcode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepcodeConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Deadline for provisioning a sandbox.
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_secs: u64,
    /// Deadline for a single run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Directory of assignment TOML files.
    #[serde(default = "default_assignments_dir")]
    pub assignments_dir: PathBuf,
    /// Directory attempt snapshots are stored in.
    #[serde(default = "default_progress_dir")]
    pub progress_dir: PathBuf,
    /// Users keyed by name.
    #[serde(default)]
    pub users: HashMap<String, UserConfig>,
}

fn default_provision_timeout() -> u64 {
    120
}
fn default_run_timeout() -> u64 {
    30
}
fn default_assignments_dir() -> PathBuf {
    PathBuf::from("assignments")
}
fn default_progress_dir() -> PathBuf {
    PathBuf::from(".stepcode/progress")
}

impl Default for StepcodeConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            provision_timeout_secs: default_provision_timeout(),
            run_timeout_secs: default_run_timeout(),
            assignments_dir: default_assignments_dir(),
            progress_dir: default_progress_dir(),
            users: HashMap::new(),
        }
    }
}

impl StepcodeConfig {
    /// Deadlines for the session coordinator.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            provision_timeout: Duration::from_secs(self.provision_timeout_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }

    /// Check settings that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, user) in &self.users {
            if user.role == Role::Anonymous {
                return Err(ConfigError::InvalidRole {
                    user: name.clone(),
                    role: user.role.to_string(),
                });
            }
        }
        if let SandboxConfig::Remote { base_url, .. } = &self.sandbox {
            if base_url.is_empty() {
                return Err(ConfigError::MissingExecutionUrl);
            }
        }
        Ok(())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `stepcode.toml` in the current directory
/// 2. `~/.config/stepcode/config.toml`
///
/// Environment variable override: `STEPCODE_EXECUTION_URL` selects the
/// remote sandbox at that URL.
pub fn load_config() -> Result<StepcodeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<StepcodeConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            return Err(ConfigError::NotFound(p.to_path_buf()).into());
        }
    } else {
        let local = PathBuf::from("stepcode.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<StepcodeConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => StepcodeConfig::default(),
    };

    // Apply env var overrides
    if let Ok(url) = std::env::var("STEPCODE_EXECUTION_URL") {
        match &mut config.sandbox {
            SandboxConfig::Remote { base_url, .. } => *base_url = url,
            other => {
                *other = SandboxConfig::Remote {
                    base_url: url,
                    timeout_secs: default_remote_timeout(),
                }
            }
        }
    }

    resolve_config(&mut config);
    config.validate()?;
    tracing::debug!(path = ?config_path, sandbox = ?config.sandbox, "configuration loaded");
    Ok(config)
}

/// Resolve env vars in every string setting that may reference them.
fn resolve_config(config: &mut StepcodeConfig) {
    if let SandboxConfig::Remote { base_url, .. } = &mut config.sandbox {
        *base_url = resolve_env_vars(base_url);
    }
    for user in config.users.values_mut() {
        if let Some(token) = &mut user.token {
            *token = resolve_env_vars(token);
        }
    }
    config.assignments_dir = PathBuf::from(resolve_env_vars(&config.assignments_dir.to_string_lossy()));
    config.progress_dir = PathBuf::from(resolve_env_vars(&config.progress_dir.to_string_lossy()));
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("stepcode"))
}

/// Create a sandbox backend from its configuration.
pub fn create_sandbox(config: &SandboxConfig) -> Result<Arc<dyn SandboxProvider>> {
    match config {
        SandboxConfig::Local(local) => Ok(Arc::new(LocalSandbox::new(local.clone()))),
        SandboxConfig::Remote {
            base_url,
            timeout_secs,
        } => {
            if base_url.is_empty() {
                return Err(ConfigError::MissingExecutionUrl.into());
            }
            Ok(Arc::new(ExecutionApiSandbox::with_timeout(
                base_url,
                *timeout_secs,
            )?))
        }
        SandboxConfig::Mock {
            outputs,
            default_output,
        } => {
            let mock = MockSandbox::new(outputs.clone()).with_default_output(default_output);
            Ok(Arc::new(mock))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_STEPCODE_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_STEPCODE_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_STEPCODE_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_STEPCODE_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = StepcodeConfig::default();
        assert!(matches!(config.sandbox, SandboxConfig::Local(_)));
        assert_eq!(config.provision_timeout_secs, 120);
        assert_eq!(config.run_timeout_secs, 30);
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.run_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
provision_timeout_secs = 60
assignments_dir = "content"

[sandbox]
type = "remote"
base_url = "http://exec.internal:8000"

[users.alice]
role = "student"
token = "alice-token"

[users.prof]
role = "teacher"
"#;
        let config: StepcodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provision_timeout_secs, 60);
        assert_eq!(config.assignments_dir, PathBuf::from("content"));
        assert!(matches!(
            &config.sandbox,
            SandboxConfig::Remote { base_url, timeout_secs: 180 } if base_url == "http://exec.internal:8000"
        ));
        assert_eq!(config.users["prof"].role, Role::Teacher);
        config.validate().unwrap();
    }

    #[test]
    fn parse_local_and_mock_sandboxes() {
        let local: StepcodeConfig = toml::from_str(
            r#"
[sandbox]
type = "local"
python = "/usr/bin/python3.12"
"#,
        )
        .unwrap();
        match local.sandbox {
            SandboxConfig::Local(cfg) => {
                assert_eq!(cfg.python, "/usr/bin/python3.12");
                assert_eq!(cfg.node, "node");
            }
            other => panic!("unexpected sandbox: {other:?}"),
        }

        let mock: StepcodeConfig = toml::from_str(
            r#"
[sandbox]
type = "mock"
default_output = "ok"
"#,
        )
        .unwrap();
        assert!(create_sandbox(&mock.sandbox).is_ok());
    }

    #[test]
    fn anonymous_users_are_rejected() {
        let config: StepcodeConfig = toml::from_str(
            r#"
[users.ghost]
role = "anonymous"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRole { .. })
        ));
    }

    #[test]
    fn remote_without_url_is_rejected() {
        let config = StepcodeConfig {
            sandbox: SandboxConfig::Remote {
                base_url: String::new(),
                timeout_secs: 10,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingExecutionUrl)
        ));
        assert!(create_sandbox(&config.sandbox).is_err());
    }

    #[test]
    fn user_tokens_are_masked() {
        let user = UserConfig {
            role: Role::Student,
            token: Some("secret-token".into()),
        };
        let debug = format!("{user:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
