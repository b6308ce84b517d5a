//! Temporary workspace backing one local sandbox session.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use stepcode_core::model::Language;

/// A scratch directory that student code is written to and run from.
///
/// On drop, the temporary directory is automatically cleaned up.
pub struct Workspace {
    work_dir: TempDir,
    language: Language,
    /// Virtual environment holding installed Python requirements.
    venv: Option<PathBuf>,
    /// Serializes runs; each run rewrites the same source file.
    run_lock: tokio::sync::Mutex<()>,
}

impl Workspace {
    /// Create an empty workspace whose directory name starts with `name`.
    pub fn new(name: &str, language: Language) -> Result<Self> {
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("stepcode-{name}-"))
            .tempdir()
            .context("failed to create temp directory")?;

        Ok(Self {
            work_dir,
            language,
            venv: None,
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Where a Python virtual environment for this workspace lives.
    pub fn venv_dir(&self) -> PathBuf {
        self.work_dir.path().join(".venv")
    }

    pub fn venv(&self) -> Option<&Path> {
        self.venv.as_deref()
    }

    pub fn set_venv(&mut self, venv: PathBuf) {
        self.venv = Some(venv);
    }

    pub(crate) async fn lock_runs(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }

    /// Path of the entry-point source file, e.g. `main.py`.
    pub fn source_path(&self) -> PathBuf {
        self.work_dir
            .path()
            .join(format!("main.{}", self.language.extension()))
    }

    /// Path of the compiled binary for compiled languages.
    pub fn binary_path(&self) -> PathBuf {
        self.work_dir.path().join("main")
    }

    /// Write the program to its entry-point file, replacing the previous run's.
    pub fn write_source(&self, code: &str) -> Result<PathBuf> {
        let path = self.source_path();
        std::fs::write(&path, code)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Build environment variables for child processes.
    ///
    /// Puts the workspace's virtual environment first on `PATH` and blanks
    /// sensitive env vars.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();

        if let Some(venv) = &self.venv {
            let bin = venv.join("bin");
            let path = match std::env::var_os("PATH") {
                Some(existing) => {
                    let mut paths = vec![bin];
                    paths.extend(std::env::split_paths(&existing));
                    std::env::join_paths(paths)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default()
                }
                None => bin.to_string_lossy().to_string(),
            };
            env.push(("PATH".to_string(), path));
            env.push((
                "VIRTUAL_ENV".to_string(),
                venv.to_string_lossy().to_string(),
            ));
        }
        env.push(("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()));
        env.push(("PYTHONUNBUFFERED".to_string(), "1".to_string()));

        // Clear sensitive env vars to prevent leakage into sandboxed code
        for var in &[
            "SSH_AUTH_SOCK",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_SESSION_TOKEN",
            "GITHUB_TOKEN",
            "GH_TOKEN",
            "NPM_TOKEN",
            "PIP_INDEX_URL",
            "STEPCODE_EXECUTION_URL",
            "STEPCODE_API_TOKEN",
            "DOCKER_HOST",
            "DOCKER_CONFIG",
            "KUBECONFIG",
            "DATABASE_URL",
        ] {
            env.push((var.to_string(), String::new()));
        }

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_directory_exists_and_is_removed_on_drop() {
        let workspace = Workspace::new("lists_1", Language::Python).unwrap();
        let dir = workspace.work_dir().to_path_buf();
        assert!(dir.is_dir());
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("stepcode-lists_1-"));
        drop(workspace);
        assert!(!dir.exists());
    }

    #[test]
    fn write_source_uses_language_extension() {
        let workspace = Workspace::new("w", Language::JavaScript).unwrap();
        let path = workspace.write_source("console.log(1)").unwrap();
        assert_eq!(path.file_name().unwrap(), "main.js");

        workspace.write_source("console.log(2)").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "console.log(2)");
    }

    #[test]
    fn build_env_blanks_secrets() {
        let workspace = Workspace::new("w", Language::Python).unwrap();
        let env = workspace.build_env();
        assert!(env
            .iter()
            .any(|(k, v)| k == "AWS_SECRET_ACCESS_KEY" && v.is_empty()));
        assert!(!env.iter().any(|(k, _)| k == "VIRTUAL_ENV"));
    }

    #[test]
    fn build_env_prefers_venv() {
        let mut workspace = Workspace::new("w", Language::Python).unwrap();
        let venv = workspace.venv_dir();
        workspace.set_venv(venv.clone());
        let env = workspace.build_env();

        let path = env.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.clone()).unwrap();
        assert!(path.starts_with(&venv.join("bin").to_string_lossy().to_string()));
        assert!(env
            .iter()
            .any(|(k, v)| k == "VIRTUAL_ENV" && *v == venv.to_string_lossy()));
    }
}
