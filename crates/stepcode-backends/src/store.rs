//! File-backed attempt persistence.
//!
//! One pretty-printed JSON snapshot per owner and assignment:
//! `<dir>/<owner>/<assignment>.json`. Bytes other than ASCII letters, digits,
//! `-` and `_` are written as `%XX`, so distinct ids never share a file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use stepcode_core::progress::AssignmentAttempt;
use stepcode_core::traits::AttemptStore;

/// Stores attempt snapshots as JSON files under a directory.
#[derive(Debug, Clone)]
pub struct JsonAttemptStore {
    dir: PathBuf,
}

impl JsonAttemptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, owner: &str, assignment_id: &str) -> PathBuf {
        self.dir
            .join(file_component(owner))
            .join(format!("{}.json", file_component(assignment_id)))
    }

    /// Every stored attempt of an owner, most recently accessed first.
    pub async fn list(&self, owner: &str) -> Result<Vec<AssignmentAttempt>> {
        let dir = self.dir.join(file_component(owner));
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut attempts = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_attempt(&path).await {
                    Ok(attempt) if attempt.owner == owner => attempts.push(attempt),
                    Ok(attempt) => tracing::warn!(
                        "skipping {}: belongs to '{}'",
                        path.display(),
                        attempt.owner
                    ),
                    Err(e) => tracing::warn!("skipping {}: {:#}", path.display(), e),
                }
            }
        }
        attempts.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(attempts)
    }
}

/// Encode an id as a path component that is safe on every platform.
fn file_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

async fn read_attempt(path: &Path) -> Result<AssignmentAttempt> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read attempt from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse attempt JSON: {}", path.display()))
}

#[async_trait]
impl AttemptStore for JsonAttemptStore {
    async fn load(&self, owner: &str, assignment_id: &str) -> Result<Option<AssignmentAttempt>> {
        let path = self.path_for(owner, assignment_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        read_attempt(&path).await.map(Some)
    }

    async fn save(&self, attempt: &AssignmentAttempt) -> Result<()> {
        let path = self.path_for(&attempt.owner, &attempt.assignment_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(attempt).context("failed to serialize attempt")?;
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move attempt into {}", path.display()))?;
        tracing::debug!(path = %path.display(), "attempt saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcode_core::model::{Assignment, Difficulty, Language, Module};

    fn assignment(id: &str) -> Assignment {
        Assignment {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            course: String::new(),
            difficulty: Difficulty::Beginner,
            estimated_time: String::new(),
            language: Language::Python,
            requirements: vec![],
            prerequisites: vec![],
            modules: ["m1", "m2"]
                .iter()
                .map(|m| Module {
                    id: (*m).into(),
                    title: (*m).into(),
                    instructions: String::new(),
                    starter_code: String::new(),
                    hints: vec![],
                    expected_output: Some("ok".into()),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAttemptStore::new(dir.path());
        let a = assignment("prefix-sum");

        let mut attempt = AssignmentAttempt::new(&a, "alice@example.com").unwrap();
        attempt.record_verification("m1", true).unwrap();
        store.save(&attempt).await.unwrap();

        let loaded = store
            .load("alice@example.com", "prefix-sum")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, attempt);
        assert!(store.load("bob", "prefix-sum").await.unwrap().is_none());
        assert!(dir.path().join("alice%40example%2Ecom").join("prefix-sum.json").exists());
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAttemptStore::new(dir.path());
        let a = assignment("lists");

        let mut attempt = AssignmentAttempt::new(&a, "alice").unwrap();
        store.save(&attempt).await.unwrap();
        attempt.advance().unwrap();
        store.save(&attempt).await.unwrap();

        let loaded = store.load("alice", "lists").await.unwrap().unwrap();
        assert_eq!(loaded.active_module_id(), "m2");
    }

    #[tokio::test]
    async fn list_returns_owner_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAttemptStore::new(dir.path());
        for id in ["lists", "sorting"] {
            let attempt = AssignmentAttempt::new(&assignment(id), "alice").unwrap();
            store.save(&attempt).await.unwrap();
        }
        std::fs::write(dir.path().join("alice").join("junk.json"), "{").unwrap();

        let attempts = store.list("alice").await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(store.list("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn similar_owners_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAttemptStore::new(dir.path());
        let a = assignment("lists");

        let mut dotted = AssignmentAttempt::new(&a, "ann.lee").unwrap();
        dotted.record_verification("m1", true).unwrap();
        store.save(&dotted).await.unwrap();
        let underscored = AssignmentAttempt::new(&a, "ann_lee").unwrap();
        store.save(&underscored).await.unwrap();

        let loaded = store.load("ann.lee", "lists").await.unwrap().unwrap();
        assert_eq!(loaded, dotted);
        let loaded = store.load("ann_lee", "lists").await.unwrap().unwrap();
        assert_eq!(loaded, underscored);
        assert!(store.load("ann lee", "lists").await.unwrap().is_none());
        assert_eq!(store.list("ann.lee").await.unwrap().len(), 1);
    }

    #[test]
    fn path_components_are_encoded() {
        assert_eq!(file_component("prefix-sum_2"), "prefix-sum_2");
        assert_eq!(file_component("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(file_component("50%"), "50%25");
        assert_eq!(file_component("é"), "%C3%A9");
        assert_eq!(file_component(""), "%");
        assert_ne!(file_component("ann.lee"), file_component("ann_lee"));
        assert_ne!(file_component("a/b"), file_component("a%2Fb"));
    }
}
