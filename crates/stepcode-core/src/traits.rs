//! Interfaces to the engine's external collaborators.
//!
//! Sandbox backends live in `stepcode-runner` (local processes) and
//! `stepcode-backends` (remote execution API, mocks). Repositories, identity
//! and attempt persistence are supplied by the embedding application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::AttemptId;
use crate::model::{Assignment, AssignmentSummary, Difficulty, ExecutionResult, Language, Principal};
use crate::progress::AssignmentAttempt;

// ---------------------------------------------------------------------------
// Sandbox backend trait
// ---------------------------------------------------------------------------

/// A backend that provisions isolated environments and runs code in them.
///
/// Failures should be reported as [`crate::error::SandboxError`] wrapped in
/// `anyhow::Error` so the coordinator can classify them.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Human-readable backend name (e.g. "local").
    fn name(&self) -> &str;

    /// Create an environment. Blocks until it is ready.
    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<SandboxHandle>;

    /// Run code in a provisioned environment.
    async fn execute(&self, handle: &SandboxHandle, code: &str) -> anyhow::Result<ExecutionResult>;

    /// Tear an environment down.
    async fn release(&self, handle: &SandboxHandle) -> anyhow::Result<()>;
}

/// What a sandbox must be provisioned for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub attempt_id: AttemptId,
    pub assignment_id: String,
    pub language: Language,
    /// Packages to install into the environment.
    #[serde(default)]
    pub requirements: Vec<String>,
}

impl ProvisionRequest {
    pub fn for_assignment(attempt_id: AttemptId, assignment: &Assignment) -> Self {
        Self {
            attempt_id,
            assignment_id: assignment.id.clone(),
            language: assignment.language,
            requirements: assignment.requirements.clone(),
        }
    }

    /// Environment name derived from assignment and attempt, restricted to
    /// ASCII alphanumerics and underscores.
    pub fn environment_name(&self) -> String {
        let raw = format!("{}_{}", self.assignment_id, self.attempt_id.as_uuid().simple());
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// Backend-specific reference to a provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Backend-defined key (a directory, an environment name, ...).
    pub key: String,
    pub language: Language,
}

// ---------------------------------------------------------------------------
// Assignment repository
// ---------------------------------------------------------------------------

/// Read-only source of assignments.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn get_assignment(&self, id: &str) -> anyhow::Result<Option<Assignment>>;

    async fn list_assignments(&self, filter: &AssignmentFilter) -> anyhow::Result<Vec<AssignmentSummary>>;
}

/// Criteria for listing assignments. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentFilter {
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    /// Case-insensitive substring of title or description.
    #[serde(default)]
    pub search: Option<String>,
}

impl AssignmentFilter {
    pub fn matches(&self, assignment: &Assignment) -> bool {
        if let Some(course) = &self.course {
            if !assignment.course.eq_ignore_ascii_case(course) {
                return false;
            }
        }
        if let Some(difficulty) = self.difficulty {
            if assignment.difficulty != difficulty {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !assignment.title.to_lowercase().contains(&needle)
                && !assignment.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Identity and persistence
// ---------------------------------------------------------------------------

/// Resolves the principal behind a session token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Unknown or missing tokens resolve to an anonymous principal.
    async fn principal(&self, token: Option<&str>) -> anyhow::Result<Principal>;
}

/// Optional persistence for attempt snapshots.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// The most recent snapshot for an owner and assignment.
    async fn load(&self, owner: &str, assignment_id: &str) -> anyhow::Result<Option<AssignmentAttempt>>;

    async fn save(&self, attempt: &AssignmentAttempt) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Module;

    fn assignment(title: &str, course: &str, difficulty: Difficulty) -> Assignment {
        Assignment {
            id: title.to_lowercase().replace(' ', "-"),
            title: title.into(),
            description: "Practice with lists".into(),
            course: course.into(),
            difficulty,
            estimated_time: String::new(),
            language: Language::Python,
            requirements: vec!["numpy".into()],
            prerequisites: vec![],
            modules: vec![Module {
                id: "m1".into(),
                title: "m1".into(),
                instructions: String::new(),
                starter_code: String::new(),
                hints: vec![],
                expected_output: None,
            }],
        }
    }

    #[test]
    fn filter_matches_fields() {
        let a = assignment("Prefix Sum", "Python Assignments", Difficulty::Beginner);
        assert!(AssignmentFilter::default().matches(&a));
        assert!(AssignmentFilter {
            course: Some("python assignments".into()),
            ..Default::default()
        }
        .matches(&a));
        assert!(!AssignmentFilter {
            difficulty: Some(Difficulty::Advanced),
            ..Default::default()
        }
        .matches(&a));
        assert!(AssignmentFilter {
            search: Some("LISTS".into()),
            ..Default::default()
        }
        .matches(&a));
        assert!(!AssignmentFilter {
            search: Some("graphs".into()),
            ..Default::default()
        }
        .matches(&a));
    }

    #[test]
    fn environment_name_is_sanitized() {
        let a = assignment("Prefix Sum", "Python", Difficulty::Beginner);
        let request = ProvisionRequest::for_assignment(AttemptId::new(), &a);
        let name = request.environment_name();
        assert!(name.starts_with("prefix_sum_"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_eq!(request.requirements, vec!["numpy"]);
    }
}
