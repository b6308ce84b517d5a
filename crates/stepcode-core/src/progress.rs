//! Module progress state machine.
//!
//! An [`AssignmentAttempt`] is a plain value: the navigator owns it, applies
//! transitions, and may hand snapshots to an external store after each one.
//! Every transition either applies fully or returns an error and leaves the
//! attempt untouched.
//!
//! Navigation and completion are independent. `advance` moves on whether or
//! not the active module was solved; only a successful verification marks a
//! module complete.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::ids::{AttemptId, SessionId};
use crate::model::Assignment;

/// Lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Completed,
}

/// Result of [`AssignmentAttempt::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the given module.
    Moved(String),
    /// The last module was active; the attempt is now completed.
    Finished,
}

/// Counts for progress bars and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    pub all_completed: bool,
}

/// One principal's traversal of one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentAttempt {
    pub id: AttemptId,
    pub assignment_id: String,
    /// User id of the owning principal.
    pub owner: String,
    /// Module ids in assignment order, captured when the attempt was created.
    module_order: Vec<String>,
    active_module_id: String,
    completed_module_ids: BTreeSet<String>,
    sandbox_session_id: Option<SessionId>,
    state: AttemptState,
    /// Number of hints revealed per module.
    #[serde(default)]
    revealed_hints: BTreeMap<String, usize>,
    /// Latest code the student wrote per module.
    #[serde(default)]
    drafts: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl AssignmentAttempt {
    /// Start a fresh attempt on the first module.
    pub fn new(assignment: &Assignment, owner: impl Into<String>) -> Result<Self, EngineError> {
        let first = assignment.modules.first().ok_or_else(|| {
            EngineError::InvalidAssignment(format!("assignment '{}' has no modules", assignment.id))
        })?;
        let now = Utc::now();

        Ok(Self {
            id: AttemptId::new(),
            assignment_id: assignment.id.clone(),
            owner: owner.into(),
            module_order: assignment.modules.iter().map(|m| m.id.clone()).collect(),
            active_module_id: first.id.clone(),
            completed_module_ids: BTreeSet::new(),
            sandbox_session_id: None,
            state: AttemptState::NotStarted,
            revealed_hints: BTreeMap::new(),
            drafts: BTreeMap::new(),
            started_at: now,
            last_accessed: now,
        })
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn active_module_id(&self) -> &str {
        &self.active_module_id
    }

    pub fn completed_module_ids(&self) -> &BTreeSet<String> {
        &self.completed_module_ids
    }

    pub fn is_completed(&self, module_id: &str) -> bool {
        self.completed_module_ids.contains(module_id)
    }

    pub fn sandbox_session_id(&self) -> Option<SessionId> {
        self.sandbox_session_id
    }

    pub fn module_order(&self) -> &[String] {
        &self.module_order
    }

    /// Zero-based position of the active module.
    pub fn active_index(&self) -> usize {
        self.index_of(&self.active_module_id).unwrap_or(0)
    }

    /// Mark the attempt as started. No-op once started.
    pub fn start(&mut self) {
        if self.state == AttemptState::NotStarted {
            self.state = AttemptState::InProgress;
        }
        self.touch();
    }

    /// Make `module_id` the active module.
    pub fn select_module(&mut self, module_id: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.ensure_known(module_id)?;
        self.active_module_id = module_id.to_string();
        self.start();
        Ok(())
    }

    /// Record a verification verdict for `module_id`.
    ///
    /// A match adds the module to the completed set; repeating it is a no-op.
    /// A mismatch never removes a module that is already completed. Accepted
    /// in every state, so late verdicts from a concurrent run are not lost.
    pub fn record_verification(&mut self, module_id: &str, matches: bool) -> Result<(), EngineError> {
        self.ensure_known(module_id)?;
        if matches {
            self.completed_module_ids.insert(module_id.to_string());
        }
        self.touch();
        Ok(())
    }

    /// Move to the next module, or complete the attempt from the last one.
    pub fn advance(&mut self) -> Result<Advance, EngineError> {
        self.ensure_open()?;
        let next = self.active_index() + 1;
        match self.module_order.get(next).cloned() {
            Some(id) => {
                self.active_module_id = id.clone();
                self.start();
                Ok(Advance::Moved(id))
            }
            None => {
                self.state = AttemptState::Completed;
                self.touch();
                Ok(Advance::Finished)
            }
        }
    }

    /// Move to the previous module. Returns whether the active module changed.
    pub fn retreat(&mut self) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let index = self.active_index();
        self.start();
        if index == 0 {
            return Ok(false);
        }
        self.active_module_id = self.module_order[index - 1].clone();
        Ok(true)
    }

    /// Remember the sandbox session backing this attempt.
    pub fn attach_session(&mut self, session: SessionId) {
        self.sandbox_session_id = Some(session);
    }

    /// Forget the sandbox session, returning it.
    pub fn detach_session(&mut self) -> Option<SessionId> {
        self.sandbox_session_id.take()
    }

    /// Reveal the next hint of a module. Returns its index, or `None` when
    /// every hint is already visible.
    pub fn reveal_hint(&mut self, assignment: &Assignment, module_id: &str) -> Result<Option<usize>, EngineError> {
        let module = assignment
            .module(module_id)
            .ok_or_else(|| EngineError::InvalidModuleReference(module_id.to_string()))?;
        let shown = self.revealed_hints.get(module_id).copied().unwrap_or(0);
        if shown >= module.hints.len() {
            return Ok(None);
        }
        self.revealed_hints.insert(module_id.to_string(), shown + 1);
        self.touch();
        Ok(Some(shown))
    }

    /// Hints the student has revealed so far for a module, in order.
    pub fn visible_hints<'a>(&self, assignment: &'a Assignment, module_id: &str) -> Vec<&'a str> {
        let shown = self.revealed_hints.get(module_id).copied().unwrap_or(0);
        assignment
            .module(module_id)
            .map(|m| m.hints.iter().take(shown).map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Store the student's latest code for a module.
    pub fn save_draft(&mut self, module_id: &str, code: &str) -> Result<(), EngineError> {
        self.ensure_known(module_id)?;
        self.drafts.insert(module_id.to_string(), code.to_string());
        self.touch();
        Ok(())
    }

    /// The draft for a module, falling back to its starter code.
    pub fn current_code<'a>(&'a self, assignment: &'a Assignment, module_id: &str) -> Option<&'a str> {
        self.drafts
            .get(module_id)
            .map(String::as_str)
            .or_else(|| assignment.module(module_id).map(|m| m.starter_code.as_str()))
    }

    /// Discard the draft so the module shows its starter code again.
    pub fn reset_code(&mut self, module_id: &str) -> Result<(), EngineError> {
        self.ensure_known(module_id)?;
        self.drafts.remove(module_id);
        Ok(())
    }

    /// Advisory lock rule: a module is unlocked once every earlier module is
    /// completed. Navigation does not enforce it.
    pub fn is_module_unlocked(&self, module_id: &str) -> Result<bool, EngineError> {
        let index = self
            .index_of(module_id)
            .ok_or_else(|| EngineError::InvalidModuleReference(module_id.to_string()))?;
        Ok(self.module_order[..index]
            .iter()
            .all(|id| self.completed_module_ids.contains(id)))
    }

    /// Stored snapshots are not validated; ids outside the module order are
    /// not counted.
    pub fn summary(&self) -> ProgressSummary {
        let total = self.module_order.len();
        let completed = self
            .module_order
            .iter()
            .filter(|id| self.completed_module_ids.contains(*id))
            .count();
        ProgressSummary {
            total,
            completed,
            remaining: total - completed,
            all_completed: completed == total,
        }
    }

    /// Check a restored snapshot against the assignment it claims to track.
    pub fn validate_against(&self, assignment: &Assignment) -> Result<(), EngineError> {
        if self.assignment_id != assignment.id {
            return Err(EngineError::InvalidAssignment(format!(
                "attempt belongs to '{}', not '{}'",
                self.assignment_id, assignment.id
            )));
        }
        let current: Vec<&str> = assignment.modules.iter().map(|m| m.id.as_str()).collect();
        let recorded: Vec<&str> = self.module_order.iter().map(String::as_str).collect();
        if current != recorded {
            return Err(EngineError::InvalidAssignment(format!(
                "modules of '{}' changed since the attempt started",
                assignment.id
            )));
        }
        if !assignment.contains_module(&self.active_module_id) {
            return Err(EngineError::InvalidModuleReference(
                self.active_module_id.clone(),
            ));
        }
        if let Some(stray) = self
            .completed_module_ids
            .iter()
            .find(|id| !assignment.contains_module(id))
        {
            return Err(EngineError::InvalidModuleReference(stray.clone()));
        }
        Ok(())
    }

    /// Save a snapshot as pretty JSON.
    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize attempt")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write attempt to {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot written by [`save_json`](Self::save_json).
    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read attempt from {}", path.display()))?;
        serde_json::from_str(&content).context("failed to parse attempt JSON")
    }

    fn index_of(&self, module_id: &str) -> Option<usize> {
        self.module_order.iter().position(|id| id == module_id)
    }

    fn ensure_known(&self, module_id: &str) -> Result<(), EngineError> {
        if self.index_of(module_id).is_none() {
            return Err(EngineError::InvalidModuleReference(module_id.to_string()));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.state == AttemptState::Completed {
            return Err(EngineError::AttemptFinished);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, Language, Module};

    fn assignment(modules: &[&str]) -> Assignment {
        Assignment {
            id: "lists".into(),
            title: "Lists".into(),
            description: String::new(),
            course: "Python Fundamentals".into(),
            difficulty: Difficulty::Beginner,
            estimated_time: "20 minutes".into(),
            language: Language::Python,
            requirements: vec![],
            prerequisites: vec![],
            modules: modules
                .iter()
                .map(|id| Module {
                    id: (*id).into(),
                    title: (*id).into(),
                    instructions: String::new(),
                    starter_code: format!("# {id}"),
                    hints: vec!["first".into(), "second".into()],
                    expected_output: Some("ok".into()),
                })
                .collect(),
        }
    }

    #[test]
    fn starts_on_first_module() {
        let a = assignment(&["m1", "m2", "m3"]);
        let attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert_eq!(attempt.state(), AttemptState::NotStarted);
        assert_eq!(attempt.active_module_id(), "m1");
        assert!(attempt.completed_module_ids().is_empty());
        assert!(attempt.sandbox_session_id().is_none());
    }

    #[test]
    fn empty_assignment_is_rejected() {
        let a = assignment(&[]);
        assert!(matches!(
            AssignmentAttempt::new(&a, "s1"),
            Err(EngineError::InvalidAssignment(_))
        ));
    }

    #[test]
    fn select_unknown_module_fails_without_change() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        let before = attempt.clone();
        let err = attempt.select_module("nope").unwrap_err();
        assert_eq!(err, EngineError::InvalidModuleReference("nope".into()));
        assert_eq!(attempt, before);
    }

    #[test]
    fn select_module_starts_attempt() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        attempt.select_module("m2").unwrap();
        assert_eq!(attempt.active_module_id(), "m2");
        assert_eq!(attempt.state(), AttemptState::InProgress);
    }

    #[test]
    fn record_verification_is_idempotent() {
        let a = assignment(&["m1", "m2"]);
        let mut once = AssignmentAttempt::new(&a, "s1").unwrap();
        once.record_verification("m1", true).unwrap();
        let mut twice = once.clone();
        twice.record_verification("m1", true).unwrap();
        assert_eq!(once.completed_module_ids(), twice.completed_module_ids());
    }

    #[test]
    fn failed_verification_never_regresses() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        attempt.record_verification("m1", true).unwrap();
        for _ in 0..5 {
            attempt.record_verification("m1", false).unwrap();
        }
        assert!(attempt.is_completed("m1"));
        attempt.record_verification("m2", false).unwrap();
        assert!(!attempt.is_completed("m2"));
    }

    #[test]
    fn record_verification_rejects_foreign_module() {
        let a = assignment(&["m1"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert!(attempt.record_verification("other", true).is_err());
        assert!(attempt.completed_module_ids().is_empty());
    }

    #[test]
    fn advance_skips_without_completion_and_finishes() {
        let a = assignment(&["m1", "m2", "m3"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert_eq!(attempt.advance().unwrap(), Advance::Moved("m2".into()));
        assert_eq!(attempt.advance().unwrap(), Advance::Moved("m3".into()));
        assert!(attempt.completed_module_ids().is_empty());
        assert_eq!(attempt.advance().unwrap(), Advance::Finished);
        assert_eq!(attempt.state(), AttemptState::Completed);
        assert_eq!(attempt.active_module_id(), "m3");
    }

    #[test]
    fn completed_attempt_rejects_navigation_but_keeps_verdicts() {
        let a = assignment(&["m1"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert_eq!(attempt.advance().unwrap(), Advance::Finished);
        assert_eq!(attempt.select_module("m1"), Err(EngineError::AttemptFinished));
        assert_eq!(attempt.advance(), Err(EngineError::AttemptFinished));
        assert_eq!(attempt.retreat(), Err(EngineError::AttemptFinished));
        attempt.record_verification("m1", true).unwrap();
        assert!(attempt.is_completed("m1"));
    }

    #[test]
    fn retreat_stops_at_first_module() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert!(!attempt.retreat().unwrap());
        attempt.select_module("m2").unwrap();
        assert!(attempt.retreat().unwrap());
        assert_eq!(attempt.active_module_id(), "m1");
    }

    #[test]
    fn hints_are_revealed_in_order() {
        let a = assignment(&["m1"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert!(attempt.visible_hints(&a, "m1").is_empty());
        assert_eq!(attempt.reveal_hint(&a, "m1").unwrap(), Some(0));
        assert_eq!(attempt.reveal_hint(&a, "m1").unwrap(), Some(1));
        assert_eq!(attempt.reveal_hint(&a, "m1").unwrap(), None);
        assert_eq!(attempt.visible_hints(&a, "m1"), vec!["first", "second"]);
    }

    #[test]
    fn drafts_fall_back_to_starter_code() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert_eq!(attempt.current_code(&a, "m1"), Some("# m1"));
        attempt.save_draft("m1", "print('ok')").unwrap();
        attempt.select_module("m2").unwrap();
        assert_eq!(attempt.current_code(&a, "m1"), Some("print('ok')"));
        attempt.reset_code("m1").unwrap();
        assert_eq!(attempt.current_code(&a, "m1"), Some("# m1"));
    }

    #[test]
    fn unlock_rule_follows_completion() {
        let a = assignment(&["m1", "m2", "m3"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        assert!(attempt.is_module_unlocked("m1").unwrap());
        assert!(!attempt.is_module_unlocked("m3").unwrap());
        attempt.record_verification("m1", true).unwrap();
        assert!(attempt.is_module_unlocked("m2").unwrap());
        assert!(!attempt.is_module_unlocked("m3").unwrap());
    }

    #[test]
    fn summary_counts() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        attempt.record_verification("m2", true).unwrap();
        let summary = attempt.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.remaining, 1);
        assert!(!summary.all_completed);
    }

    #[test]
    fn summary_ignores_unknown_completed_ids() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        attempt.record_verification("m1", true).unwrap();

        let mut json = serde_json::to_value(&attempt).unwrap();
        json["completed_module_ids"] = serde_json::json!(["m1", "old-a", "old-b", "old-c"]);
        let edited: AssignmentAttempt = serde_json::from_value(json).unwrap();

        let summary = edited.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.remaining, 1);
        assert!(!summary.all_completed);
    }

    #[test]
    fn snapshot_roundtrip_and_validation() {
        let a = assignment(&["m1", "m2"]);
        let mut attempt = AssignmentAttempt::new(&a, "s1").unwrap();
        attempt.record_verification("m1", true).unwrap();
        attempt.attach_session(SessionId::new());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempt.json");
        attempt.save_json(&path).unwrap();
        let restored = AssignmentAttempt::load_json(&path).unwrap();
        assert_eq!(restored, attempt);
        restored.validate_against(&a).unwrap();

        let changed = assignment(&["m1", "m9"]);
        assert!(restored.validate_against(&changed).is_err());
    }
}
