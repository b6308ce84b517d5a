//! In-memory assignment repository.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Assignment, AssignmentSummary};
use crate::parser::load_assignment_directory;
use crate::traits::{AssignmentFilter, AssignmentRepository};

/// A fixed set of assignments, e.g. loaded from a content directory.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    assignments: Vec<Assignment>,
}

impl Catalog {
    pub fn new(assignments: Vec<Assignment>) -> Self {
        Self { assignments }
    }

    /// Load every assignment under `dir`.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let assignments = load_assignment_directory(dir)?;
        tracing::debug!(count = assignments.len(), dir = %dir.display(), "loaded assignments");
        Ok(Self::new(assignments))
    }

    pub fn get(&self, id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    /// Summaries of matching assignments, sorted by title.
    pub fn list(&self, filter: &AssignmentFilter) -> Vec<AssignmentSummary> {
        let mut summaries: Vec<AssignmentSummary> = self
            .assignments
            .iter()
            .filter(|a| filter.matches(a))
            .map(Assignment::summary)
            .collect();
        summaries.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Distinct course names, sorted.
    pub fn courses(&self) -> Vec<String> {
        self.assignments
            .iter()
            .map(|a| a.course.clone())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

#[async_trait]
impl AssignmentRepository for Catalog {
    async fn get_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        Ok(self.get(id).cloned())
    }

    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<AssignmentSummary>> {
        Ok(self.list(filter))
    }
}
