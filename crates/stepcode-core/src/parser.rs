//! TOML assignment parser.
//!
//! Loads assignments from TOML files and directories, and validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{Assignment, Difficulty, Language, Module};

/// Intermediate TOML structure for parsing assignment files.
#[derive(Debug, Deserialize)]
struct TomlAssignmentFile {
    assignment: TomlAssignmentHeader,
    #[serde(default)]
    modules: Vec<TomlModule>,
}

#[derive(Debug, Deserialize)]
struct TomlAssignmentHeader {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    course: String,
    #[serde(default = "default_difficulty")]
    difficulty: String,
    #[serde(default)]
    estimated_time: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    prerequisites: Vec<String>,
}

fn default_difficulty() -> String {
    "beginner".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlModule {
    id: String,
    title: String,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    starter_code: String,
    #[serde(default)]
    hints: Vec<String>,
    #[serde(default)]
    expected_output: Option<String>,
}

/// Parse a single TOML file into an `Assignment`.
pub fn parse_assignment(path: &Path) -> Result<Assignment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read assignment file: {}", path.display()))?;

    parse_assignment_str(&content, path)
}

/// Parse a TOML string into an `Assignment`.
pub fn parse_assignment_str(content: &str, source_path: &Path) -> Result<Assignment> {
    let parsed: TomlAssignmentFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.assignment;

    let difficulty: Difficulty = header
        .difficulty
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}: {}", source_path.display(), e))?;
    let language: Language = header
        .language
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}: {}", source_path.display(), e))?;

    if parsed.modules.is_empty() {
        anyhow::bail!(
            "{}: assignment '{}' has no modules",
            source_path.display(),
            header.id
        );
    }

    let mut seen = HashSet::new();
    for module in &parsed.modules {
        if !seen.insert(module.id.as_str()) {
            anyhow::bail!(
                "{}: duplicate module id '{}'",
                source_path.display(),
                module.id
            );
        }
    }

    let modules = parsed
        .modules
        .into_iter()
        .map(|m| Module {
            id: m.id,
            title: m.title,
            instructions: m.instructions,
            starter_code: m.starter_code,
            hints: m.hints,
            expected_output: m.expected_output,
        })
        .collect();

    Ok(Assignment {
        id: header.id,
        title: header.title,
        description: header.description,
        course: header.course,
        difficulty,
        estimated_time: header.estimated_time,
        language,
        requirements: header.requirements,
        prerequisites: header.prerequisites,
        modules,
    })
}

/// Recursively load all `.toml` assignment files from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_assignment_directory(dir: &Path) -> Result<Vec<Assignment>> {
    let mut assignments = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            assignments.extend(load_assignment_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_assignment(&path) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(assignments)
}

/// A warning from assignment validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub assignment_id: String,
    /// The module ID (if applicable).
    pub module_id: Option<String>,
    pub message: String,
}

/// Validate an assignment for authoring issues that do not prevent loading.
pub fn validate_assignment(assignment: &Assignment) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |module: Option<&str>, message: String| ValidationWarning {
        assignment_id: assignment.id.clone(),
        module_id: module.map(String::from),
        message,
    };

    if assignment.prerequisites.contains(&assignment.id) {
        warnings.push(warn(None, "assignment lists itself as a prerequisite".into()));
    }

    for module in &assignment.modules {
        match module.expected_output.as_deref() {
            None | Some("") => warnings.push(warn(
                Some(&module.id),
                "no expected_output; runs will not be graded".into(),
            )),
            Some(expected) if expected.trim().is_empty() => warnings.push(warn(
                Some(&module.id),
                "expected_output is only whitespace; any silent program will pass".into(),
            )),
            Some(_) => {}
        }

        if module.instructions.trim().is_empty() {
            warnings.push(warn(Some(&module.id), "instructions are empty".into()));
        }

        if module.hints.iter().any(|h| h.trim().is_empty()) {
            warnings.push(warn(Some(&module.id), "contains a blank hint".into()));
        }
    }

    warnings
}

/// Validate a set of assignments, including cross-assignment references.
pub fn validate_catalog(assignments: &[Assignment]) -> Vec<ValidationWarning> {
    let known: HashSet<&str> = assignments.iter().map(|a| a.id.as_str()).collect();
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for assignment in assignments {
        if !seen.insert(assignment.id.as_str()) {
            warnings.push(ValidationWarning {
                assignment_id: assignment.id.clone(),
                module_id: None,
                message: format!("duplicate assignment ID: {}", assignment.id),
            });
        }

        warnings.extend(validate_assignment(assignment));

        for prerequisite in &assignment.prerequisites {
            if !known.contains(prerequisite.as_str()) {
                warnings.push(ValidationWarning {
                    assignment_id: assignment.id.clone(),
                    module_id: None,
                    message: format!("unknown prerequisite: {prerequisite}"),
                });
            }
        }
    }

    warnings
}
