//! Core data model types for stepcode.
//!
//! Assignments and their modules are authored externally and are immutable
//! once loaded into an attempt. Principals are owned by the identity
//! provider; the engine only ever reads their role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A teacher-authored unit of instruction composed of ordered modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique identifier for this assignment.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Longer description shown in listings.
    #[serde(default)]
    pub description: String,
    /// Course or topic this assignment is grouped under.
    #[serde(default)]
    pub course: String,
    /// How hard the assignment is.
    pub difficulty: Difficulty,
    /// Free-form time estimate (e.g. "20 minutes").
    #[serde(default)]
    pub estimated_time: String,
    /// Language the sandbox is provisioned for.
    pub language: Language,
    /// Packages installed into the sandbox when it is provisioned.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Identifiers of assignments that should be done first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// The ordered learning steps.
    pub modules: Vec<Module>,
}

impl Assignment {
    /// Look up a module by id.
    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Position of a module in assignment order.
    pub fn module_index(&self, id: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.id == id)
    }

    pub fn contains_module(&self, id: &str) -> bool {
        self.module_index(id).is_some()
    }

    /// Listing view of this assignment.
    pub fn summary(&self) -> AssignmentSummary {
        AssignmentSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            course: self.course.clone(),
            difficulty: self.difficulty,
            estimated_time: self.estimated_time.clone(),
            language: self.language,
            module_count: self.modules.len(),
        }
    }
}

/// One learning step within an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Identifier, unique within its assignment.
    pub id: String,
    pub title: String,
    /// Instructional text (markdown).
    #[serde(default)]
    pub instructions: String,
    /// Code the editor starts with.
    #[serde(default)]
    pub starter_code: String,
    /// Hints, revealed one at a time in this order.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Output a correct solution prints. `None` or empty disables grading.
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl Module {
    /// The expected output, if this module is automatically graded.
    pub fn gradable_output(&self) -> Option<&str> {
        self.expected_output.as_deref().filter(|e| !e.is_empty())
    }
}

/// Summary of an assignment (without the module bodies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub id: String,
    pub title: String,
    pub course: String,
    pub difficulty: Difficulty,
    pub estimated_time: String,
    pub language: Language,
    pub module_count: usize,
}

/// Assignment difficulty levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "beginner"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Languages the sandboxes can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
}

impl Language {
    /// File extension used for source files in this language.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "cpp" | "c++" => Ok(Language::Cpp),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// Role of the actor making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anonymous,
    Student,
    Teacher,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Anonymous => write!(f, "anonymous"),
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anonymous" => Ok(Role::Anonymous),
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated or anonymous actor making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user id; `None` for anonymous principals.
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: Role::Anonymous,
        }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Student,
        }
    }

    pub fn teacher(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Teacher,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.role != Role::Anonymous && self.id.is_some()
    }
}

/// Output of one run in a sandbox. Never persisted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Process exit status, when the backend reports one.
    #[serde(default)]
    pub exit_status: Option<i32>,
    /// Wall-clock duration reported by the backend.
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// The text a student sees and that gets verified: stdout, then stderr
    /// separated by a blank line when there is any.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n\n{}", self.stdout, self.stderr)
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status.map_or(self.stderr.is_empty(), |s| s == 0)
    }
}

/// Remove `<editable>` region markers that assignment templates use to
/// highlight the part a student is expected to change.
pub fn strip_editable_markers(code: &str) -> String {
    code.replace("<editable>", "").replace("</editable>", "")
}
