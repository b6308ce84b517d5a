//! Engine and sandbox error types.
//!
//! `SandboxError` is what backends raise. It is defined in `stepcode-core`
//! so the session coordinator can downcast `anyhow::Error` values coming out
//! of a `SandboxProvider` and classify them without string matching.
//! `EngineError` is the taxonomy callers of the engine see.

use thiserror::Error;

use crate::access::Capability;
use crate::ids::{AttemptId, SessionId};
use crate::model::Role;

/// Errors surfaced by the progression engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The principal has not logged in.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The principal's role does not grant the requested capability.
    #[error("role '{role}' may not {capability}")]
    InsufficientRole { role: Role, capability: Capability },

    /// A module id that is not part of the assignment.
    #[error("module '{0}' is not part of this assignment")]
    InvalidModuleReference(String),

    /// The session id is stale or was never opened.
    #[error("sandbox session {0} not found")]
    SandboxNotFound(SessionId),

    /// The sandbox backend could not provide an environment.
    #[error("sandbox provisioning failed: {0}")]
    SandboxProvisionError(String),

    /// The executor did not answer within the deadline.
    #[error("execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    /// The attempt already reached its terminal state.
    #[error("attempt already finished")]
    AttemptFinished,

    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),

    #[error("assignment '{0}' not found")]
    AssignmentNotFound(String),

    /// The path does not resolve to the page of the requested assignment.
    #[error("route '{path}' does not serve assignment '{assignment}'")]
    RouteMismatch { path: String, assignment: String },

    /// Assignment content that cannot back an attempt.
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    /// The assignment repository or attempt store failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl EngineError {
    /// Authorization failures; callers redirect instead of reporting.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            EngineError::NotAuthenticated | EngineError::InsufficientRole { .. }
        )
    }

    /// Infrastructure failures a UI may offer to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::SandboxProvisionError(_) | EngineError::ExecutionTimeout(_)
        )
    }
}

/// Errors raised by sandbox backends.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The backend could not be reached.
    #[error("sandbox backend unavailable: {0}")]
    Unavailable(String),

    /// The backend gave up waiting on provisioning or execution.
    #[error("sandbox operation timed out after {0}ms")]
    Timeout(u64),

    /// The backend does not know the environment.
    #[error("sandbox environment not found: {0}")]
    NotFound(String),

    /// The backend returned an error response.
    #[error("sandbox backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(EngineError::NotAuthenticated.is_authorization());
        assert!(EngineError::InsufficientRole {
            role: Role::Student,
            capability: Capability::ViewAsTeacher,
        }
        .is_authorization());
        assert!(EngineError::ExecutionTimeout(30_000).is_transient());
        assert!(EngineError::SandboxProvisionError("down".into()).is_transient());
        assert!(!EngineError::InvalidModuleReference("m9".into()).is_transient());
        assert!(!EngineError::SandboxNotFound(SessionId::new()).is_authorization());
    }

    #[test]
    fn messages() {
        let err = EngineError::InsufficientRole {
            role: Role::Student,
            capability: Capability::ViewAsTeacher,
        };
        assert_eq!(err.to_string(), "role 'student' may not view-as-teacher");
        assert_eq!(
            SandboxError::Timeout(500).to_string(),
            "sandbox operation timed out after 500ms"
        );
    }
}
