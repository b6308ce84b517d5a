//! Capability-based route authorization.
//!
//! Every route carries a capability tag. [`AccessGuard`] decides whether a
//! principal may reach it; the router is responsible for redirecting on
//! [`Decision::Deny`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{Principal, Role};

/// What a route requires of the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Authenticated,
    ViewAsStudent,
    ViewAsTeacher,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Authenticated => write!(f, "authenticated"),
            Capability::ViewAsStudent => write!(f, "view-as-student"),
            Capability::ViewAsTeacher => write!(f, "view-as-teacher"),
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authenticated" => Ok(Capability::Authenticated),
            "view-as-student" => Ok(Capability::ViewAsStudent),
            "view-as-teacher" => Ok(Capability::ViewAsTeacher),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    NotAuthenticated,
    InsufficientRole,
}

/// Result of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a denial into the engine's error taxonomy.
    pub fn into_result(self, principal: &Principal, capability: Capability) -> Result<(), EngineError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(DenyReason::NotAuthenticated) => Err(EngineError::NotAuthenticated),
            Decision::Deny(DenyReason::InsufficientRole) => Err(EngineError::InsufficientRole {
                role: principal.role,
                capability,
            }),
        }
    }
}

/// A route pattern and the access it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path pattern; segments starting with `:` capture a parameter.
    pub pattern: String,
    /// `None` for public routes.
    pub capability: Option<Capability>,
    /// Teachers may open this student-view route to preview it.
    #[serde(default)]
    pub teacher_preview: bool,
}

impl Route {
    pub fn public(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            capability: None,
            teacher_preview: false,
        }
    }

    pub fn requiring(pattern: &str, capability: Capability) -> Self {
        Self {
            pattern: pattern.to_string(),
            capability: Some(capability),
            teacher_preview: false,
        }
    }

    pub fn with_teacher_preview(mut self) -> Self {
        self.teacher_preview = true;
        self
    }

    /// Match a concrete path, returning captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = split_path(&self.pattern);
        let actual: Vec<&str> = split_path(path);
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (p, a) in pattern.iter().zip(actual.iter()) {
            if let Some(name) = p.strip_prefix(':') {
                params.insert(name.to_string(), (*a).to_string());
            } else if p != a {
                return None;
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Stateless authorization policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard;

impl AccessGuard {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `principal` holds `capability`. Rules are evaluated in
    /// order and the first match wins.
    pub fn authorize(&self, principal: &Principal, capability: Capability) -> Decision {
        self.decide(principal, capability, false)
    }

    /// Authorize entry to a route, honouring its teacher-preview marking.
    pub fn authorize_route(&self, principal: &Principal, route: &Route) -> Decision {
        match route.capability {
            None => Decision::Allow,
            Some(capability) => self.decide(principal, capability, route.teacher_preview),
        }
    }

    fn decide(&self, principal: &Principal, capability: Capability, teacher_preview: bool) -> Decision {
        if !principal.is_authenticated() {
            return Decision::Deny(DenyReason::NotAuthenticated);
        }
        match (principal.role, capability) {
            (Role::Student, Capability::ViewAsTeacher) => {
                Decision::Deny(DenyReason::InsufficientRole)
            }
            (Role::Teacher, Capability::ViewAsStudent) if !teacher_preview => {
                Decision::Deny(DenyReason::InsufficientRole)
            }
            (Role::Teacher, Capability::ViewAsStudent) => Decision::Allow,
            (Role::Student, Capability::ViewAsStudent | Capability::Authenticated) => {
                Decision::Allow
            }
            (Role::Teacher, Capability::ViewAsTeacher | Capability::Authenticated) => {
                Decision::Allow
            }
            (Role::Anonymous, _) => Decision::Deny(DenyReason::NotAuthenticated),
        }
    }
}

/// Landing page for a role.
pub fn home_path(role: Role) -> &'static str {
    match role {
        Role::Teacher => "/teacher",
        Role::Student => "/student",
        Role::Anonymous => "/",
    }
}

/// Where the router should send a principal after a denial.
pub fn redirect_for(principal: &Principal, reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::NotAuthenticated => "/login",
        DenyReason::InsufficientRole => home_path(principal.role),
    }
}

/// Ordered set of routes; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The platform's route table.
    pub fn standard() -> Self {
        use Capability::*;

        Self::new(vec![
            Route::public("/"),
            Route::public("/login"),
            Route::public("/register"),
            Route::public("/forgot-password"),
            Route::public("/reset-password/:token"),
            Route::requiring("/settings", Authenticated),
            Route::requiring("/assignment/:id", ViewAsStudent).with_teacher_preview(),
            Route::requiring("/teacher/assignments/:assignmentId/preview", ViewAsStudent)
                .with_teacher_preview(),
            Route::requiring("/teacher", ViewAsTeacher),
            Route::requiring("/teacher/classrooms", ViewAsTeacher),
            Route::requiring("/teacher/classrooms/create", ViewAsTeacher),
            Route::requiring("/teacher/classrooms/:classroomId", ViewAsTeacher),
            Route::requiring("/teacher/classrooms/:classroomId/edit", ViewAsTeacher),
            Route::requiring(
                "/teacher/classrooms/:classroomId/assignments/create",
                ViewAsTeacher,
            ),
            Route::requiring("/teacher/assignments/:assignmentId", ViewAsTeacher),
            Route::requiring("/teacher/assignments/:assignmentId/edit", ViewAsTeacher),
            Route::requiring("/student", ViewAsStudent),
        ])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the route serving `path` and its captured parameters.
    pub fn resolve(&self, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(path).map(|params| (route, params)))
    }
}
