//! Assignment navigation.
//!
//! The navigator ties a principal, an assignment, an attempt, and a sandbox
//! session together. It owns every live attempt in an arena keyed by
//! [`AttemptId`]; callers hold ids, never references.
//!
//! Operations on one attempt are serialized by a per-attempt lock, except
//! that the lock is released while code runs in the sandbox so a slow run
//! never blocks navigation. A verdict that arrives after the student moved
//! on is still credited to the module the code was written for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::access::{AccessGuard, Capability, Decision, DenyReason, RouteTable};
use crate::error::EngineError;
use crate::ids::AttemptId;
use crate::model::{strip_editable_markers, Assignment, ExecutionResult, Module, Principal, Role};
use crate::progress::{Advance, AssignmentAttempt, AttemptState};
use crate::session::SandboxSessionCoordinator;
use crate::traits::{AssignmentRepository, AttemptStore, ProvisionRequest};
use crate::verifier::{verify, Verification};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Receives navigation events, e.g. to update a UI.
///
/// Calls are made while the attempt is locked; implementations must not call
/// back into the navigator.
pub trait NavigatorListener: Send + Sync {
    fn on_module_changed(&self, attempt: AttemptId, module_id: &str);
    fn on_verification_result(&self, attempt: AttemptId, module_id: &str, matches: bool);
    fn on_attempt_finished(&self, attempt: AttemptId);
}

/// A listener that ignores every event.
pub struct NoopListener;

impl NavigatorListener for NoopListener {
    fn on_module_changed(&self, _attempt: AttemptId, _module_id: &str) {}
    fn on_verification_result(&self, _attempt: AttemptId, _module_id: &str, _matches: bool) {}
    fn on_attempt_finished(&self, _attempt: AttemptId) {}
}

/// A navigation event, as recorded by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NavigatorEvent {
    ModuleChanged { attempt: AttemptId, module_id: String },
    VerificationResult { attempt: AttemptId, module_id: String, matches: bool },
    AttemptFinished { attempt: AttemptId },
}

/// A listener that keeps every event in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<NavigatorEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NavigatorEvent> {
        self.lock().clone()
    }

    fn push(&self, event: NavigatorEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NavigatorEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NavigatorListener for RecordingListener {
    fn on_module_changed(&self, attempt: AttemptId, module_id: &str) {
        self.push(NavigatorEvent::ModuleChanged {
            attempt,
            module_id: module_id.to_string(),
        });
    }

    fn on_verification_result(&self, attempt: AttemptId, module_id: &str, matches: bool) {
        self.push(NavigatorEvent::VerificationResult {
            attempt,
            module_id: module_id.to_string(),
            matches,
        });
    }

    fn on_attempt_finished(&self, attempt: AttemptId) {
        self.push(NavigatorEvent::AttemptFinished { attempt });
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of [`AssignmentNavigator::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The given module is now active.
    Moved(String),
    /// The attempt is complete. Carries its final snapshot; the navigator no
    /// longer tracks it.
    Finished(Box<AssignmentAttempt>),
}

/// Result of [`AssignmentNavigator::run_current_module`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// The module the code was run for.
    pub module_id: String,
    pub result: ExecutionResult,
    /// `None` when the module has no expected output.
    pub verification: Option<Verification>,
}

impl RunOutcome {
    /// Output as shown to the student.
    pub fn output(&self) -> String {
        self.result.combined_output()
    }
}

// ---------------------------------------------------------------------------
// Navigator
// ---------------------------------------------------------------------------

struct LiveAttempt {
    assignment: Arc<Assignment>,
    attempt: AssignmentAttempt,
    /// Teacher preview: never persisted.
    preview: bool,
}

type Entry = Arc<tokio::sync::Mutex<LiveAttempt>>;

#[derive(Default)]
struct Arena {
    attempts: HashMap<AttemptId, Entry>,
    /// Unfinished attempt per (owner, assignment), for re-entry.
    by_owner: HashMap<(String, String), AttemptId>,
}

/// Drives attempts through an assignment's modules.
pub struct AssignmentNavigator {
    repository: Arc<dyn AssignmentRepository>,
    coordinator: Arc<SandboxSessionCoordinator>,
    guard: AccessGuard,
    routes: RouteTable,
    store: Option<Arc<dyn AttemptStore>>,
    listener: Arc<dyn NavigatorListener>,
    arena: Mutex<Arena>,
}

impl AssignmentNavigator {
    pub fn new(
        repository: Arc<dyn AssignmentRepository>,
        coordinator: Arc<SandboxSessionCoordinator>,
    ) -> Self {
        Self {
            repository,
            coordinator,
            guard: AccessGuard::new(),
            routes: RouteTable::standard(),
            store: None,
            listener: Arc::new(NoopListener),
            arena: Mutex::new(Arena::default()),
        }
    }

    /// Persist attempt snapshots after every transition.
    pub fn with_store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the standard route table used to resolve entry paths.
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn NavigatorListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn coordinator(&self) -> &Arc<SandboxSessionCoordinator> {
        &self.coordinator
    }

    /// Enter an assignment through the page at `path`.
    ///
    /// The path must resolve to a student view of `assignment_id`; any other
    /// page is refused even when the principal may visit it.
    ///
    /// Re-entering an assignment with an unfinished attempt resumes it, from
    /// memory or from the store. The sandbox session is opened before the
    /// attempt becomes visible, so a failed entry leaves nothing behind.
    #[instrument(skip(self, principal))]
    pub async fn enter(
        &self,
        principal: &Principal,
        path: &str,
        assignment_id: &str,
    ) -> Result<AttemptId, EngineError> {
        let mismatch = || EngineError::RouteMismatch {
            path: path.to_string(),
            assignment: assignment_id.to_string(),
        };
        let (route, params) = self.routes.resolve(path).ok_or_else(mismatch)?;
        let decision = match route.capability {
            Some(Capability::ViewAsStudent) => self.guard.authorize_route(principal, route),
            _ if !principal.is_authenticated() => Decision::Deny(DenyReason::NotAuthenticated),
            _ => Decision::Deny(DenyReason::InsufficientRole),
        };
        decision.into_result(principal, Capability::ViewAsStudent)?;
        let captured = params.get("id").or_else(|| params.get("assignmentId"));
        if captured.map(String::as_str) != Some(assignment_id) {
            return Err(mismatch());
        }

        let owner = match (&principal.id, principal.is_authenticated()) {
            (Some(id), true) => id.clone(),
            _ => return Err(EngineError::NotAuthenticated),
        };
        let preview = principal.role == Role::Teacher;

        let key = (owner.clone(), assignment_id.to_string());
        if let Some(existing) = self.arena().by_owner.get(&key).copied() {
            debug!(attempt = %existing, "resuming live attempt");
            return Ok(existing);
        }

        let assignment = self
            .repository
            .get_assignment(assignment_id)
            .await
            .map_err(|e| EngineError::Repository(format!("{e:#}")))?
            .ok_or_else(|| EngineError::AssignmentNotFound(assignment_id.to_string()))?;

        let mut attempt = match self.restore(&owner, &assignment, preview).await {
            Some(attempt) => attempt,
            None => AssignmentAttempt::new(&assignment, owner.clone())?,
        };

        let request = ProvisionRequest::for_assignment(attempt.id, &assignment);
        let session = self.coordinator.open(&request).await?;
        attempt.attach_session(session);
        attempt.start();

        let id = attempt.id;
        let module_id = attempt.active_module_id().to_string();
        let live = LiveAttempt {
            assignment: Arc::new(assignment),
            attempt,
            preview,
        };
        self.persist(&live).await;
        {
            let mut arena = self.arena();
            arena.attempts.insert(id, Arc::new(tokio::sync::Mutex::new(live)));
            arena.by_owner.insert(key, id);
        }

        info!(attempt = %id, %owner, preview, "entered assignment");
        self.listener.on_module_changed(id, &module_id);
        Ok(id)
    }

    /// Make `module_id` the active module.
    #[instrument(skip(self))]
    pub async fn select_module(&self, attempt_id: AttemptId, module_id: &str) -> Result<(), EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        let changed = live.attempt.active_module_id() != module_id;
        live.attempt.select_module(module_id)?;
        self.persist(&live).await;
        if changed {
            self.listener.on_module_changed(attempt_id, module_id);
        }
        Ok(())
    }

    /// Move to the next module, or finish the attempt from the last one.
    ///
    /// Finishing closes the sandbox session and stops tracking the attempt.
    #[instrument(skip(self))]
    pub async fn next(&self, attempt_id: AttemptId) -> Result<Step, EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        match live.attempt.advance()? {
            Advance::Moved(module_id) => {
                self.persist(&live).await;
                self.listener.on_module_changed(attempt_id, &module_id);
                Ok(Step::Moved(module_id))
            }
            Advance::Finished => {
                if let Some(session) = live.attempt.detach_session() {
                    self.coordinator.close(session).await;
                }
                self.persist(&live).await;
                self.forget(attempt_id, &live.attempt);
                let summary = live.attempt.summary();
                info!(
                    attempt = %attempt_id,
                    completed = summary.completed,
                    total = summary.total,
                    "attempt finished"
                );
                self.listener.on_attempt_finished(attempt_id);
                Ok(Step::Finished(Box::new(live.attempt.clone())))
            }
        }
    }

    /// Move to the previous module. Returns the active module id, which is
    /// unchanged on the first module.
    #[instrument(skip(self))]
    pub async fn previous(&self, attempt_id: AttemptId) -> Result<String, EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        let moved = live.attempt.retreat()?;
        let module_id = live.attempt.active_module_id().to_string();
        if moved {
            self.persist(&live).await;
            self.listener.on_module_changed(attempt_id, &module_id);
        }
        Ok(module_id)
    }

    /// Run code for the active module and grade it.
    ///
    /// The code is saved as the module's draft first. Modules without an
    /// expected output are run but never graded. A verdict only ever adds
    /// the module to the completed set.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn run_current_module(
        &self,
        attempt_id: AttemptId,
        code: &str,
    ) -> Result<RunOutcome, EngineError> {
        let entry = self.entry(attempt_id)?;
        let (module_id, expected, session) = {
            let mut live = entry.lock().await;
            if live.attempt.state() == AttemptState::Completed {
                return Err(EngineError::AttemptFinished);
            }
            let module_id = live.attempt.active_module_id().to_string();
            let expected = live
                .assignment
                .module(&module_id)
                .and_then(Module::gradable_output)
                .map(str::to_string);
            let session = live
                .attempt
                .sandbox_session_id()
                .ok_or_else(|| EngineError::SandboxProvisionError("attempt has no sandbox session".into()))?;
            live.attempt.save_draft(&module_id, code)?;
            (module_id, expected, session)
        };

        let result = self
            .coordinator
            .run(session, &strip_editable_markers(code))
            .await?;

        let Some(expected) = expected else {
            debug!(module = %module_id, "module has no expected output; not grading");
            return Ok(RunOutcome {
                module_id,
                result,
                verification: None,
            });
        };

        let verification = verify(&result.combined_output(), &expected);
        {
            let mut live = entry.lock().await;
            live.attempt
                .record_verification(&module_id, verification.matches)?;
            self.persist(&live).await;
        }
        info!(module = %module_id, matches = verification.matches, "verified output");
        self.listener
            .on_verification_result(attempt_id, &module_id, verification.matches);

        Ok(RunOutcome {
            module_id,
            result,
            verification: Some(verification),
        })
    }

    /// Save code for the active module without running it.
    pub async fn save_draft(&self, attempt_id: AttemptId, code: &str) -> Result<(), EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        let module_id = live.attempt.active_module_id().to_string();
        live.attempt.save_draft(&module_id, code)?;
        self.persist(&live).await;
        Ok(())
    }

    /// Code to show in the editor for the active module.
    pub async fn current_code(&self, attempt_id: AttemptId) -> Result<String, EngineError> {
        let entry = self.entry(attempt_id)?;
        let live = entry.lock().await;
        let module_id = live.attempt.active_module_id();
        Ok(live
            .attempt
            .current_code(&live.assignment, module_id)
            .unwrap_or_default()
            .to_string())
    }

    /// Drop the active module's draft and return its starter code.
    pub async fn reset_code(&self, attempt_id: AttemptId) -> Result<String, EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        let module_id = live.attempt.active_module_id().to_string();
        live.attempt.reset_code(&module_id)?;
        self.persist(&live).await;
        Ok(live
            .assignment
            .module(&module_id)
            .map(|m| m.starter_code.clone())
            .unwrap_or_default())
    }

    /// Reveal the next hint of the active module.
    pub async fn reveal_hint(&self, attempt_id: AttemptId) -> Result<Option<String>, EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        let module_id = live.attempt.active_module_id().to_string();
        let assignment = Arc::clone(&live.assignment);
        let revealed = live.attempt.reveal_hint(&assignment, &module_id)?;
        if revealed.is_some() {
            self.persist(&live).await;
        }
        Ok(revealed.and_then(|i| assignment.module(&module_id).and_then(|m| m.hints.get(i).cloned())))
    }

    /// The active module.
    pub async fn current_module(&self, attempt_id: AttemptId) -> Result<Module, EngineError> {
        let entry = self.entry(attempt_id)?;
        let live = entry.lock().await;
        live.assignment
            .module(live.attempt.active_module_id())
            .cloned()
            .ok_or_else(|| EngineError::InvalidModuleReference(live.attempt.active_module_id().to_string()))
    }

    /// The assignment an attempt is working through.
    pub async fn assignment(&self, attempt_id: AttemptId) -> Result<Arc<Assignment>, EngineError> {
        let entry = self.entry(attempt_id)?;
        let live = entry.lock().await;
        Ok(Arc::clone(&live.assignment))
    }

    /// A copy of the attempt's current state.
    pub async fn snapshot(&self, attempt_id: AttemptId) -> Result<AssignmentAttempt, EngineError> {
        let entry = self.entry(attempt_id)?;
        let live = entry.lock().await;
        Ok(live.attempt.clone())
    }

    /// Leave an attempt without finishing it. The session is closed and the
    /// attempt can be resumed from the store later.
    #[instrument(skip(self))]
    pub async fn abandon(&self, attempt_id: AttemptId) -> Result<(), EngineError> {
        let entry = self.entry(attempt_id)?;
        let mut live = entry.lock().await;
        if let Some(session) = live.attempt.detach_session() {
            self.coordinator.close(session).await;
        }
        self.persist(&live).await;
        self.forget(attempt_id, &live.attempt);
        info!(attempt = %attempt_id, "attempt abandoned");
        Ok(())
    }

    /// Number of attempts currently tracked.
    pub fn live_attempts(&self) -> usize {
        self.arena().attempts.len()
    }

    /// Restore the owner's unfinished attempt from the store, if it still
    /// fits the assignment.
    async fn restore(&self, owner: &str, assignment: &Assignment, preview: bool) -> Option<AssignmentAttempt> {
        if preview {
            return None;
        }
        let store = self.store.as_ref()?;
        let mut stored = match store.load(owner, &assignment.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "failed to load stored attempt; starting fresh");
                return None;
            }
        };
        if stored.owner != owner || stored.assignment_id != assignment.id {
            warn!(
                attempt = %stored.id,
                stored_owner = %stored.owner,
                stored_assignment = %stored.assignment_id,
                "stored attempt belongs elsewhere; starting fresh"
            );
            return None;
        }
        if stored.state() == AttemptState::Completed {
            return None;
        }
        if let Err(e) = stored.validate_against(assignment) {
            warn!(attempt = %stored.id, error = %e, "stored attempt no longer fits; starting fresh");
            return None;
        }
        // Sessions never survive a restart.
        stored.detach_session();
        info!(attempt = %stored.id, "restored attempt from store");
        Some(stored)
    }

    async fn persist(&self, live: &LiveAttempt) {
        if live.preview {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&live.attempt).await {
            warn!(attempt = %live.attempt.id, error = %format!("{e:#}"), "failed to persist attempt");
        }
    }

    fn forget(&self, attempt_id: AttemptId, attempt: &AssignmentAttempt) {
        let mut arena = self.arena();
        arena.attempts.remove(&attempt_id);
        let key = (attempt.owner.clone(), attempt.assignment_id.clone());
        if arena.by_owner.get(&key) == Some(&attempt_id) {
            arena.by_owner.remove(&key);
        }
    }

    fn entry(&self, attempt_id: AttemptId) -> Result<Entry, EngineError> {
        self.arena()
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or(EngineError::AttemptNotFound(attempt_id))
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
