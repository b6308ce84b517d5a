//! Sandbox session coordination.
//!
//! At most one session is open per attempt. Concurrent `open` calls for the
//! same attempt serialize on a per-attempt slot, so the second caller gets
//! the session the first one created. Provisioning and release run on
//! spawned tasks: if a caller times out or is cancelled, a sandbox that the
//! backend hands back later is released by a reaper instead of leaking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, SandboxError};
use crate::ids::{AttemptId, SessionId};
use crate::model::ExecutionResult;
use crate::traits::{ProvisionRequest, SandboxHandle, SandboxProvider};

/// Deadlines applied to backend calls.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long provisioning may take.
    pub provision_timeout: Duration,
    /// How long a single run may take.
    pub run_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(120),
            run_timeout: Duration::from_secs(30),
        }
    }
}

struct OpenSession {
    id: SessionId,
    handle: SandboxHandle,
}

type Slot = Arc<tokio::sync::Mutex<Option<OpenSession>>>;

#[derive(Default)]
struct Registry {
    slots: HashMap<AttemptId, Slot>,
    sessions: HashMap<SessionId, (AttemptId, SandboxHandle)>,
}

/// Provisions, tracks, and tears down the sandbox behind each attempt.
pub struct SandboxSessionCoordinator {
    provider: Arc<dyn SandboxProvider>,
    config: CoordinatorConfig,
    registry: Mutex<Registry>,
}

impl SandboxSessionCoordinator {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: CoordinatorConfig) -> Self {
        Self {
            provider,
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Name of the sandbox backend, e.g. `"local"`.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Open the attempt's session, or return the one already open.
    pub async fn open(&self, request: &ProvisionRequest) -> Result<SessionId, EngineError> {
        self.open_with_deadline(request, self.config.provision_timeout)
            .await
    }

    /// [`open`](Self::open) with a caller-supplied deadline.
    #[instrument(skip(self, request), fields(attempt = %request.attempt_id, backend = self.provider.name()))]
    pub async fn open_with_deadline(
        &self,
        request: &ProvisionRequest,
        deadline: Duration,
    ) -> Result<SessionId, EngineError> {
        let slot = self.slot(request.attempt_id);
        let mut current = slot.lock().await;
        if let Some(open) = current.as_ref() {
            debug!(session = %open.id, "reusing open sandbox session");
            return Ok(open.id);
        }

        let mut pending = PendingProvision::spawn(Arc::clone(&self.provider), request.clone());
        match tokio::time::timeout(deadline, pending.wait()).await {
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "sandbox provisioning timed out");
                self.prune_slot(request.attempt_id, &slot);
                Err(EngineError::SandboxProvisionError(format!(
                    "provisioning timed out after {}ms",
                    deadline.as_millis()
                )))
            }
            Ok(Err(e)) => {
                warn!(error = %format!("{e:#}"), "sandbox provisioning failed");
                self.prune_slot(request.attempt_id, &slot);
                Err(EngineError::SandboxProvisionError(format!("{e:#}")))
            }
            Ok(Ok(handle)) => {
                let id = SessionId::new();
                self.registry()
                    .sessions
                    .insert(id, (request.attempt_id, handle.clone()));
                *current = Some(OpenSession { id, handle });
                info!(session = %id, "sandbox session opened");
                Ok(id)
            }
        }
    }

    /// Release a session. Unknown or already closed ids are ignored.
    #[instrument(skip(self))]
    pub async fn close(&self, session: SessionId) {
        let lookup = {
            let registry = self.registry();
            registry
                .sessions
                .get(&session)
                .and_then(|(attempt, _)| registry.slots.get(attempt).map(|s| (*attempt, Arc::clone(s))))
        };
        let Some((attempt, slot)) = lookup else {
            debug!("sandbox session already closed");
            return;
        };

        let handle = {
            let mut current = slot.lock().await;
            if current.as_ref().map(|s| s.id) != Some(session) {
                debug!("sandbox session closed concurrently");
                return;
            }
            let Some(open) = current.take() else {
                return;
            };

            self.registry().sessions.remove(&session);
            self.prune_slot(attempt, &slot);
            open.handle
        };

        let provider = Arc::clone(&self.provider);
        let release = tokio::spawn(async move { provider.release(&handle).await });
        match release.await {
            Ok(Ok(())) => info!("sandbox session closed"),
            Ok(Err(e)) => warn!(error = %format!("{e:#}"), "sandbox release failed"),
            Err(e) => warn!(error = %e, "sandbox release task failed"),
        }
    }

    /// Run code in an open session.
    pub async fn run(&self, session: SessionId, code: &str) -> Result<ExecutionResult, EngineError> {
        self.run_with_deadline(session, code, self.config.run_timeout)
            .await
    }

    /// [`run`](Self::run) with a caller-supplied deadline.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn run_with_deadline(
        &self,
        session: SessionId,
        code: &str,
        deadline: Duration,
    ) -> Result<ExecutionResult, EngineError> {
        let handle = self
            .registry()
            .sessions
            .get(&session)
            .map(|(_, handle)| handle.clone())
            .ok_or(EngineError::SandboxNotFound(session))?;

        match tokio::time::timeout(deadline, self.provider.execute(&handle, code)).await {
            Err(_) => Err(EngineError::ExecutionTimeout(deadline.as_millis() as u64)),
            Ok(Ok(result)) => {
                debug!(duration_ms = result.duration_ms, "execution finished");
                Ok(result)
            }
            Ok(Err(e)) => Err(classify_run_error(session, e)),
        }
    }

    /// The session currently open for an attempt.
    pub fn session_for(&self, attempt: AttemptId) -> Option<SessionId> {
        self.registry()
            .sessions
            .iter()
            .find(|(_, (owner, _))| *owner == attempt)
            .map(|(id, _)| *id)
    }

    pub fn open_sessions(&self) -> usize {
        self.registry().sessions.len()
    }

    /// Close every open session.
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionId> = self.registry().sessions.keys().copied().collect();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "closing all sandbox sessions");
        }
        join_all(sessions.into_iter().map(|s| self.close(s))).await;
    }

    /// Drop the attempt's slot once it holds no session and nobody else is
    /// waiting on it.
    fn prune_slot(&self, attempt: AttemptId, slot: &Slot) {
        let mut registry = self.registry();
        // Only the registry and the caller hold the slot.
        if Arc::strong_count(slot) == 2 {
            registry.slots.remove(&attempt);
        }
    }

    #[cfg(test)]
    fn tracked_slots(&self) -> usize {
        self.registry().slots.len()
    }

    fn slot(&self, attempt: AttemptId) -> Slot {
        Arc::clone(self.registry().slots.entry(attempt).or_default())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify_run_error(session: SessionId, error: anyhow::Error) -> EngineError {
    match error.downcast_ref::<SandboxError>() {
        Some(SandboxError::Timeout(ms)) => EngineError::ExecutionTimeout(*ms),
        Some(SandboxError::NotFound(_)) => EngineError::SandboxNotFound(session),
        _ => EngineError::SandboxProvisionError(format!("{error:#}")),
    }
}

/// A provisioning call running on its own task.
struct PendingProvision {
    task: Option<JoinHandle<anyhow::Result<SandboxHandle>>>,
    provider: Arc<dyn SandboxProvider>,
}

impl PendingProvision {
    fn spawn(provider: Arc<dyn SandboxProvider>, request: ProvisionRequest) -> Self {
        let backend = Arc::clone(&provider);
        let task = tokio::spawn(async move { backend.provision(&request).await });
        Self {
            task: Some(task),
            provider,
        }
    }

    async fn wait(&mut self) -> anyhow::Result<SandboxHandle> {
        let Some(task) = self.task.as_mut() else {
            anyhow::bail!("provisioning already settled");
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| anyhow::anyhow!("provisioning task failed: {e}"))?
    }
}

impl Drop for PendingProvision {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            task.abort();
            return;
        };
        let provider = Arc::clone(&self.provider);
        runtime.spawn(async move {
            if let Ok(Ok(handle)) = task.await {
                warn!(key = %handle.key, "releasing sandbox provisioned after its caller gave up");
                if let Err(e) = provider.release(&handle).await {
                    warn!(error = %format!("{e:#}"), "failed to release abandoned sandbox");
                }
            }
        });
    }
}
