//! Provisioning workflow engine.
//!
//! One runner thread per instance drives it through its steps. Every
//! transition and step result is checkpointed to the `WorkflowStore`, so a
//! restarted process continues from the last completed step
//! (`resume_incomplete`).
//!
//! Runners execute steps without holding any lock. Checkpoints, signals
//! (`cancel`, `retrigger`, `update_configuration`) and runner start/exit
//! are serialized per instance by the slot lock; `status` reads the store
//! directly and never waits on a runner.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use adminhub_projects::ProjectId;

use super::state::WorkflowState;
use super::steps::WorkflowSteps;
use super::store::{WorkflowStore, WorkflowStoreError};
use super::types::{
    ConfigurationUpdate, NotificationMode, ProvisioningRequest, ProvisioningStepResult, StepKind,
    StepOutcome, StepRecord, WorkflowInstance,
};
use crate::config::AdminConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no workflow for project {0}")]
    NotFound(ProjectId),

    #[error("cannot {action} workflow for project {project_id} in state {state}")]
    InvalidTransition {
        project_id: ProjectId,
        state: WorkflowState,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] WorkflowStoreError),

    #[error("failed to spawn workflow runner: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub notification_mode: NotificationMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            notification_mode: NotificationMode::BestEffort,
        }
    }
}

impl From<&AdminConfig> for EngineConfig {
    fn from(config: &AdminConfig) -> Self {
        Self {
            retry: config.workflow_retry.clone(),
            notification_mode: config.notification_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// An instance already exists for the project; nothing was started.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Run,
    Cancel,
    /// Process shutdown: exit without touching the instance.
    Stop,
}

/// Signal cell a runner polls between attempts and waits on during backoff.
#[derive(Debug)]
struct Control {
    signal: Mutex<Signal>,
    wake: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            signal: Mutex::new(Signal::Run),
            wake: Condvar::new(),
        }
    }

    fn current(&self) -> Signal {
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, signal: Signal) {
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner) = signal;
        self.wake.notify_all();
    }

    /// Sleep for `delay` unless signalled; returns the signal seen on wake-up.
    fn sleep(&self, delay: Duration) -> Signal {
        let guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, delay, |s| *s == Signal::Run)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    active: bool,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Debug)]
struct InstanceSlot {
    runner: Mutex<RunnerState>,
    control: Control,
}

impl InstanceSlot {
    fn new() -> Self {
        Self {
            runner: Mutex::new(RunnerState::default()),
            control: Control::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.runner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct EngineInner<W> {
    store: W,
    steps: WorkflowSteps,
    config: EngineConfig,
    slots: Mutex<HashMap<ProjectId, Arc<InstanceSlot>>>,
}

/// Handle to the engine; cheap to clone.
pub struct WorkflowEngine<W> {
    inner: Arc<EngineInner<W>>,
}

impl<W> Clone for WorkflowEngine<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W> WorkflowEngine<W>
where
    W: WorkflowStore + 'static,
{
    pub fn new(store: W, steps: WorkflowSteps, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                steps,
                config,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &W {
        &self.inner.store
    }

    /// Start provisioning for a project. Deduplicated by project id.
    pub fn start(&self, request: ProvisioningRequest) -> Result<StartOutcome, WorkflowError> {
        let project_id = request.project_id;
        let instance = WorkflowInstance::new(request);

        match self.inner.store.create(&instance) {
            Ok(()) => {}
            Err(WorkflowStoreError::AlreadyExists(_)) => {
                debug!(%project_id, "workflow already exists; duplicate trigger ignored");
                return Ok(StartOutcome::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        }

        info!(%project_id, tenant_id = %request.tenant_id, "workflow started");
        self.inner.with_slot(project_id, |slot, runner| {
            spawn_runner(&self.inner, slot, runner, project_id)
        })?;
        Ok(StartOutcome::Started)
    }

    /// Current state, from any state, without side effects.
    pub fn status(&self, project_id: ProjectId) -> Result<WorkflowState, WorkflowError> {
        Ok(self.instance(project_id)?.state)
    }

    pub fn instance(&self, project_id: ProjectId) -> Result<WorkflowInstance, WorkflowError> {
        self.inner
            .store
            .load(project_id)?
            .ok_or(WorkflowError::NotFound(project_id))
    }

    /// Record a configuration update. Accepted but ignored (returns `false`)
    /// once the instance is terminal; never changes the state.
    pub fn update_configuration(
        &self,
        project_id: ProjectId,
        payload: JsonValue,
    ) -> Result<bool, WorkflowError> {
        self.inner.with_slot(project_id, |_, _| {
            let mut instance = self.instance(project_id)?;

            if instance.state.is_terminal() {
                debug!(%project_id, state = %instance.state, "configuration update ignored");
                return Ok(false);
            }

            let now = Utc::now();
            instance.configuration_updates.push(ConfigurationUpdate {
                received_at: now,
                state: instance.state,
                payload,
            });
            instance.updated_at = now;
            self.inner.store.save(&instance)?;
            debug!(%project_id, state = %instance.state, "configuration update recorded");
            Ok(true)
        })
    }

    /// Cancel a running instance. Completed steps are not compensated.
    /// Terminal instances are left as they are.
    pub fn cancel(&self, project_id: ProjectId) -> Result<WorkflowState, WorkflowError> {
        self.inner.with_slot(project_id, |slot, _| {
            let mut instance = self.instance(project_id)?;

            if instance.state.is_terminal() {
                return Ok(instance.state);
            }

            let from = instance.state;
            instance.transition(WorkflowState::Cancelled, Some("cancel signal".to_string()));
            self.inner.store.save(&instance)?;
            slot.control.set(Signal::Cancel);

            info!(%project_id, from = %from, "workflow cancelled");
            Ok(instance.state)
        })
    }

    /// Restart a failed instance at `initializing`, keeping its step log.
    pub fn retrigger(&self, project_id: ProjectId) -> Result<(), WorkflowError> {
        self.inner.with_slot(project_id, |slot, runner| {
            let mut instance = self.instance(project_id)?;

            if instance.state != WorkflowState::Failed {
                return Err(WorkflowError::InvalidTransition {
                    project_id,
                    state: instance.state,
                    action: "retrigger",
                });
            }

            instance.generation += 1;
            instance.transition(WorkflowState::Initializing, Some("retrigger".to_string()));
            self.inner.store.save(&instance)?;
            slot.control.set(Signal::Run);

            info!(%project_id, generation = instance.generation, "workflow retriggered");
            spawn_runner(&self.inner, slot, runner, project_id)
        })
    }

    /// Start runners for every checkpointed non-terminal instance without
    /// one. Returns how many were started.
    pub fn resume_incomplete(&self) -> Result<usize, WorkflowError> {
        let mut resumed = 0;
        for instance in self.inner.store.list_incomplete()? {
            let project_id = instance.project_id();
            let started = self.inner.with_slot(project_id, |slot, runner| {
                if runner.active {
                    return Ok(false);
                }
                slot.control.set(Signal::Run);
                spawn_runner(&self.inner, slot, runner, project_id).map(|()| true)
            })?;
            if started {
                resumed += 1;
                info!(%project_id, state = %instance.state, "workflow resumed");
            }
        }
        Ok(resumed)
    }

    /// Wait for the instance's current runner (if any) to exit.
    pub fn join(&self, project_id: ProjectId) {
        let Some(slot) = self.inner.existing_slot(project_id) else {
            return;
        };
        let handle = slot.lock().handle.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.inner.release_idle(project_id, &slot);
    }

    /// Stop every runner, leaving instances resumable.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<InstanceSlot>> = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let handles: Vec<_> = slots
            .iter()
            .filter_map(|slot| {
                slot.control.set(Signal::Stop);
                slot.lock().handle.take()
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!(runners = slots.len(), "workflow engine stopped");
    }
}

impl<W> EngineInner<W> {
    fn slot(&self, project_id: ProjectId) -> Arc<InstanceSlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(project_id)
            .or_insert_with(|| Arc::new(InstanceSlot::new()))
            .clone()
    }

    fn existing_slot(&self, project_id: ProjectId) -> Option<Arc<InstanceSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project_id)
            .cloned()
    }

    /// Run `f` under the instance's slot lock, then forget the slot if no
    /// runner is left on it.
    fn with_slot<T>(
        &self,
        project_id: ProjectId,
        f: impl FnOnce(&Arc<InstanceSlot>, &mut RunnerState) -> T,
    ) -> T {
        let slot = self.slot(project_id);
        let out = {
            let mut runner = slot.lock();
            f(&slot, &mut runner)
        };
        self.release_idle(project_id, &slot);
        out
    }

    fn release_idle(&self, project_id: ProjectId, slot: &Arc<InstanceSlot>) {
        let idle = !slot.lock().active;
        if idle {
            self.release_slot(project_id, slot);
        }
    }

    /// Drop the map entry once the caller's `slot` and the map are its only
    /// owners. The caller guarantees no runner is active on it; anyone
    /// needing the slot later gets a fresh one.
    fn release_slot(&self, project_id: ProjectId, slot: &Arc<InstanceSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let tracked = slots.get(&project_id).is_some_and(|s| Arc::ptr_eq(s, slot));
        if tracked && Arc::strong_count(slot) == 2 {
            slots.remove(&project_id);
            debug!(%project_id, "workflow slot released");
        }
    }

    #[cfg(test)]
    fn tracked_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Caller holds the slot lock (`runner`).
fn spawn_runner<W>(
    inner: &Arc<EngineInner<W>>,
    slot: &Arc<InstanceSlot>,
    runner: &mut RunnerState,
    project_id: ProjectId,
) -> Result<(), WorkflowError>
where
    W: WorkflowStore + 'static,
{
    if runner.active {
        return Ok(());
    }

    let thread_inner = inner.clone();
    let thread_slot = slot.clone();
    let handle = thread::Builder::new()
        .name(format!("workflow-{project_id}"))
        .spawn(move || run_instance(&thread_inner, &thread_slot, project_id))
        .map_err(|e| WorkflowError::Spawn(e.to_string()))?;

    runner.active = true;
    runner.handle = Some(handle);
    Ok(())
}

fn run_instance<W: WorkflowStore>(
    inner: &EngineInner<W>,
    slot: &Arc<InstanceSlot>,
    project_id: ProjectId,
) {
    debug!(%project_id, "workflow runner started");

    loop {
        let instance = {
            let mut runner = slot.lock();
            let loaded = match inner.store.load(project_id) {
                Ok(Some(i)) => i,
                Ok(None) => {
                    error!(%project_id, "workflow instance disappeared");
                    runner.active = false;
                    return;
                }
                Err(e) => {
                    error!(%project_id, error = %e, "failed to load workflow; runner exiting");
                    runner.active = false;
                    return;
                }
            };
            if loaded.state.is_terminal() || slot.control.current() != Signal::Run {
                debug!(%project_id, state = %loaded.state, "workflow runner exiting");
                runner.active = false;
                inner.release_slot(project_id, slot);
                return;
            }
            loaded
        };

        let result = match StepKind::for_state(instance.state) {
            None => advance(inner, slot, &instance, instance.state.next(), None, None),
            Some(kind) => match run_step(inner, slot, &instance, kind) {
                Some(record) => {
                    let (to, reason) = outcome_transition(&inner.config, kind, &record.result);
                    advance(inner, slot, &instance, Some(to), reason, Some(record))
                }
                // Signalled mid-step; the loop head decides what to do.
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            error!(%project_id, error = %e, "workflow checkpoint failed; runner exiting");
            slot.lock().active = false;
            inner.release_idle(project_id, slot);
            return;
        }
    }
}

/// Run one step with retries. `None` when interrupted by a signal.
fn run_step<W: WorkflowStore>(
    inner: &EngineInner<W>,
    slot: &InstanceSlot,
    instance: &WorkflowInstance,
    kind: StepKind,
) -> Option<StepRecord> {
    let policy = &inner.config.retry;
    let step = inner.steps.get(kind);
    let project_id = instance.project_id();
    let started_at = Utc::now();
    let mut attempt = 0;

    loop {
        if slot.control.current() != Signal::Run {
            return None;
        }
        attempt += 1;

        let (success, resources, error) = match step.run(&instance.request) {
            StepOutcome::Succeeded(resources) => (true, resources, None),
            StepOutcome::Failed(err) => {
                warn!(%project_id, step = kind.as_str(), attempt, error = %err, "workflow step failed");
                if policy.should_retry(attempt) {
                    let delay = policy.delay_for_attempt(attempt);
                    if slot.control.sleep(delay) != Signal::Run {
                        return None;
                    }
                    continue;
                }
                (false, Default::default(), Some(err))
            }
        };

        if success {
            debug!(%project_id, step = kind.as_str(), attempt, "workflow step succeeded");
        }
        return Some(StepRecord {
            step: kind,
            generation: instance.generation,
            result: ProvisioningStepResult {
                success,
                resources,
                error,
                attempts: attempt,
            },
            started_at,
            finished_at: Utc::now(),
        });
    }
}

fn outcome_transition(
    config: &EngineConfig,
    kind: StepKind,
    result: &ProvisioningStepResult,
) -> (WorkflowState, Option<String>) {
    let state = kind.state();
    if result.success {
        return (state.next().unwrap_or(WorkflowState::Completed), None);
    }

    let error = result.error.clone().unwrap_or_default();
    match (kind, config.notification_mode) {
        (StepKind::SendNotifications, NotificationMode::BestEffort) => (
            WorkflowState::Completed,
            Some(format!("notification failed (best effort): {error}")),
        ),
        _ => (
            WorkflowState::Failed,
            Some(format!("{} failed after {} attempts: {error}", kind.as_str(), result.attempts)),
        ),
    }
}

/// Checkpoint a step result and/or transition, provided the instance is
/// still where the runner left it. A step that finished after a cancel is
/// still recorded.
fn advance<W: WorkflowStore>(
    inner: &EngineInner<W>,
    slot: &InstanceSlot,
    seen: &WorkflowInstance,
    to: Option<WorkflowState>,
    reason: Option<String>,
    record: Option<StepRecord>,
) -> Result<(), WorkflowStoreError> {
    let project_id = seen.project_id();
    let _runner = slot.lock();
    let Some(mut current) = inner.store.load(project_id)? else {
        return Ok(());
    };

    let unchanged = current.state == seen.state && current.generation == seen.generation;
    let cancelled_meanwhile =
        current.state == WorkflowState::Cancelled && current.generation == seen.generation;
    if !unchanged && !cancelled_meanwhile {
        return Ok(());
    }

    if let Some(record) = record {
        if !record.result.success {
            warn!(
                %project_id,
                step = record.step.as_str(),
                attempts = record.result.attempts,
                error = record.result.error.as_deref().unwrap_or_default(),
                "workflow step failure recorded"
            );
        }
        current.record_step(record);
    }

    if unchanged {
        if let Some(to) = to {
            let from = current.state;
            if current.transition(to, reason) {
                info!(%project_id, from = %from, to = %to, "workflow transition");
            }
        }
    }

    inner.store.save(&current)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use adminhub_core::TenantId;

    use super::*;
    use crate::workflow::steps::{LogNotifier, ProvisioningStep, ResourceProvisioner};
    use crate::workflow::store::InMemoryWorkflowStore;

    /// Step double: fails the first `failures` attempts.
    struct Scripted {
        kind: StepKind,
        failures: usize,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: StepKind, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                kind,
                failures,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProvisioningStep for Scripted {
        fn kind(&self) -> StepKind {
            self.kind
        }

        fn run(&self, _request: &ProvisioningRequest) -> StepOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                StepOutcome::failed(format!("attempt {} failed", n + 1))
            } else {
                StepOutcome::ok()
            }
        }
    }

    /// Blocks each run until the test releases it.
    struct Gated {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ProvisioningStep for Gated {
        fn kind(&self) -> StepKind {
            StepKind::ProvisionResources
        }

        fn run(&self, request: &ProvisioningRequest) -> StepOutcome {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            ResourceProvisioner::new().run(request)
        }
    }

    fn fast_config(mode: NotificationMode) -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4)),
            notification_mode: mode,
        }
    }

    fn request() -> ProvisioningRequest {
        ProvisioningRequest {
            tenant_id: TenantId::new(),
            project_id: ProjectId::generate(),
            requested_by: None,
        }
    }

    fn engine_with(
        provision: Arc<dyn ProvisioningStep>,
        permissions: Arc<dyn ProvisioningStep>,
        notify: Arc<dyn ProvisioningStep>,
        mode: NotificationMode,
    ) -> WorkflowEngine<Arc<InMemoryWorkflowStore>> {
        WorkflowEngine::new(
            InMemoryWorkflowStore::arc(),
            WorkflowSteps::new(provision, permissions, notify),
            fast_config(mode),
        )
    }

    #[test]
    fn happy_path_completes_with_full_step_log() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        assert_eq!(engine.start(req).unwrap(), StartOutcome::Started);
        engine.join(req.project_id);

        let instance = engine.instance(req.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Completed);
        assert_eq!(
            instance.step_log.iter().map(|r| r.step).collect::<Vec<_>>(),
            vec![
                StepKind::ProvisionResources,
                StepKind::ConfigurePermissions,
                StepKind::SendNotifications
            ]
        );
        assert_eq!(
            instance.resources().get("database"),
            Some(&format!("db_{}", req.project_id))
        );
        assert_eq!(instance.transitions.len(), 4);
    }

    #[test]
    fn finished_instances_release_their_slots() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let requests: Vec<_> = (0..20).map(|_| request()).collect();

        for req in &requests {
            engine.start(*req).unwrap();
        }
        for req in &requests {
            engine.join(req.project_id);
        }
        assert!(
            requests
                .iter()
                .all(|r| engine.status(r.project_id) == Ok(WorkflowState::Completed))
        );

        // Signals on finished or unknown instances leave nothing behind.
        let done = requests[0].project_id;
        assert_eq!(engine.cancel(done), Ok(WorkflowState::Completed));
        assert_eq!(engine.update_configuration(done, serde_json::json!({})), Ok(false));
        let missing = ProjectId::generate();
        assert_eq!(engine.cancel(missing), Err(WorkflowError::NotFound(missing)));

        assert_eq!(engine.inner.tracked_slots(), 0);
    }

    #[test]
    fn duplicate_start_is_ignored() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        assert_eq!(engine.start(req).unwrap(), StartOutcome::Started);
        assert_eq!(engine.start(req).unwrap(), StartOutcome::AlreadyExists);
        engine.join(req.project_id);

        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn exhausted_retries_fail_without_running_later_steps() {
        let provision = Scripted::new(StepKind::ProvisionResources, usize::MAX);
        let permissions = Scripted::new(StepKind::ConfigurePermissions, 0);
        let engine = engine_with(
            provision.clone(),
            permissions.clone(),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        engine.start(req).unwrap();
        engine.join(req.project_id);

        let instance = engine.instance(req.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Failed);
        assert_eq!(provision.calls(), 3);
        assert_eq!(permissions.calls(), 0);

        let result = instance.last_result(StepKind::ProvisionResources).unwrap();
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn transient_failure_recovers_within_budget() {
        let provision = Scripted::new(StepKind::ProvisionResources, 2);
        let engine = engine_with(
            provision.clone(),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        engine.start(req).unwrap();
        engine.join(req.project_id);

        assert_eq!(engine.status(req.project_id).unwrap(), WorkflowState::Completed);
        assert_eq!(
            engine
                .instance(req.project_id)
                .unwrap()
                .last_result(StepKind::ProvisionResources)
                .unwrap()
                .attempts,
            3
        );
    }

    #[test]
    fn notification_failure_is_best_effort_by_default() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Scripted::new(StepKind::SendNotifications, usize::MAX),
            NotificationMode::BestEffort,
        );
        let req = request();

        engine.start(req).unwrap();
        engine.join(req.project_id);

        let instance = engine.instance(req.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Completed);
        assert!(!instance.last_result(StepKind::SendNotifications).unwrap().success);
    }

    #[test]
    fn strict_notification_failure_fails_workflow() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Scripted::new(StepKind::SendNotifications, usize::MAX),
            NotificationMode::Strict,
        );
        let req = request();

        engine.start(req).unwrap();
        engine.join(req.project_id);

        assert_eq!(engine.status(req.project_id).unwrap(), WorkflowState::Failed);
    }

    #[test]
    fn retrigger_restarts_failed_instance_and_keeps_log() {
        let provision = Scripted::new(StepKind::ProvisionResources, 3);
        let engine = engine_with(
            provision.clone(),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        engine.start(req).unwrap();
        engine.join(req.project_id);
        assert_eq!(engine.status(req.project_id).unwrap(), WorkflowState::Failed);

        engine.retrigger(req.project_id).unwrap();
        engine.join(req.project_id);

        let instance = engine.instance(req.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Completed);
        assert_eq!(instance.generation, 1);
        let provisioning: Vec<_> = instance
            .step_log
            .iter()
            .filter(|r| r.step == StepKind::ProvisionResources)
            .map(|r| (r.generation, r.result.success))
            .collect();
        assert_eq!(provisioning, vec![(0, false), (1, true)]);
    }

    #[test]
    fn retrigger_only_from_failed() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();
        engine.start(req).unwrap();
        engine.join(req.project_id);

        let err = engine.retrigger(req.project_id).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                state: WorkflowState::Completed,
                ..
            }
        ));
        let missing = ProjectId::generate();
        assert_eq!(engine.retrigger(missing), Err(WorkflowError::NotFound(missing)));
    }

    #[test]
    fn cancel_mid_step_stops_workflow_and_records_step() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let permissions = Scripted::new(StepKind::ConfigurePermissions, 0);
        let engine = engine_with(
            Arc::new(Gated {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            permissions.clone(),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();

        engine.start(req).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Queries and signals do not wait on the busy runner.
        assert_eq!(engine.status(req.project_id).unwrap(), WorkflowState::Provisioning);
        assert!(
            engine
                .update_configuration(req.project_id, serde_json::json!({"region": "eu"}))
                .unwrap()
        );
        assert_eq!(engine.cancel(req.project_id).unwrap(), WorkflowState::Cancelled);

        release_tx.send(()).unwrap();
        engine.join(req.project_id);

        let instance = engine.instance(req.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Cancelled);
        assert_eq!(permissions.calls(), 0);
        assert_eq!(instance.step_log.len(), 1);
        assert!(instance.step_log[0].result.success);
        assert_eq!(instance.configuration_updates.len(), 1);
        assert_eq!(
            instance.configuration_updates[0].state,
            WorkflowState::Provisioning
        );
    }

    #[test]
    fn terminal_instances_ignore_configuration_and_cancel() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let req = request();
        engine.start(req).unwrap();
        engine.join(req.project_id);

        assert!(
            !engine
                .update_configuration(req.project_id, serde_json::json!({}))
                .unwrap()
        );
        assert_eq!(engine.cancel(req.project_id).unwrap(), WorkflowState::Completed);
        assert!(engine.instance(req.project_id).unwrap().configuration_updates.is_empty());
    }

    #[test]
    fn resume_continues_from_checkpoint() {
        let store = InMemoryWorkflowStore::arc();
        let provision = Scripted::new(StepKind::ProvisionResources, 0);
        let req = request();

        // Checkpoint left behind by a process that stopped after provisioning.
        let mut instance = WorkflowInstance::new(req);
        instance.transition(WorkflowState::Provisioning, None);
        instance.transition(WorkflowState::ConfiguringPermissions, None);
        store.create(&instance).unwrap();

        let engine = WorkflowEngine::new(
            store.clone(),
            WorkflowSteps::new(
                provision.clone(),
                Scripted::new(StepKind::ConfigurePermissions, 0),
                Arc::new(LogNotifier),
            ),
            fast_config(NotificationMode::BestEffort),
        );

        assert_eq!(engine.resume_incomplete().unwrap(), 1);
        engine.join(req.project_id);

        assert_eq!(engine.status(req.project_id).unwrap(), WorkflowState::Completed);
        assert_eq!(provision.calls(), 0);
        assert_eq!(engine.resume_incomplete().unwrap(), 0);
    }

    #[test]
    fn unknown_instance_is_not_found() {
        let engine = engine_with(
            Arc::new(ResourceProvisioner::new()),
            Scripted::new(StepKind::ConfigurePermissions, 0),
            Arc::new(LogNotifier),
            NotificationMode::BestEffort,
        );
        let id = ProjectId::generate();

        assert_eq!(engine.status(id), Err(WorkflowError::NotFound(id)));
        assert_eq!(engine.cancel(id), Err(WorkflowError::NotFound(id)));
        assert_eq!(
            engine.update_configuration(id, serde_json::json!({})),
            Err(WorkflowError::NotFound(id))
        );
    }
}
