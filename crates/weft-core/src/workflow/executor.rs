//! Thread executor.
//!
//! Owns the full lifecycle of a workflow thread: validate, register,
//! dispatch ready steps concurrently, checkpoint every state change,
//! publish events, and settle a terminal status. One spawned run loop per
//! thread is the single writer of that thread's registry state; callers
//! interact through `invoke`/`invoke_async` and the control operations.
//!
//! The loop is ready-set driven: after every step completion it recomputes
//! which steps can dispatch, so pause, fail-fast, and blocked propagation
//! all work mid-flight without a precomputed plan.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::checkpoint::Checkpoint;
use weft_types::error::StoreError;
use weft_types::event::ThreadEvent;
use weft_types::thread::{InvokeOutcome, StepResult, StepStatus, Thread, ThreadStatus};
use weft_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowInput};

use crate::event::ThreadEventHub;
use crate::registry::{RegistryError, ThreadRegistry};
use crate::repository::CheckpointStore;
use crate::runtime::{AgentRuntime, ProjectRegistry};

use super::parser::{self, ValidationError};
use super::session::SessionHandle;
use super::{resolver, scheduler};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("thread already exists: {0}")]
    ThreadExists(String),

    #[error("no checkpoints recorded for thread: {0}")]
    NoCheckpoints(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(Uuid),

    #[error("timed out waiting for thread {0}; execution continues in the background")]
    WaitTimeout(String),
}

/// Concurrency caps applied at dispatch time.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimits {
    /// Max in-flight steps per thread.
    pub per_thread: usize,
    /// Max in-flight steps across all threads.
    pub global: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            per_thread: 4,
            global: 16,
        }
    }
}

/// Result of one dispatched step task.
struct StepRun {
    step_id: String,
    outcome: StepOutcome,
}

enum StepOutcome {
    /// The runtime returned; its own status says completed or failed.
    Finished(crate::runtime::AgentOutcome),
    /// Resolution or execution errored before producing output.
    Failed(String),
    /// The session was cancelled; no result is recorded.
    Cancelled,
}

/// Executes workflow threads against a checkpoint store, agent runtime,
/// and project registry.
pub struct ThreadExecutor<S, R, P> {
    store: Arc<S>,
    registry: Arc<ThreadRegistry>,
    hub: Arc<ThreadEventHub>,
    runtime: Arc<R>,
    projects: Arc<P>,
    limits: ConcurrencyLimits,
    global_permits: Arc<Semaphore>,
    cancellations: Arc<DashMap<String, CancellationToken>>,
    watchers: Arc<DashMap<String, watch::Sender<ThreadStatus>>>,
}

impl<S, R, P> Clone for ThreadExecutor<S, R, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            hub: Arc::clone(&self.hub),
            runtime: Arc::clone(&self.runtime),
            projects: Arc::clone(&self.projects),
            limits: self.limits,
            global_permits: Arc::clone(&self.global_permits),
            cancellations: Arc::clone(&self.cancellations),
            watchers: Arc::clone(&self.watchers),
        }
    }
}

impl<S, R, P> ThreadExecutor<S, R, P>
where
    S: CheckpointStore + 'static,
    R: AgentRuntime + 'static,
    P: ProjectRegistry + 'static,
{
    pub fn new(
        store: Arc<S>,
        registry: Arc<ThreadRegistry>,
        hub: Arc<ThreadEventHub>,
        runtime: Arc<R>,
        projects: Arc<P>,
        limits: ConcurrencyLimits,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            runtime,
            projects,
            limits,
            global_permits: Arc::new(Semaphore::new(limits.global)),
            cancellations: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Run a workflow and wait for it to settle.
    ///
    /// Returns once the thread reaches a terminal status or pauses. A wait
    /// timeout aborts only the wait: the thread keeps executing and its
    /// state remains reachable through the registry and checkpoints.
    pub async fn invoke(
        &self,
        input: WorkflowInput,
        project_id: Option<String>,
        thread_id: Option<String>,
        wait_timeout: Option<Duration>,
    ) -> Result<InvokeOutcome, ExecutorError> {
        let (thread_id, total_steps) = self.start(input, project_id, thread_id)?;
        self.wait(&thread_id, total_steps, wait_timeout).await
    }

    /// Run a workflow in the background and return its thread id at once.
    pub fn invoke_async(
        &self,
        input: WorkflowInput,
        project_id: Option<String>,
        thread_id: Option<String>,
    ) -> Result<String, ExecutorError> {
        let (thread_id, _) = self.start(input, project_id, thread_id)?;
        Ok(thread_id)
    }

    fn start(
        &self,
        input: WorkflowInput,
        project_id: Option<String>,
        thread_id: Option<String>,
    ) -> Result<(String, usize), ExecutorError> {
        let def = parser::parse(input)?;
        let thread_id = thread_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        if self.registry.contains(&thread_id) {
            return Err(ExecutorError::ThreadExists(thread_id));
        }
        let total_steps = def.steps.len();
        self.registry
            .insert(Thread::new(thread_id.clone(), project_id))?;
        self.watch_sender(&thread_id);
        self.spawn_run(def, thread_id.clone(), 0);
        Ok((thread_id, total_steps))
    }

    /// Block until the thread settles (terminal or paused).
    pub async fn wait(
        &self,
        thread_id: &str,
        total_steps: usize,
        wait_timeout: Option<Duration>,
    ) -> Result<InvokeOutcome, ExecutorError> {
        let mut status_rx = self.watch_sender(thread_id).subscribe();
        let deadline = wait_timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            let status = *status_rx.borrow_and_update();
            if status.is_terminal() || status == ThreadStatus::Paused {
                let thread = self.registry.get(thread_id)?;
                return Ok(outcome_of(&thread, total_steps));
            }
            let changed = match deadline {
                Some(at) => tokio::time::timeout_at(at, status_rx.changed())
                    .await
                    .map_err(|_| ExecutorError::WaitTimeout(thread_id.to_string()))?,
                None => status_rx.changed().await,
            };
            if changed.is_err() {
                // Sender dropped: the thread was evicted between updates.
                let thread = self.registry.get(thread_id)?;
                return Ok(outcome_of(&thread, total_steps));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Control operations
    // -----------------------------------------------------------------------

    /// Pause a running thread. In-flight steps drain to completion; the run
    /// loop then settles the thread as paused without dispatching more.
    pub fn pause(
        &self,
        thread_id: &str,
        reason: Option<String>,
    ) -> Result<Thread, ExecutorError> {
        Ok(self.registry.pause(thread_id, reason)?)
    }

    /// Abort a thread. Cancels every live session; steps already completed
    /// keep their results, cancelled dispatches record nothing.
    pub async fn abort(&self, thread_id: &str) -> Result<(), ExecutorError> {
        let thread = self.registry.get(thread_id)?;
        if thread.status.is_terminal() {
            return Err(RegistryError::State(format!(
                "thread {thread_id} already finished"
            ))
            .into());
        }
        if let Some(token) = self.cancellations.get(thread_id).map(|t| t.clone()) {
            token.cancel();
            return Ok(());
        }
        // Paused thread with no live run loop: settle it directly.
        let updated = self
            .registry
            .update(thread_id, |t| t.status = ThreadStatus::Aborted)?;
        let seq = match self.store.load_latest(thread_id).await {
            Ok(Some(cp)) => cp.seq + 1,
            Ok(None) => 1,
            Err(err) => {
                tracing::error!(thread_id, %err, "failed to read latest checkpoint during abort");
                1
            }
        };
        self.append_checkpoint(&updated, seq).await;
        self.hub.publish(ThreadEvent::WorkflowComplete {
            thread_id: thread_id.to_string(),
            status: ThreadStatus::Aborted,
            timestamp: Utc::now(),
        });
        self.watch_sender(thread_id).send_replace(ThreadStatus::Aborted);
        Ok(())
    }

    /// Resume a thread from a checkpoint (the latest by default).
    ///
    /// State is rebuilt from the checkpoint: completed results are kept for
    /// template resolution, failed results are dropped so those steps run
    /// again, and blocked steps are cleared. Steps completed after an older
    /// rollback point are re-dispatched; their earlier side effects are not
    /// undone.
    pub async fn resume(
        &self,
        thread_id: &str,
        input: WorkflowInput,
        checkpoint_id: Option<Uuid>,
        project_id: Option<String>,
    ) -> Result<Thread, ExecutorError> {
        let def = parser::parse(input)?;
        if let Ok(existing) = self.registry.get(thread_id)
            && existing.status == ThreadStatus::Running
        {
            return Err(
                RegistryError::State(format!("thread {thread_id} is still running")).into(),
            );
        }
        let checkpoint = match checkpoint_id {
            Some(id) => self
                .store
                .load_at(thread_id, id)
                .await?
                .ok_or(ExecutorError::CheckpointNotFound(id))?,
            None => self
                .store
                .load_latest(thread_id)
                .await?
                .ok_or_else(|| ExecutorError::NoCheckpoints(thread_id.to_string()))?,
        };

        let mut thread = Thread::new(thread_id.to_string(), project_id);
        thread.status = ThreadStatus::Running;
        thread.session_ids = checkpoint.session_ids;
        thread.completed_steps = checkpoint.completed_steps;
        thread.results = checkpoint
            .results
            .into_iter()
            .filter(|(_, r)| r.status == StepStatus::Completed)
            .collect();
        self.registry.put(thread.clone());
        self.watch_sender(thread_id).send_replace(ThreadStatus::Running);
        self.spawn_run(def, thread_id.to_string(), checkpoint.seq);
        tracing::info!(thread_id, from_seq = checkpoint.seq, "thread resumed");
        Ok(thread)
    }

    /// Remove a finished thread from memory, along with its event topic and
    /// bookkeeping. Checkpoints remain the only record afterwards.
    pub fn evict(&self, thread_id: &str) -> Result<Thread, ExecutorError> {
        let thread = self.registry.evict(thread_id)?;
        self.hub.remove(thread_id);
        self.watchers.remove(thread_id);
        self.cancellations.remove(thread_id);
        Ok(thread)
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// The cancellation token is registered here, before the run loop is
    /// even scheduled, so an abort issued right after `invoke_async` always
    /// finds it and cannot race the loop's first status write.
    fn spawn_run(&self, def: WorkflowDefinition, thread_id: String, start_seq: u64) {
        let cancel = CancellationToken::new();
        self.cancellations.insert(thread_id.clone(), cancel.clone());
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run_thread(def, thread_id, start_seq, cancel).await;
        });
    }

    async fn run_thread(
        &self,
        def: WorkflowDefinition,
        thread_id: String,
        start_seq: u64,
        cancel: CancellationToken,
    ) {
        let status_tx = self.watch_sender(&thread_id);
        let mut seq = start_seq;
        let mut aborting = cancel.is_cancelled();

        if !aborting {
            let thread = match self.registry.update(&thread_id, |t| {
                t.status = ThreadStatus::Running;
                t.pause_reason = None;
                t.blocked_steps.clear();
            }) {
                Ok(thread) => thread,
                Err(err) => {
                    tracing::error!(thread_id, %err, "thread vanished before its run loop started");
                    self.cancellations.remove(&thread_id);
                    return;
                }
            };
            status_tx.send_replace(ThreadStatus::Running);
            seq += 1;
            self.append_checkpoint(&thread, seq).await;
        }

        let mut in_flight: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<StepRun> = JoinSet::new();

        loop {
            let thread = match self.registry.get(&thread_id) {
                Ok(thread) => thread,
                Err(err) => {
                    tracing::error!(thread_id, %err, "thread evicted mid-run, stopping");
                    self.cancellations.remove(&thread_id);
                    return;
                }
            };

            if !aborting && thread.status == ThreadStatus::Running {
                let completed: HashSet<String> =
                    thread.completed_steps.iter().cloned().collect();
                let blocked: HashSet<String> = thread.blocked_steps.iter().cloned().collect();
                let ready: Vec<StepDefinition> =
                    scheduler::ready_steps(&def, &completed, &in_flight, &blocked)
                        .into_iter()
                        .cloned()
                        .collect();
                for step in ready {
                    if tasks.len() >= self.limits.per_thread {
                        break;
                    }
                    self.dispatch_step(&thread_id, &step, &thread, &cancel, &mut tasks, &mut seq)
                        .await;
                    in_flight.insert(step.id);
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                () = cancel.cancelled(), if !aborting => {
                    aborting = true;
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok(run) => {
                            in_flight.remove(&run.step_id);
                            seq = self.settle_step(&thread_id, &def, run, seq).await;
                        }
                        Err(err) => {
                            tracing::error!(thread_id, %err, "step task panicked");
                        }
                    }
                }
            }
        }

        self.finish_thread(&def, &thread_id, seq, aborting, &status_tx)
            .await;
    }

    async fn dispatch_step(
        &self,
        thread_id: &str,
        step: &StepDefinition,
        thread: &Thread,
        cancel: &CancellationToken,
        tasks: &mut JoinSet<StepRun>,
        seq: &mut u64,
    ) {
        let task_text = resolver::resolve(&step.task, &thread.results);
        let session = SessionHandle::open(thread_id, &step.id, cancel);

        let updated = match self.registry.update(thread_id, |t| {
            t.session_ids
                .insert(step.id.clone(), session.session_id.clone());
        }) {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(thread_id, step_id = %step.id, %err, "failed to record session");
                return;
            }
        };
        *seq += 1;
        self.append_checkpoint(&updated, *seq).await;
        self.hub.publish(ThreadEvent::StepStart {
            thread_id: thread_id.to_string(),
            step_id: step.id.clone(),
            session_id: session.session_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            thread_id,
            step_id = %step.id,
            agent = %step.agent,
            session_id = %session.session_id,
            "step dispatched"
        );

        let runtime = Arc::clone(&self.runtime);
        let projects = Arc::clone(&self.projects);
        let permits = Arc::clone(&self.global_permits);
        let project_id = thread.project_id.clone();
        let agent = step.agent.clone();
        let step_id = step.id.clone();
        tasks.spawn(async move {
            // The global cap is enforced here rather than at dispatch, so a
            // queued step holds no permit while waiting.
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        return StepRun { step_id, outcome: StepOutcome::Cancelled };
                    }
                },
                () = session.cancelled() => {
                    return StepRun { step_id, outcome: StepOutcome::Cancelled };
                }
            };
            let identity = match projects.resolve(project_id.as_deref(), &agent).await {
                Ok(identity) => identity,
                Err(err) => {
                    return StepRun {
                        step_id,
                        outcome: StepOutcome::Failed(err.to_string()),
                    };
                }
            };
            let result = tokio::select! {
                result = runtime.run(&identity, &task_text, &session) => result,
                () = session.cancelled() => {
                    return StepRun { step_id, outcome: StepOutcome::Cancelled };
                }
            };
            let outcome = match result {
                Ok(agent_outcome) => StepOutcome::Finished(agent_outcome),
                Err(err) => StepOutcome::Failed(err.to_string()),
            };
            StepRun { step_id, outcome }
        });
    }

    async fn settle_step(
        &self,
        thread_id: &str,
        def: &WorkflowDefinition,
        run: StepRun,
        mut seq: u64,
    ) -> u64 {
        let step_id = run.step_id;
        let (output, succeeded) = match run.outcome {
            StepOutcome::Cancelled => {
                tracing::debug!(thread_id, step_id = %step_id, "step cancelled");
                return seq;
            }
            StepOutcome::Finished(outcome) => {
                let succeeded = outcome.status == StepStatus::Completed;
                (outcome.output, succeeded)
            }
            StepOutcome::Failed(message) => (message, false),
        };

        if succeeded {
            let updated = match self.registry.update(thread_id, |t| {
                t.results.insert(
                    step_id.clone(),
                    StepResult {
                        output: output.clone(),
                        status: StepStatus::Completed,
                    },
                );
                t.completed_steps.push(step_id.clone());
            }) {
                Ok(thread) => thread,
                Err(err) => {
                    tracing::error!(thread_id, step_id = %step_id, %err, "failed to record result");
                    return seq;
                }
            };
            seq += 1;
            self.append_checkpoint(&updated, seq).await;
            self.hub.publish(ThreadEvent::StepComplete {
                thread_id: thread_id.to_string(),
                step_id: step_id.clone(),
                status: StepStatus::Completed,
                timestamp: Utc::now(),
            });
            tracing::info!(thread_id, step_id = %step_id, "step completed");
            return seq;
        }

        // Fail fast: record the failure, stop dispatching, and mark every
        // transitive dependent as blocked. Unrelated in-flight steps drain.
        let dependents = scheduler::transitive_dependents(def, &step_id);
        let newly_blocked: Vec<String> = def
            .steps
            .iter()
            .filter(|s| dependents.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        let updated = match self.registry.update(thread_id, |t| {
            t.results.insert(
                step_id.clone(),
                StepResult {
                    output: output.clone(),
                    status: StepStatus::Failed,
                },
            );
            t.status = ThreadStatus::Failed;
            for blocked in &newly_blocked {
                if !t.blocked_steps.contains(blocked) {
                    t.blocked_steps.push(blocked.clone());
                }
            }
        }) {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(thread_id, step_id = %step_id, %err, "failed to record failure");
                return seq;
            }
        };
        seq += 1;
        self.append_checkpoint(&updated, seq).await;
        self.hub.publish(ThreadEvent::StepComplete {
            thread_id: thread_id.to_string(),
            step_id: step_id.clone(),
            status: StepStatus::Failed,
            timestamp: Utc::now(),
        });
        self.hub.publish(ThreadEvent::Error {
            thread_id: thread_id.to_string(),
            step_id: Some(step_id.clone()),
            message: output,
            timestamp: Utc::now(),
        });
        tracing::warn!(
            thread_id,
            step_id = %step_id,
            blocked = newly_blocked.len(),
            "step failed, blocking dependents"
        );
        seq
    }

    async fn finish_thread(
        &self,
        def: &WorkflowDefinition,
        thread_id: &str,
        mut seq: u64,
        aborting: bool,
        status_tx: &watch::Sender<ThreadStatus>,
    ) {
        let thread = match self.registry.get(thread_id) {
            Ok(thread) => thread,
            Err(_) => {
                self.cancellations.remove(thread_id);
                return;
            }
        };
        let final_status = if aborting {
            ThreadStatus::Aborted
        } else if thread.status == ThreadStatus::Paused {
            ThreadStatus::Paused
        } else if thread.status == ThreadStatus::Failed {
            ThreadStatus::Failed
        } else if def.steps.iter().all(|s| thread.is_step_done(&s.id)) {
            ThreadStatus::Completed
        } else {
            ThreadStatus::Failed
        };

        let updated = match self
            .registry
            .update(thread_id, |t| t.status = final_status)
        {
            Ok(thread) => thread,
            Err(_) => {
                self.cancellations.remove(thread_id);
                return;
            }
        };
        seq += 1;
        self.append_checkpoint(&updated, seq).await;
        self.cancellations.remove(thread_id);
        if final_status != ThreadStatus::Paused {
            self.hub.publish(ThreadEvent::WorkflowComplete {
                thread_id: thread_id.to_string(),
                status: final_status,
                timestamp: Utc::now(),
            });
        }
        status_tx.send_replace(final_status);
        tracing::info!(thread_id, status = ?final_status, "thread settled");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Append a checkpoint; a store failure degrades to in-memory-only state
    /// rather than stopping execution.
    async fn append_checkpoint(&self, thread: &Thread, seq: u64) {
        let checkpoint = Checkpoint::snapshot(thread, seq);
        if let Err(err) = self.store.save(&checkpoint).await {
            tracing::error!(
                thread_id = %thread.thread_id,
                seq,
                %err,
                "checkpoint save failed, continuing with in-memory state only"
            );
            self.hub.publish(ThreadEvent::Error {
                thread_id: thread.thread_id.clone(),
                step_id: None,
                message: format!("checkpoint save failed: {err}"),
                timestamp: Utc::now(),
            });
        }
    }

    fn watch_sender(&self, thread_id: &str) -> watch::Sender<ThreadStatus> {
        self.watchers
            .entry(thread_id.to_string())
            .or_insert_with(|| watch::channel(ThreadStatus::Pending).0)
            .clone()
    }
}

fn outcome_of(thread: &Thread, total_steps: usize) -> InvokeOutcome {
    InvokeOutcome {
        thread_id: thread.thread_id.clone(),
        session_ids: thread.session_ids.clone(),
        results: thread.results.clone(),
        status: thread.status,
        summary: thread.summary(total_steps),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use weft_types::workflow::RawStep;

    use crate::runtime::{AgentOutcome, RuntimeError};

    // -- fixtures ----------------------------------------------------------

    #[derive(Default)]
    struct MemStore {
        checkpoints: Mutex<Vec<Checkpoint>>,
        fail_saves: AtomicBool,
    }

    impl CheckpointStore for MemStore {
        async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Query("disk full".to_string()));
            }
            self.checkpoints.lock().unwrap().push(checkpoint.clone());
            Ok(())
        }

        async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
            Ok(self
                .checkpoints
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.thread_id == thread_id)
                .max_by_key(|c| c.seq)
                .cloned())
        }

        async fn load_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
            let mut history: Vec<Checkpoint> = self
                .checkpoints
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.thread_id == thread_id)
                .cloned()
                .collect();
            history.sort_by_key(|c| c.seq);
            Ok(history)
        }

        async fn load_at(
            &self,
            thread_id: &str,
            checkpoint_id: Uuid,
        ) -> Result<Option<Checkpoint>, StoreError> {
            Ok(self
                .checkpoints
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.thread_id == thread_id && c.checkpoint_id == checkpoint_id)
                .cloned())
        }
    }

    #[derive(Clone, Debug)]
    struct RecordedRun {
        agent: String,
        task: String,
        step_id: String,
        session_id: String,
    }

    #[derive(Default)]
    struct MockRuntime {
        runs: Mutex<Vec<RecordedRun>>,
        delays: HashMap<String, Duration>,
        failing: HashSet<String>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl MockRuntime {
        fn recorded(&self) -> Vec<RecordedRun> {
            self.runs.lock().unwrap().clone()
        }

        fn runs_of(&self, step_id: &str) -> Vec<RecordedRun> {
            self.recorded()
                .into_iter()
                .filter(|r| r.step_id == step_id)
                .collect()
        }
    }

    impl AgentRuntime for MockRuntime {
        async fn run(
            &self,
            agent: &str,
            task: &str,
            session: &SessionHandle,
        ) -> Result<AgentOutcome, RuntimeError> {
            self.runs.lock().unwrap().push(RecordedRun {
                agent: agent.to_string(),
                task: task.to_string(),
                step_id: session.step_id.clone(),
                session_id: session.session_id.clone(),
            });
            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(agent) {
                tokio::time::sleep(*delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(agent) {
                return Err(RuntimeError::Execution(format!("agent {agent} blew up")));
            }
            Ok(AgentOutcome::completed(format!("{agent}:{task}")))
        }
    }

    struct MockProjects;

    impl ProjectRegistry for MockProjects {
        async fn resolve(
            &self,
            project_id: Option<&str>,
            agent_ref: &str,
        ) -> Result<String, RuntimeError> {
            if agent_ref == "ghost" {
                return Err(RuntimeError::UnknownAgent(agent_ref.to_string()));
            }
            Ok(match project_id {
                Some(project) => format!("{project}/{agent_ref}"),
                None => agent_ref.to_string(),
            })
        }
    }

    struct Harness {
        executor: ThreadExecutor<MemStore, MockRuntime, MockProjects>,
        store: Arc<MemStore>,
        registry: Arc<ThreadRegistry>,
        hub: Arc<ThreadEventHub>,
        runtime: Arc<MockRuntime>,
    }

    fn harness(runtime: MockRuntime) -> Harness {
        harness_with_limits(runtime, ConcurrencyLimits::default())
    }

    fn harness_with_limits(runtime: MockRuntime, limits: ConcurrencyLimits) -> Harness {
        let store = Arc::new(MemStore::default());
        let registry = Arc::new(ThreadRegistry::new());
        let hub = Arc::new(ThreadEventHub::new());
        let runtime = Arc::new(runtime);
        let executor = ThreadExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&hub),
            Arc::clone(&runtime),
            Arc::new(MockProjects),
            limits,
        );
        Harness {
            executor,
            store,
            registry,
            hub,
            runtime,
        }
    }

    fn step(id: Option<&str>, agent: &str, task: &str, deps: &[&str]) -> RawStep {
        RawStep {
            id: id.map(|s| s.to_string()),
            agent: agent.to_string(),
            task: task.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    async fn settled(registry: &ThreadRegistry, thread_id: &str) -> Thread {
        for _ in 0..600 {
            if let Ok(thread) = registry.get(thread_id)
                && (thread.status.is_terminal() || thread.status == ThreadStatus::Paused)
            {
                return thread;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("thread {thread_id} never settled");
    }

    // -- invocation --------------------------------------------------------

    #[tokio::test]
    async fn single_step_invoke_completes() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Single(step(None, "calc", "2+2", &[])),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        assert_eq!(outcome.results["step1"].output, "calc:2+2");
        assert_eq!(outcome.results["step1"].status, StepStatus::Completed);
        assert!(outcome.session_ids.contains_key("step1"));
        assert_eq!(outcome.summary.total, 1);
        assert_eq!(outcome.summary.completed, 1);
    }

    #[tokio::test]
    async fn templates_resolve_against_upstream_results() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "calc", "2+2", &[]),
                    step(Some("b"), "calc", "got {a.output} ({a.status})", &["a"]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        let b_runs = h.runtime.runs_of("b");
        assert_eq!(b_runs.len(), 1);
        assert_eq!(b_runs[0].task, "got calc:2+2 (completed)");
    }

    #[tokio::test]
    async fn unlabelled_steps_run_sequentially() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(None, "calc", "one", &[]),
                    step(None, "calc", "two", &[]),
                    step(None, "calc", "three", &[]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        let order: Vec<String> = h.runtime.recorded().into_iter().map(|r| r.step_id).collect();
        assert_eq!(order, vec!["step1", "step2", "step3"]);
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_before_anything_runs() {
        let h = harness(MockRuntime::default());
        let err = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![step(Some("a"), "calc", "one", &["ghost"])]),
                None,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));
        assert!(h.runtime.recorded().is_empty());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_thread_id_is_rejected_until_evicted() {
        let h = harness(MockRuntime::default());
        let input = || WorkflowInput::Single(step(None, "calc", "2+2", &[]));
        h.executor
            .invoke(input(), None, Some("dup".to_string()), None)
            .await
            .unwrap();

        let err = h
            .executor
            .invoke_async(input(), None, Some("dup".to_string()))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ThreadExists(_)));

        h.executor.evict("dup").unwrap();
        h.executor
            .invoke(input(), None, Some("dup".to_string()), None)
            .await
            .unwrap();
    }

    // -- failure handling --------------------------------------------------

    #[tokio::test]
    async fn failure_blocks_dependents_and_fails_the_thread() {
        let h = harness(MockRuntime {
            failing: ["boom".to_string()].into(),
            delays: [("slow".to_string(), Duration::from_millis(50))].into(),
            ..Default::default()
        });
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "boom", "explode", &[]),
                    step(Some("b"), "calc", "never", &["a"]),
                    step(Some("c"), "slow", "independent", &[]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Failed);
        assert_eq!(outcome.results["a"].status, StepStatus::Failed);
        // The unrelated in-flight step drained and kept its result.
        assert_eq!(outcome.results["c"].status, StepStatus::Completed);
        assert!(!outcome.results.contains_key("b"));
        assert!(h.runtime.runs_of("b").is_empty());

        let thread = h.registry.get(&outcome.thread_id).unwrap();
        assert_eq!(thread.blocked_steps, vec!["b"]);
        assert_eq!(outcome.summary.blocked, 1);
    }

    #[tokio::test]
    async fn unknown_agent_fails_the_step() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Single(step(None, "ghost", "anything", &[])),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Failed);
        assert_eq!(outcome.results["step1"].status, StepStatus::Failed);
        assert!(outcome.results["step1"].output.contains("unknown agent"));
        assert!(h.runtime.recorded().is_empty());
    }

    #[tokio::test]
    async fn store_failure_degrades_without_stopping_execution() {
        let h = harness(MockRuntime::default());
        h.store.fail_saves.store(true, Ordering::SeqCst);

        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Single(step(None, "calc", "2+2", &[])),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        assert!(h.store.checkpoints.lock().unwrap().is_empty());
    }

    // -- control operations ------------------------------------------------

    #[tokio::test]
    async fn abort_cancels_in_flight_and_pending_steps() {
        let h = harness(MockRuntime {
            delays: [("slow".to_string(), Duration::from_millis(500))].into(),
            ..Default::default()
        });
        let thread_id = h
            .executor
            .invoke_async(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "slow", "first", &[]),
                    step(Some("b"), "calc", "second", &["a"]),
                ]),
                None,
                None,
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.executor.abort(&thread_id).await.unwrap();

        let thread = settled(&h.registry, &thread_id).await;
        assert_eq!(thread.status, ThreadStatus::Aborted);
        // The cancelled dispatch recorded no result and b never ran.
        assert!(thread.results.is_empty());
        assert!(h.runtime.runs_of("b").is_empty());
    }

    #[tokio::test]
    async fn abort_before_run_loop_starts_still_aborts() {
        let h = harness(MockRuntime::default());
        let thread_id = h
            .executor
            .invoke_async(
                WorkflowInput::Single(step(Some("a"), "calc", "2+2", &[])),
                None,
                None,
            )
            .unwrap();
        // No yield between these two calls: the run loop has not started yet.
        h.executor.abort(&thread_id).await.unwrap();

        let thread = settled(&h.registry, &thread_id).await;
        assert_eq!(thread.status, ThreadStatus::Aborted);
        assert!(thread.results.is_empty());
        assert!(h.runtime.recorded().is_empty());
        let latest = h.store.load_latest(&thread_id).await.unwrap().unwrap();
        assert_eq!(latest.status, ThreadStatus::Aborted);
    }

    #[tokio::test]
    async fn abort_of_finished_thread_is_a_state_error() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Single(step(None, "calc", "2+2", &[])),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        let err = h.executor.abort(&outcome.thread_id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Registry(RegistryError::State(_))
        ));
    }

    #[tokio::test]
    async fn pause_drains_in_flight_then_resume_completes() {
        let h = harness(MockRuntime {
            delays: [("slow".to_string(), Duration::from_millis(100))].into(),
            ..Default::default()
        });
        let input = || {
            WorkflowInput::Steps(vec![
                step(Some("a"), "slow", "first", &[]),
                step(Some("b"), "calc", "use {a.output}", &["a"]),
            ])
        };
        let thread_id = h.executor.invoke_async(input(), None, None).unwrap();

        // Pause while a is in flight.
        let mut paused = false;
        for _ in 0..40 {
            if h.executor.pause(&thread_id, Some("hold".to_string())).is_ok() {
                paused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(paused, "never saw the thread running");

        // Pause is visible immediately; the in-flight step drains after.
        // Wait for the drained result before inspecting it.
        let mut thread = settled(&h.registry, &thread_id).await;
        for _ in 0..200 {
            if thread.results.contains_key("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            thread = h.registry.get(&thread_id).unwrap();
        }
        assert_eq!(thread.status, ThreadStatus::Paused);
        assert_eq!(thread.pause_reason.as_deref(), Some("hold"));
        // The in-flight step drained and recorded its result; b never started.
        assert_eq!(thread.results["a"].status, StepStatus::Completed);
        assert!(h.runtime.runs_of("b").is_empty());

        h.executor
            .resume(&thread_id, input(), None, None)
            .await
            .unwrap();
        let thread = settled(&h.registry, &thread_id).await;
        assert_eq!(thread.status, ThreadStatus::Completed);
        let b_runs = h.runtime.runs_of("b");
        assert_eq!(b_runs.len(), 1);
        assert_eq!(b_runs[0].task, "use slow:first");
        // a was not re-run after the pause.
        assert_eq!(h.runtime.runs_of("a").len(), 1);
    }

    #[tokio::test]
    async fn resume_from_older_checkpoint_re_runs_later_steps() {
        let h = harness(MockRuntime::default());
        let input = || {
            WorkflowInput::Steps(vec![
                step(Some("a"), "calc", "2+2", &[]),
                step(Some("b"), "calc", "use {a.output}", &["a"]),
            ])
        };
        let outcome = h.executor.invoke(input(), None, None, None).await.unwrap();
        assert_eq!(outcome.status, ThreadStatus::Completed);

        let history = h.store.load_history(&outcome.thread_id).await.unwrap();
        let rollback = history
            .iter()
            .find(|c| c.completed_steps == vec!["a"])
            .expect("no checkpoint with only a completed");

        h.executor
            .resume(
                &outcome.thread_id,
                input(),
                Some(rollback.checkpoint_id),
                None,
            )
            .await
            .unwrap();
        let thread = settled(&h.registry, &outcome.thread_id).await;
        assert_eq!(thread.status, ThreadStatus::Completed);

        let b_runs = h.runtime.runs_of("b");
        assert_eq!(b_runs.len(), 2);
        // A re-run is a fresh dispatch with a fresh session.
        assert_ne!(b_runs[0].session_id, b_runs[1].session_id);
        assert_eq!(h.runtime.runs_of("a").len(), 1);
    }

    #[tokio::test]
    async fn resume_after_failure_retries_the_failed_step() {
        let h = harness(MockRuntime {
            failing: ["flaky".to_string()].into(),
            ..Default::default()
        });
        let input = || WorkflowInput::Single(step(Some("a"), "flaky", "try", &[]));
        let outcome = h.executor.invoke(input(), None, None, None).await.unwrap();
        assert_eq!(outcome.status, ThreadStatus::Failed);

        h.executor
            .resume(&outcome.thread_id, input(), None, None)
            .await
            .unwrap();
        let thread = settled(&h.registry, &outcome.thread_id).await;
        // Still failing, but the step genuinely ran again.
        assert_eq!(thread.status, ThreadStatus::Failed);
        assert_eq!(h.runtime.runs_of("a").len(), 2);
    }

    #[tokio::test]
    async fn resume_without_checkpoints_is_an_error() {
        let h = harness(MockRuntime::default());
        let err = h
            .executor
            .resume(
                "never-ran",
                WorkflowInput::Single(step(None, "calc", "2+2", &[])),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NoCheckpoints(_)));
    }

    // -- waiting and limits ------------------------------------------------

    #[tokio::test]
    async fn wait_timeout_aborts_only_the_wait() {
        let h = harness(MockRuntime {
            delays: [("slow".to_string(), Duration::from_millis(150))].into(),
            ..Default::default()
        });
        let err = h
            .executor
            .invoke(
                WorkflowInput::Single(step(None, "slow", "long task", &[])),
                None,
                Some("t-timeout".to_string()),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::WaitTimeout(_)));

        // Execution kept going in the background.
        let thread = settled(&h.registry, "t-timeout").await;
        assert_eq!(thread.status, ThreadStatus::Completed);
        assert_eq!(thread.results["step1"].output, "slow:long task");
    }

    #[tokio::test]
    async fn independent_steps_overlap_in_flight() {
        let h = harness(MockRuntime {
            delays: [("slow".to_string(), Duration::from_millis(50))].into(),
            ..Default::default()
        });
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "slow", "one", &[]),
                    step(Some("b"), "slow", "two", &[]),
                    step(Some("c"), "slow", "three", &[]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        assert_eq!(outcome.summary.completed, 3);
        // All three were in the runtime at once, not queued behind each other.
        assert_eq!(h.runtime.max_active.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn threads_sharing_an_agent_stay_isolated() {
        let h = harness(MockRuntime {
            failing: ["boom".to_string()].into(),
            ..Default::default()
        });
        let ok = h.executor.invoke(
            WorkflowInput::Single(step(Some("a"), "calc", "fine", &[])),
            None,
            Some("t-ok".to_string()),
            None,
        );
        let bad = h.executor.invoke(
            WorkflowInput::Single(step(Some("a"), "boom", "explode", &[])),
            None,
            Some("t-bad".to_string()),
            None,
        );
        let (ok, bad) = tokio::join!(ok, bad);
        let ok = ok.unwrap();
        let bad = bad.unwrap();

        // One thread failing leaves the other's outcome untouched.
        assert_eq!(ok.status, ThreadStatus::Completed);
        assert_eq!(ok.results["a"].output, "calc:fine");
        assert_eq!(bad.status, ThreadStatus::Failed);
        assert_eq!(bad.results["a"].status, StepStatus::Failed);
        // Same step id on both threads, but each dispatch got its own session.
        assert_ne!(ok.session_ids["a"], bad.session_ids["a"]);
    }

    #[tokio::test]
    async fn per_thread_limit_caps_concurrency() {
        let h = harness_with_limits(
            MockRuntime {
                delays: [("slow".to_string(), Duration::from_millis(30))].into(),
                ..Default::default()
            },
            ConcurrencyLimits {
                per_thread: 1,
                global: 16,
            },
        );
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "slow", "one", &[]),
                    step(Some("b"), "slow", "two", &[]),
                    step(Some("c"), "slow", "three", &[]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ThreadStatus::Completed);
        assert_eq!(h.runtime.max_active.load(Ordering::SeqCst), 1);
        // Definition order is the tie-break when the cap bites.
        let order: Vec<String> = h.runtime.recorded().into_iter().map(|r| r.step_id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    // -- checkpoints and events --------------------------------------------

    #[tokio::test]
    async fn checkpoint_sequence_is_append_only_and_monotonic() {
        let h = harness(MockRuntime::default());
        let outcome = h
            .executor
            .invoke(
                WorkflowInput::Steps(vec![
                    step(Some("a"), "calc", "one", &[]),
                    step(Some("b"), "calc", "two", &["a"]),
                ]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let history = h.store.load_history(&outcome.thread_id).await.unwrap();
        assert!(!history.is_empty());
        for (index, checkpoint) in history.iter().enumerate() {
            assert_eq!(checkpoint.seq, index as u64 + 1);
        }
        let last = history.last().unwrap();
        assert_eq!(last.status, ThreadStatus::Completed);
        assert_eq!(last.completed_steps, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn events_trace_the_run_in_order() {
        let h = harness(MockRuntime::default());
        // Subscribe before the run so nothing is missed.
        let mut sub = h.hub.subscribe(&Thread::new("evt".to_string(), None));
        h.executor
            .invoke(
                WorkflowInput::Single(step(None, "calc", "2+2", &[])),
                None,
                Some("evt".to_string()),
                None,
            )
            .await
            .unwrap();

        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::Recovery { .. }
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::StepStart { step_id, .. } if step_id == "step1"
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::StepComplete { status: StepStatus::Completed, .. }
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::WorkflowComplete { status: ThreadStatus::Completed, .. }
        ));
    }
}
