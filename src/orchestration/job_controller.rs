//! # Orchestration Job Controller
//!
//! Top-level owner of jobs and their steps. Each started job gets a driver task
//! that plans the job, reserves its budget, and then runs a dispatch loop:
//! step attempts run on a `JoinSet`, their outcomes are folded back into the
//! job record, and the job ends once every step is terminal or an abort
//! condition (stop action, failure threshold, cancellation, timeout) fires.
//!
//! Job and step records are mutated only here, always through the pure
//! transition tables in [`crate::state_machine`].

use super::conditions;
use super::context::ServiceContext;
use super::directives::{ControllerDirective, DirectiveEnvelope};
use super::planner::{build_plan, step_specs_for, ExecutionPlan, PlanOutcome};
use super::step_executor::{AttemptInput, AttemptOutcome, StepExecutor};
use super::strategy::{strategy_for, ReadyStep, SchedulingContext};
use crate::constants::events;
use crate::error::{Result, ScanflowError, StepExecutionError};
use crate::logging::{log_error, log_job_operation, log_step_operation};
use crate::models::{
    AppliedChange, FailureAction, JobSpec, OrchestrationJob, OrchestrationStrategy,
    ResourceAllocation, RollbackAction, WorkflowStep,
};
use crate::resources::AllocationRequest;
use crate::services::{Notification, NotificationKind};
use crate::state_machine::{JobEvent, JobState, JobStateMachine, StepEvent, StepState, StepStateMachine};
use crate::validation::{validate_concurrency, validate_job_spec};
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type PublishedEvents = Vec<(&'static str, Value)>;

/// Mutable state of one job, guarded by the handle's mutex
#[derive(Debug)]
struct JobRuntime {
    job: OrchestrationJob,
    steps: Vec<WorkflowStep>,
    index: HashMap<String, usize>,
    plan: ExecutionPlan,
    start_order: Vec<String>,
    retry_at: HashMap<String, Instant>,
    /// Step id to target of every in-flight attempt
    running: HashMap<String, Option<String>>,
}

impl JobRuntime {
    fn new(job: OrchestrationJob, steps: Vec<WorkflowStep>) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let mut runtime = Self {
            job,
            steps,
            index,
            plan: ExecutionPlan::default(),
            start_order: Vec::new(),
            retry_at: HashMap::new(),
            running: HashMap::new(),
        };
        runtime.refresh_counters();
        runtime
    }

    fn statuses(&self) -> HashMap<String, StepState> {
        self.steps.iter().map(|s| (s.id.clone(), s.status)).collect()
    }

    fn all_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    fn refresh_counters(&mut self) {
        let results = &mut self.job.results;
        results.total_steps = self.steps.len();
        results.completed_steps = self.steps.iter().filter(|s| s.status == StepState::Completed).count();
        results.failed_steps = self.steps.iter().filter(|s| s.status == StepState::Failed).count();
        results.skipped_steps = self.steps.iter().filter(|s| s.status == StepState::Skipped).count();
        self.job.refresh_progress();
    }

    /// Skip every non-terminal step, returning the skipped ids
    fn skip_remaining(&mut self, reason: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        for step in self.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
            if apply_step_event(step, StepEvent::skip_because(reason)).is_ok() {
                skipped.push(step.id.clone());
            }
        }
        self.retry_at.clear();
        skipped
    }

    /// Skip every step that transitively requires `step_id`
    fn cascade_skip(&mut self, step_id: &str, published: &mut PublishedEvents) {
        let reason = format!("dependency {step_id} did not complete");
        for dependent in self.plan.transitive_dependents(step_id) {
            let Some(&idx) = self.index.get(&dependent) else {
                continue;
            };
            let step = &mut self.steps[idx];
            if step.status.is_terminal() {
                continue;
            }
            if apply_step_event(step, StepEvent::skip_because(reason.clone())).is_ok() {
                self.retry_at.remove(&dependent);
                published.push((
                    events::STEP_SKIPPED,
                    json!({ "job_id": self.job.id, "step_id": dependent, "reason": reason }),
                ));
            }
        }
    }

    fn snapshot(&self) -> (OrchestrationJob, Vec<WorkflowStep>) {
        (self.job.clone(), self.steps.clone())
    }
}

fn apply_step_event(step: &mut WorkflowStep, event: StepEvent) -> Result<StepState> {
    let target = StepStateMachine::determine_target_state(step.status, &event)?;
    step.status = target;
    match event {
        StepEvent::Start if step.started_at.is_none() => step.started_at = Some(Utc::now()),
        StepEvent::Skip(reason) => step.skip_reason = Some(reason),
        StepEvent::Fail(message) | StepEvent::RetryAfterFailure(message) => {
            step.last_error = Some(message)
        }
        _ => {}
    }
    if target.is_terminal() {
        step.completed_at = Some(Utc::now());
    }
    Ok(target)
}

fn apply_job_event(job: &mut OrchestrationJob, event: &JobEvent) -> Result<JobState> {
    let target = JobStateMachine::determine_target_state(job.status, event)?;
    job.status = target;
    if target == JobState::Executing && job.started_at.is_none() {
        job.started_at = Some(Utc::now());
    }
    if target.is_terminal() {
        job.completed_at = Some(Utc::now());
        job.current_step = None;
    }
    Ok(target)
}

fn terminal_event_name(state: JobState) -> &'static str {
    match state {
        JobState::Completed => events::JOB_COMPLETED,
        JobState::Cancelled => events::JOB_CANCELLED,
        JobState::Timeout => events::JOB_TIMED_OUT,
        _ => events::JOB_FAILED,
    }
}

/// Waits on the handle itself so a job retired meanwhile is still reported
async fn wait_until_terminal(handle: &JobHandle, timeout: Option<Duration>) -> Result<OrchestrationJob> {
    let job_id = handle.job_id;
    let mut status = handle.status.subscribe();
    let wait = async move {
        status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|_| ())
            .map_err(|_| ScanflowError::Shutdown(format!("status of job {job_id} closed")))
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            ScanflowError::Timeout(format!(
                "job {job_id} not finished within {}ms",
                limit.as_millis()
            ))
        })??,
        None => wait.await?,
    }
    let job = handle.runtime.lock().job.clone();
    Ok(job)
}

struct JobHandle {
    job_id: Uuid,
    runtime: Mutex<JobRuntime>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    status: watch::Sender<JobState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// A step attempt ready to be spawned
struct Launch {
    step: WorkflowStep,
    input: AttemptInput,
}

struct ControllerInner {
    ctx: ServiceContext,
    executor: StepExecutor,
    jobs: DashMap<Uuid, Arc<JobHandle>>,
    /// Terminal job ids, oldest first; evicted from `jobs` past the retention limit
    finished: Mutex<VecDeque<Uuid>>,
    default_max_concurrent: RwLock<usize>,
    /// Replaces `adaptive` for jobs created after a global strategy switch
    strategy_override: RwLock<Option<OrchestrationStrategy>>,
}

/// Accepts job specs, drives their execution and applies runtime directives
#[derive(Clone)]
pub struct JobController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("jobs", &self.inner.jobs.len())
            .field("default_max_concurrent", &*self.inner.default_max_concurrent.read())
            .finish()
    }
}

impl JobController {
    pub fn new(ctx: ServiceContext) -> Self {
        let default_max_concurrent = ctx.config.orchestration.default_max_concurrent_scans;
        Self {
            inner: Arc::new(ControllerInner {
                executor: StepExecutor::new(ctx.clone()),
                ctx,
                jobs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                default_max_concurrent: RwLock::new(default_max_concurrent),
                strategy_override: RwLock::new(None),
            }),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.inner.ctx
    }

    /// Validate the job spec and register a `pending` job
    #[instrument(skip(self, spec), fields(job_name = %spec.name))]
    pub async fn create_job(&self, spec: JobSpec) -> Result<Uuid> {
        let config = &self.inner.ctx.config;
        validate_job_spec(&spec, &config.orchestration)?;

        let max_concurrent = spec
            .max_concurrent_scans
            .unwrap_or_else(|| *self.inner.default_max_concurrent.read());
        let timeout = spec
            .timeout_seconds
            .unwrap_or(config.orchestration.default_timeout_seconds);
        let threshold = spec
            .failure_threshold
            .unwrap_or(config.orchestration.default_failure_threshold);

        let mut job = OrchestrationJob::from_spec(&spec, max_concurrent, timeout, threshold);
        if job.strategy == OrchestrationStrategy::Adaptive {
            if let Some(strategy) = *self.inner.strategy_override.read() {
                job.strategy = strategy;
            }
        }

        let steps: Vec<WorkflowStep> = step_specs_for(&spec)
            .iter()
            .map(|s| {
                WorkflowStep::from_spec(
                    job.id,
                    s,
                    config.execution.default_max_retries,
                    config.execution.default_retry_delay_seconds,
                )
            })
            .collect();

        let job_id = job.id;
        let (paused, _) = watch::channel(false);
        let (status, _) = watch::channel(JobState::Pending);
        let handle = Arc::new(JobHandle {
            job_id,
            runtime: Mutex::new(JobRuntime::new(job, steps)),
            cancel: CancellationToken::new(),
            paused,
            status,
            driver: Mutex::new(None),
        });
        self.inner.jobs.insert(job_id, Arc::clone(&handle));

        self.inner.persist(&handle).await;
        log_job_operation("create", Some(job_id), Some(&spec.name), "pending", None);
        self.inner.ctx.publisher.publish(
            events::JOB_CREATED,
            json!({ "job_id": job_id, "name": spec.name, "strategy": spec.strategy }),
        );
        Ok(job_id)
    }

    /// `pending → planning`; spawns the job driver
    pub async fn start_job(&self, job_id: Uuid) -> Result<()> {
        let handle = self.inner.handle(job_id)?;
        let name = {
            let mut rt = handle.runtime.lock();
            if rt.job.status != JobState::Pending {
                return Err(ScanflowError::StateTransition(format!(
                    "job {job_id} cannot start from {}",
                    rt.job.status
                )));
            }
            apply_job_event(&mut rt.job, &JobEvent::Plan)?;
            rt.job.name.clone()
        };
        handle.status.send_replace(JobState::Planning);
        log_job_operation("start", Some(job_id), Some(&name), "planning", None);
        self.inner
            .ctx
            .publisher
            .publish(events::JOB_PLANNING, json!({ "job_id": job_id }));

        let driver = tokio::spawn(Arc::clone(&self.inner).drive(Arc::clone(&handle)));
        *handle.driver.lock() = Some(driver);
        Ok(())
    }

    pub async fn submit_job(&self, spec: JobSpec) -> Result<Uuid> {
        let job_id = self.create_job(spec).await?;
        self.start_job(job_id).await?;
        Ok(job_id)
    }

    /// Stop dispatching new steps; in-flight attempts finish normally
    pub fn pause_job(&self, job_id: Uuid) -> Result<()> {
        let handle = self.inner.handle(job_id)?;
        {
            let mut rt = handle.runtime.lock();
            if rt.job.status == JobState::Paused {
                return Ok(());
            }
            apply_job_event(&mut rt.job, &JobEvent::Pause)?;
        }
        handle.paused.send_replace(true);
        handle.status.send_replace(JobState::Paused);
        log_job_operation("pause", Some(job_id), None, "paused", None);
        self.inner
            .ctx
            .publisher
            .publish(events::JOB_PAUSED, json!({ "job_id": job_id }));
        Ok(())
    }

    pub fn resume_job(&self, job_id: Uuid) -> Result<()> {
        let handle = self.inner.handle(job_id)?;
        let state = {
            let mut rt = handle.runtime.lock();
            apply_job_event(&mut rt.job, &JobEvent::Resume)?
        };
        handle.paused.send_replace(false);
        handle.status.send_replace(state);
        log_job_operation("resume", Some(job_id), None, "executing", None);
        self.inner
            .ctx
            .publisher
            .publish(events::JOB_RESUMED, json!({ "job_id": job_id }));
        Ok(())
    }

    /// Cancel the job, stop its steps and release every allocation it holds
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<OrchestrationJob> {
        let handle = self.inner.handle(job_id)?;
        let pending_cancel = {
            let mut rt = handle.runtime.lock();
            if !JobStateMachine::can_transition(rt.job.status, &JobEvent::Cancel) {
                return Err(ScanflowError::StateTransition(format!(
                    "job {job_id} is already {}",
                    rt.job.status
                )));
            }
            if rt.job.status == JobState::Pending {
                rt.skip_remaining("job cancelled");
                apply_job_event(&mut rt.job, &JobEvent::Cancel)?;
                rt.refresh_counters();
                true
            } else {
                false
            }
        };

        if pending_cancel {
            handle.cancel.cancel();
            handle.status.send_replace(JobState::Cancelled);
            self.inner.ctx.allocator.release_all_for_job(job_id);
            self.inner.persist(&handle).await;
            log_job_operation("cancel", Some(job_id), None, "cancelled", None);
            self.inner
                .ctx
                .publisher
                .publish(events::JOB_CANCELLED, json!({ "job_id": job_id }));
            let job = handle.runtime.lock().job.clone();
            self.inner.retire(&handle);
            return Ok(job);
        }

        handle.cancel.cancel();
        wait_until_terminal(&handle, None).await
    }

    /// Current job record; repeated calls without mutation return identical snapshots
    pub fn get_job_status(&self, job_id: Uuid) -> Result<OrchestrationJob> {
        Ok(self.inner.handle(job_id)?.runtime.lock().job.clone())
    }

    pub fn get_steps(&self, job_id: Uuid) -> Result<Vec<WorkflowStep>> {
        Ok(self.inner.handle(job_id)?.runtime.lock().steps.clone())
    }

    /// Step ids in the order their first attempt started
    pub fn step_start_order(&self, job_id: Uuid) -> Result<Vec<String>> {
        Ok(self.inner.handle(job_id)?.runtime.lock().start_order.clone())
    }

    /// Wait until the job is terminal, optionally bounded by `timeout`
    pub async fn wait_for_completion(
        &self,
        job_id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<OrchestrationJob> {
        let handle = self.inner.handle(job_id)?;
        wait_until_terminal(&handle, timeout).await
    }

    /// Every job still held in memory, oldest first
    pub fn list_jobs(&self) -> Vec<OrchestrationJob> {
        let mut jobs: Vec<OrchestrationJob> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.value().runtime.lock().job.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn active_job_ids(&self) -> Vec<Uuid> {
        self.inner.active_handles().iter().map(|h| h.job_id).collect()
    }

    pub fn default_max_concurrent(&self) -> usize {
        *self.inner.default_max_concurrent.read()
    }

    pub fn strategy_override(&self) -> Option<OrchestrationStrategy> {
        *self.inner.strategy_override.read()
    }

    /// Apply a directive; the returned change carries what is needed to undo it
    pub fn apply_directive(&self, directive: ControllerDirective) -> Result<AppliedChange> {
        self.inner.apply_directive(directive)
    }

    /// Serve directives until the channel closes or `shutdown` fires
    pub async fn run_directive_loop(
        &self,
        mut directives: mpsc::Receiver<DirectiveEnvelope>,
        shutdown: CancellationToken,
    ) {
        info!("🎛️ Directive loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = directives.recv() => {
                    let Some(envelope) = envelope else { break };
                    let name = envelope.directive.name();
                    let result = self.apply_directive(envelope.directive);
                    if let Err(err) = &result {
                        log_error("job_controller", name, &err.to_string(), None);
                    }
                    if envelope.reply.send(result).is_err() {
                        debug!(directive = name, "Directive requester went away");
                    }
                }
            }
        }
        info!("🎛️ Directive loop stopped");
    }

    /// Cancel every active job and wait for the drivers to finish
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<JobHandle>> = self.inner.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let driver = handle.driver.lock().take();
            if let Some(driver) = driver {
                if let Err(err) = driver.await {
                    warn!(job_id = %handle.job_id, error = %err, "Job driver ended abnormally");
                }
            }
        }
    }
}

impl ControllerInner {
    fn handle(&self, job_id: Uuid) -> Result<Arc<JobHandle>> {
        self.jobs
            .get(&job_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| ScanflowError::not_found("job", job_id))
    }

    fn active_handles(&self) -> Vec<Arc<JobHandle>> {
        self.jobs
            .iter()
            .filter(|e| !e.value().runtime.lock().job.status.is_terminal())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    fn publish_all(&self, published: PublishedEvents) {
        for (name, context) in published {
            self.ctx.publisher.publish(name, context);
        }
    }

    async fn persist(&self, handle: &JobHandle) {
        let (job, steps) = handle.runtime.lock().snapshot();
        if let Err(err) = self.ctx.repository.save_job(&job).await {
            log_error("job_controller", "persist_job", &err.to_string(), None);
        }
        if let Err(err) = self.ctx.repository.save_steps(job.id, &steps).await {
            log_error("job_controller", "persist_steps", &err.to_string(), None);
        }
    }

    async fn drive(self: Arc<Self>, handle: Arc<JobHandle>) {
        Arc::clone(&self).run_job(Arc::clone(&handle)).await;
        self.retire(&handle);
    }

    /// Track a finished job and drop the oldest finished jobs past the
    /// retention limit; the repository keeps their records
    fn retire(&self, handle: &JobHandle) {
        if !handle.runtime.lock().job.status.is_terminal() {
            return;
        }
        let limit = self.ctx.config.orchestration.finished_job_retention;
        let evicted: Vec<Uuid> = {
            let mut finished = self.finished.lock();
            finished.push_back(handle.job_id);
            let excess = finished.len().saturating_sub(limit);
            finished.drain(..excess).collect()
        };
        for job_id in evicted {
            self.jobs.remove(&job_id);
            debug!(%job_id, "Evicted finished job");
        }
    }

    async fn run_job(self: Arc<Self>, handle: Arc<JobHandle>) {
        let job_id = handle.job_id;

        let outcome = build_plan(&handle.runtime.lock().steps);
        match outcome {
            PlanOutcome::Valid(plan) => handle.runtime.lock().plan = plan,
            PlanOutcome::Cycle { steps } => {
                self.fail_planning(&handle, ScanflowError::DependencyCycle { steps })
                    .await;
                return;
            }
        }

        let reserved = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => None,
            reserved = self.reserve_job_budget(&handle) => Some(reserved),
        };
        match reserved {
            None => {
                self.ctx.allocator.release_all_for_job(job_id);
                self.finish(&handle, JobEvent::Cancel);
                self.persist(&handle).await;
                return;
            }
            Some(Err(err)) => {
                self.fail_planning(&handle, err).await;
                return;
            }
            Some(Ok(())) => {}
        }

        let ready = {
            let mut rt = handle.runtime.lock();
            apply_job_event(&mut rt.job, &JobEvent::PlanReady)
        };
        match ready {
            Ok(state) => {
                handle.status.send_replace(state);
                log_job_operation("plan", Some(job_id), None, "executing", None);
                self.ctx
                    .publisher
                    .publish(events::JOB_STARTED, json!({ "job_id": job_id }));
            }
            Err(err) => {
                log_error("job_controller", "plan_ready", &err.to_string(), Some(&job_id.to_string()));
                self.ctx.allocator.release_all_for_job(job_id);
                return;
            }
        }
        self.persist(&handle).await;

        self.execution_loop(&handle).await;

        let released = self.ctx.allocator.release_all_for_job(job_id);
        debug!(%job_id, released, "Job allocations released");
        self.persist(&handle).await;
        self.notify_outcome(&handle).await;
    }

    async fn fail_planning(&self, handle: &JobHandle, err: ScanflowError) {
        let job_id = handle.job_id;
        let state = {
            let mut rt = handle.runtime.lock();
            rt.job.record_error(err.cause(), err.to_string(), None);
            rt.skip_remaining("job planning failed");
            rt.refresh_counters();
            apply_job_event(&mut rt.job, &JobEvent::PlanFailed(err.to_string()))
        };
        self.ctx.allocator.release_all_for_job(job_id);

        match state {
            Ok(state) => {
                handle.status.send_replace(state);
            }
            Err(transition) => {
                log_error("job_controller", "plan_failed", &transition.to_string(), None);
            }
        }
        log_job_operation("plan", Some(job_id), None, "failed", Some(&err.to_string()));
        self.ctx.publisher.publish(
            events::JOB_PLAN_FAILED,
            json!({ "job_id": job_id, "cause": err.cause(), "error": err.to_string() }),
        );
        self.ctx
            .publisher
            .publish(events::JOB_FAILED, json!({ "job_id": job_id, "error": err.to_string() }));
        self.persist(handle).await;
        self.notify_outcome(handle).await;
    }

    /// Reserve the job-level budget; partial reservations are returned on failure
    async fn reserve_job_budget(&self, handle: &JobHandle) -> Result<()> {
        let (job_id, priority, requirements) = {
            let rt = handle.runtime.lock();
            (rt.job.id, rt.job.priority, rt.job.resource_requirements.clone())
        };
        let policy = self.ctx.allocator.default_policy();
        let mut reserved: Vec<ResourceAllocation> = Vec::with_capacity(requirements.len());

        for requirement in requirements {
            let mut request =
                AllocationRequest::new(job_id, requirement.resource_type, requirement.amount)
                    .with_priority(priority);
            if let Some(pool_id) = requirement.pool_id {
                request = request.in_pool(pool_id);
            }
            let granted = match self.ctx.allocator.allocate_with_retry(request, policy).await {
                Ok(allocation) => self.ctx.allocator.activate(allocation.id),
                Err(err) => Err(err),
            };
            match granted {
                Ok(allocation) => reserved.push(allocation),
                Err(err) => {
                    for allocation in &reserved {
                        if let Err(release_err) = self.ctx.allocator.release(allocation.id) {
                            warn!(allocation_id = %allocation.id, error = %release_err, "Failed to return job budget");
                        }
                    }
                    return Err(err);
                }
            }
        }

        for allocation in &reserved {
            if let Err(err) = self.ctx.repository.save_allocation(allocation).await {
                log_error("job_controller", "persist_allocation", &err.to_string(), None);
            }
        }
        Ok(())
    }

    async fn execution_loop(&self, handle: &Arc<JobHandle>) {
        let job_id = handle.job_id;
        let steps_token = handle.cancel.child_token();
        let mut tasks: JoinSet<(String, AttemptOutcome)> = JoinSet::new();
        let mut paused = handle.paused.subscribe();
        let mut tick = tokio::time::interval(self.ctx.config.orchestration.scheduler_tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout_seconds = handle.runtime.lock().job.timeout_seconds;
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_seconds));
        tokio::pin!(deadline);

        loop {
            if tasks.is_empty() {
                if let Some(event) = self.completion_event(handle) {
                    self.finish(handle, event);
                    return;
                }
            }

            for launch in self.dispatch(handle) {
                let executor = self.executor.clone();
                let token = steps_token.clone();
                let step_id = launch.step.id.clone();
                tasks.spawn(async move {
                    let outcome = AssertUnwindSafe(executor.execute(launch.step, launch.input, token))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            AttemptOutcome::Failed(StepExecutionError::permanent("step handler panicked"))
                        });
                    (step_id, outcome)
                });
            }

            tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => {
                    self.abort(handle, JobEvent::Cancel, &steps_token, &mut tasks).await;
                    return;
                }
                _ = &mut deadline => {
                    handle.runtime.lock().job.record_error(
                        "timeout",
                        format!("job exceeded its {timeout_seconds}s budget"),
                        None,
                    );
                    self.abort(handle, JobEvent::TimedOut, &steps_token, &mut tasks).await;
                    return;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((step_id, outcome)) => {
                            if let Some(event) = self.handle_outcome(handle, &step_id, outcome) {
                                self.abort(handle, event, &steps_token, &mut tasks).await;
                                return;
                            }
                            self.persist(handle).await;
                        }
                        Err(err) => {
                            log_error("job_controller", "join_step", &err.to_string(), Some(&job_id.to_string()));
                        }
                    }
                }
                _ = paused.changed() => {}
                _ = tick.tick() => {}
            }
        }
    }

    /// Stop every in-flight attempt, then end the job with `event`
    async fn abort(
        &self,
        handle: &JobHandle,
        event: JobEvent,
        steps_token: &CancellationToken,
        tasks: &mut JoinSet<(String, AttemptOutcome)>,
    ) {
        steps_token.cancel();
        while let Some(joined) = tasks.join_next().await {
            // Attempts that finished before observing the cancellation keep their result
            if let Ok((step_id, outcome @ AttemptOutcome::Completed(_))) = joined {
                self.handle_outcome(handle, &step_id, outcome);
            }
        }
        self.ctx.allocator.release_all_for_job(handle.job_id);
        self.finish(handle, event);
    }

    /// Terminal event once every step is terminal; `None` otherwise
    fn completion_event(&self, handle: &JobHandle) -> Option<JobEvent> {
        let rt = handle.runtime.lock();
        if rt.job.status != JobState::Executing || !rt.all_terminal() {
            return None;
        }
        let failed = rt.job.results.failed_steps;
        if failed > 0 {
            Some(JobEvent::fail_with_error(format!("{failed} step(s) failed")))
        } else {
            Some(JobEvent::Complete)
        }
    }

    /// Skip leftover steps and move the job to its terminal state
    fn finish(&self, handle: &JobHandle, event: JobEvent) {
        let job_id = handle.job_id;
        let reason = match &event {
            JobEvent::Cancel => "job cancelled",
            JobEvent::TimedOut => "job timed out",
            _ => "job aborted",
        };
        let mut published = PublishedEvents::new();
        let outcome = {
            let mut rt = handle.runtime.lock();
            for step_id in rt.skip_remaining(reason) {
                published.push((
                    events::STEP_SKIPPED,
                    json!({ "job_id": job_id, "step_id": step_id, "reason": reason }),
                ));
            }
            rt.running.clear();
            rt.refresh_counters();
            apply_job_event(&mut rt.job, &event).map(|state| (state, rt.job.results))
        };

        match outcome {
            Ok((state, results)) => {
                handle.status.send_replace(state);
                log_job_operation(
                    "finish",
                    Some(job_id),
                    None,
                    state.as_str(),
                    event.error_message(),
                );
                published.push((
                    terminal_event_name(state),
                    json!({
                        "job_id": job_id,
                        "status": state,
                        "completed_steps": results.completed_steps,
                        "failed_steps": results.failed_steps,
                        "skipped_steps": results.skipped_steps,
                        "error": event.error_message(),
                    }),
                ));
            }
            Err(err) => log_error("job_controller", "finish", &err.to_string(), Some(&job_id.to_string())),
        }
        self.publish_all(published);
    }

    /// Resolve waiting steps, requeue due retries and start what the strategy admits
    fn dispatch(&self, handle: &JobHandle) -> Vec<Launch> {
        let mut published = PublishedEvents::new();
        let launches = {
            let mut guard = handle.runtime.lock();
            let rt = &mut *guard;
            if rt.job.status != JobState::Executing {
                return Vec::new();
            }

            let now = Instant::now();
            let due: Vec<String> = rt
                .retry_at
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for step_id in due {
                rt.retry_at.remove(&step_id);
                if let Some(&idx) = rt.index.get(&step_id) {
                    if let Err(err) = apply_step_event(&mut rt.steps[idx], StepEvent::Requeue) {
                        warn!(%step_id, error = %err, "Retry requeue rejected");
                    }
                }
            }

            resolve_pending_steps(rt, &mut published);
            rt.refresh_counters();
            self.start_ready_steps(rt, &mut published)
        };
        self.publish_all(published);
        launches
    }

    fn start_ready_steps(&self, rt: &mut JobRuntime, published: &mut PublishedEvents) -> Vec<Launch> {
        let ready: Vec<ReadyStep> = rt
            .plan
            .order
            .iter()
            .filter_map(|id| rt.index.get(id).map(|&idx| &rt.steps[idx]))
            .filter(|s| s.status == StepState::Queued)
            .map(|s| ReadyStep {
                id: s.id.clone(),
                priority: s.priority,
                position: rt.plan.position(&s.id),
                level: rt.plan.level(&s.id),
                target: s.target.clone(),
            })
            .collect();
        if ready.is_empty() {
            return Vec::new();
        }

        let mut running_by_target: HashMap<String, usize> = HashMap::new();
        for target in rt.running.values() {
            *running_by_target
                .entry(target.clone().unwrap_or_default())
                .or_default() += 1;
        }
        let frontier_level = rt
            .steps
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| rt.plan.level(&s.id))
            .min()
            .unwrap_or(0);

        let scheduling = SchedulingContext {
            ready: &ready,
            running_total: rt.running.len(),
            running_by_target: &running_by_target,
            frontier_level,
            max_concurrent: rt.job.max_concurrent_scans,
            system_utilization: self.ctx.allocator.overall_utilization(),
            success_rate: self.ctx.metrics.overall_success_rate(),
            goal_weights: rt.job.goal_weights,
        };
        let strategy = strategy_for(rt.job.strategy, &self.ctx.config.orchestration);
        let selected = strategy.select_next_ready_steps(&scheduling);

        let mut launches = Vec::with_capacity(selected.len());
        for step_id in selected {
            let Some(&idx) = rt.index.get(&step_id) else {
                continue;
            };
            let step = &mut rt.steps[idx];
            if let Err(err) = apply_step_event(step, StepEvent::Initialize)
                .and_then(|_| apply_step_event(step, StepEvent::Start))
            {
                warn!(%step_id, error = %err, "Step could not be started");
                continue;
            }
            step.attempts += 1;
            let attempt = step.attempts;
            let target = step.target.clone();
            let dependencies = step.dependency_requirements.clone();
            let snapshot = step.clone();

            if !rt.start_order.contains(&step_id) {
                rt.start_order.push(step_id.clone());
            }
            rt.job.current_step = Some(step_id.clone());
            rt.running.insert(step_id.clone(), target);

            let dependency_results = dependencies
                .iter()
                .filter_map(|dep| {
                    let idx = rt.index.get(dep)?;
                    let result = rt.steps[*idx].result.clone()?;
                    Some((dep.clone(), result))
                })
                .collect();

            log_step_operation("start", Some(rt.job.id), Some(&step_id), "running", Some(strategy.name()));
            published.push((
                events::STEP_STARTED,
                json!({ "job_id": rt.job.id, "step_id": step_id, "attempt": attempt }),
            ));
            launches.push(Launch {
                step: snapshot,
                input: AttemptInput {
                    attempt,
                    job_priority: rt.job.priority,
                    job_context: rt.job.context.clone(),
                    dependency_results,
                },
            });
        }
        launches
    }

    /// Fold one attempt outcome into the job; returns an abort event when the job must end
    fn handle_outcome(&self, handle: &JobHandle, step_id: &str, outcome: AttemptOutcome) -> Option<JobEvent> {
        let job_id = handle.job_id;
        let mut published = PublishedEvents::new();
        let abort = {
            let mut guard = handle.runtime.lock();
            let rt = &mut *guard;
            rt.running.remove(step_id);
            let idx = *rt.index.get(step_id)?;

            let abort = match outcome {
                AttemptOutcome::Cancelled => None,
                AttemptOutcome::Completed(output) => {
                    let step = &mut rt.steps[idx];
                    match apply_step_event(step, StepEvent::Complete) {
                        Ok(_) => {
                            step.result = Some(output.result);
                            step.quality_score = output.quality_score;
                            step.resource_usage.push(output.resource_usage);
                            published.push((
                                events::STEP_COMPLETED,
                                json!({
                                    "job_id": job_id,
                                    "step_id": step_id,
                                    "quality_score": output.quality_score,
                                }),
                            ));
                        }
                        Err(err) => debug!(%step_id, error = %err, "Late completion ignored"),
                    }
                    None
                }
                AttemptOutcome::Failed(err) => self.handle_failure(rt, idx, err, &mut published),
            };
            rt.refresh_counters();
            abort
        };
        self.publish_all(published);
        abort
    }

    fn handle_failure(
        &self,
        rt: &mut JobRuntime,
        idx: usize,
        err: StepExecutionError,
        published: &mut PublishedEvents,
    ) -> Option<JobEvent> {
        let job_id = rt.job.id;
        let step = &mut rt.steps[idx];
        let step_id = step.id.clone();
        let action = step.on_failure_action;
        let retryable = (err.is_transient() || action == FailureAction::Retry)
            && step.has_retries_remaining();

        if retryable && apply_step_event(step, StepEvent::RetryAfterFailure(err.message.clone())).is_ok() {
            step.retry_count += 1;
            let delay = self
                .ctx
                .config
                .execution
                .backoff_for(step.retry_delay_seconds, step.retry_count);
            let retry_count = step.retry_count;
            rt.retry_at.insert(step_id.clone(), Instant::now() + delay);
            rt.job.results.retried_attempts += 1;
            log_step_operation("retry", Some(job_id), Some(&step_id), "retrying", Some(&err.message));
            published.push((
                events::STEP_RETRYING,
                json!({
                    "job_id": job_id,
                    "step_id": step_id,
                    "retry_count": retry_count,
                    "delay_ms": delay.as_millis() as u64,
                    "error": err.message,
                }),
            ));
            return None;
        }

        let scanflow_err = err.clone().into_scanflow_error(step_id.clone());
        rt.job.record_error(scanflow_err.cause(), scanflow_err.to_string(), Some(&step_id));

        let step = &mut rt.steps[idx];
        let transition = match action {
            FailureAction::Skip => {
                apply_step_event(step, StepEvent::skip_because(format!("optional step failed: {}", err.message)))
            }
            FailureAction::Stop | FailureAction::Continue | FailureAction::Retry => {
                apply_step_event(step, StepEvent::fail_with_error(err.message.clone()))
            }
        };
        if let Err(transition_err) = transition {
            warn!(%step_id, error = %transition_err, "Failed step could not be finalized");
            return None;
        }
        published.push((
            if action == FailureAction::Skip {
                events::STEP_SKIPPED
            } else {
                events::STEP_FAILED
            },
            json!({ "job_id": job_id, "step_id": step_id, "kind": err.kind, "error": err.message }),
        ));
        rt.cascade_skip(&step_id, published);
        rt.refresh_counters();

        match action {
            FailureAction::Stop => Some(JobEvent::fail_with_error(format!(
                "step {step_id} failed with on_failure=stop: {}",
                err.message
            ))),
            FailureAction::Skip => None,
            FailureAction::Continue | FailureAction::Retry => {
                let ratio = rt.job.results.failure_ratio();
                (ratio > rt.job.failure_threshold).then(|| {
                    JobEvent::fail_with_error(format!(
                        "failure ratio {ratio:.2} exceeded threshold {:.2}",
                        rt.job.failure_threshold
                    ))
                })
            }
        }
    }

    async fn notify_outcome(&self, handle: &JobHandle) {
        let (job_id, name, status, last_error) = {
            let rt = handle.runtime.lock();
            (
                rt.job.id,
                rt.job.name.clone(),
                rt.job.status,
                rt.job.error_log.last().map(|e| e.message.clone()),
            )
        };
        let kind = match status {
            JobState::Failed => NotificationKind::JobFailed,
            JobState::Timeout => NotificationKind::JobTimedOut,
            _ => return,
        };
        let notification = Notification::new(
            kind,
            format!("Job '{name}' {status}"),
            last_error.unwrap_or_else(|| format!("job {job_id} ended as {status}")),
        )
        .for_job(job_id);
        if let Err(err) = self.ctx.notifier.dispatch(notification).await {
            log_error("job_controller", "notify", &err.to_string(), Some(&job_id.to_string()));
        }
    }

    fn apply_directive(&self, directive: ControllerDirective) -> Result<AppliedChange> {
        let limit = self.ctx.config.orchestration.max_concurrent_scans_limit;
        let clamp = |current: usize, delta: i32| -> usize {
            (current as i64 + i64::from(delta)).clamp(1, limit as i64) as usize
        };

        let change = match directive {
            ControllerDirective::AdjustConcurrency { job_id, delta } => {
                let handles = self.directive_targets(job_id)?;
                let mut per_job = Vec::with_capacity(handles.len());
                for handle in handles {
                    let mut rt = handle.runtime.lock();
                    let previous = rt.job.max_concurrent_scans;
                    rt.job.max_concurrent_scans = clamp(previous, delta);
                    per_job.push((handle.job_id, previous));
                }
                let default = if job_id.is_none() {
                    let mut current = self.default_max_concurrent.write();
                    let previous = *current;
                    *current = clamp(previous, delta);
                    Some(previous)
                } else {
                    None
                };
                AppliedChange {
                    description: format!("adjusted concurrency by {delta} on {} job(s)", per_job.len()),
                    rollback: RollbackAction::RestoreConcurrency { per_job, default },
                }
            }
            ControllerDirective::SwitchStrategy { job_id, strategy } => {
                let handles = self.directive_targets(job_id)?;
                let mut per_job = Vec::with_capacity(handles.len());
                for handle in handles {
                    let mut rt = handle.runtime.lock();
                    per_job.push((handle.job_id, rt.job.strategy));
                    rt.job.strategy = strategy;
                }
                let default = job_id
                    .is_none()
                    .then(|| self.strategy_override.write().replace(strategy));
                AppliedChange {
                    description: format!("switched {} job(s) to {strategy}", per_job.len()),
                    rollback: RollbackAction::RestoreStrategy { per_job, default },
                }
            }
            ControllerDirective::ResizePool {
                pool_id,
                capacity_factor,
            } => {
                let current = self.ctx.allocator.pool_snapshot(&pool_id)?;
                let previous = self
                    .ctx
                    .allocator
                    .resize_pool(&pool_id, current.capacity * capacity_factor)?;
                AppliedChange {
                    description: format!("resized pool {pool_id} by factor {capacity_factor}"),
                    rollback: RollbackAction::RestorePoolCapacity {
                        pool_id,
                        capacity: previous,
                    },
                }
            }
            ControllerDirective::Rollback(action) => self.rollback(action)?,
        };

        log_job_operation("reconfigure", None, None, "applied", Some(&change.description));
        self.ctx.publisher.publish(
            events::JOB_RECONFIGURED,
            json!({ "description": change.description, "rollback": change.rollback }),
        );
        Ok(change)
    }

    fn directive_targets(&self, job_id: Option<Uuid>) -> Result<Vec<Arc<JobHandle>>> {
        match job_id {
            Some(job_id) => {
                let handle = self.handle(job_id)?;
                let status = handle.runtime.lock().job.status;
                if status.is_terminal() {
                    return Err(ScanflowError::StateTransition(format!(
                        "job {job_id} is {status} and cannot be reconfigured"
                    )));
                }
                Ok(vec![handle])
            }
            None => Ok(self.active_handles()),
        }
    }

    fn rollback(&self, action: RollbackAction) -> Result<AppliedChange> {
        match action {
            RollbackAction::RestoreConcurrency { per_job, default } => {
                for (job_id, previous) in per_job {
                    if let Ok(handle) = self.handle(job_id) {
                        let mut rt = handle.runtime.lock();
                        if !rt.job.status.is_terminal() {
                            rt.job.max_concurrent_scans = previous;
                        }
                    }
                }
                if let Some(previous) = default {
                    validate_concurrency(previous, self.ctx.config.orchestration.max_concurrent_scans_limit)?;
                    *self.default_max_concurrent.write() = previous;
                }
                Ok(AppliedChange::nothing("restored concurrency"))
            }
            RollbackAction::RestoreStrategy { per_job, default } => {
                for (job_id, previous) in per_job {
                    if let Ok(handle) = self.handle(job_id) {
                        let mut rt = handle.runtime.lock();
                        if !rt.job.status.is_terminal() {
                            rt.job.strategy = previous;
                        }
                    }
                }
                if let Some(previous) = default {
                    *self.strategy_override.write() = previous;
                }
                Ok(AppliedChange::nothing("restored strategy"))
            }
            RollbackAction::RestorePoolCapacity { pool_id, capacity } => {
                self.ctx.allocator.resize_pool(&pool_id, capacity)?;
                Ok(AppliedChange::nothing(format!("restored pool {pool_id} capacity to {capacity}")))
            }
            RollbackAction::Nothing => Ok(AppliedChange::nothing("nothing to roll back")),
        }
    }
}

/// Move queued/waiting steps according to dependency state and conditions until stable
fn resolve_pending_steps(rt: &mut JobRuntime, published: &mut PublishedEvents) {
    loop {
        let statuses = rt.statuses();
        let mut changed = false;

        for step_id in &rt.plan.order {
            let Some(&idx) = rt.index.get(step_id) else {
                continue;
            };
            let step = &mut rt.steps[idx];
            if !matches!(step.status, StepState::Queued | StepState::Waiting) {
                continue;
            }

            let dependencies_met = step.dependency_requirements.iter().all(|dep| {
                statuses
                    .get(dep)
                    .map(StepState::satisfies_dependencies)
                    .unwrap_or(false)
            });
            if !dependencies_met {
                if step.status == StepState::Queued {
                    let _ = apply_step_event(step, StepEvent::WaitForDependencies);
                }
                continue;
            }
            if step.status == StepState::Waiting {
                let _ = apply_step_event(step, StepEvent::DependenciesMet);
            }

            let skip_reason = match (&step.skip_condition, &step.execution_condition) {
                (Some(skip), _) if conditions::evaluate(skip, &rt.job.context, &statuses) => {
                    Some("skip condition met")
                }
                (_, Some(execute)) if !conditions::evaluate(execute, &rt.job.context, &statuses) => {
                    Some("execution condition not met")
                }
                _ => None,
            };
            if let Some(reason) = skip_reason {
                if apply_step_event(step, StepEvent::skip_because(reason)).is_ok() {
                    changed = true;
                    published.push((
                        events::STEP_SKIPPED,
                        json!({ "job_id": rt.job.id, "step_id": step_id, "reason": reason }),
                    ));
                }
            }
        }

        if !changed {
            break;
        }
    }
}
