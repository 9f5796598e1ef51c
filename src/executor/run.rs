//! Plan executor: bounded worker pool over the plan DAG.

use super::report::{ExecutionRecord, ExecutionReport, StepStatus};
use super::retry::{Decision, RetryPolicy};
use super::runner::{DependencyOutput, StepContext, StepRunner};
use crate::config::EngineConfig;
use crate::manifest::CapabilityManifest;
use crate::plan::{IntegrationPlan, StepId};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Terminal result of one step across retries and fallbacks.
#[derive(Debug)]
struct StepResult {
    output: std::result::Result<Value, String>,
    attempts: u32,
    fallback_used: Option<Uuid>,
}

#[derive(Debug)]
enum StepEvent {
    Started { step: StepId, at: DateTime<Utc> },
    /// Permit acquired after shutdown began; the runner was never called.
    Abandoned { step: StepId },
    Finished { step: StepId, result: StepResult },
}

/// Executes an [`IntegrationPlan`] against a [`StepRunner`].
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    retry: RetryPolicy,
    shutdown_grace: Duration,
    enable_fallbacks: bool,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(2),
            enable_fallbacks: true,
        }
    }
}

impl PlanExecutor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..Self::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            shutdown_grace: config.shutdown_grace(),
            enable_fallbacks: config.enable_fallbacks,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_fallbacks(mut self, enabled: bool) -> Self {
        self.enable_fallbacks = enabled;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn execute(&self, plan: &IntegrationPlan, runner: Arc<dyn StepRunner>) -> ExecutionReport {
        self.execute_with_cancel(plan, runner, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), stopping early when `cancel` fires.
    /// Cancellation is handled like a timeout, but reported as `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        plan: &IntegrationPlan,
        runner: Arc<dyn StepRunner>,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let span = tracing::info_span!(
            "execute",
            correlation_id = %plan.correlation_id,
            capability = %plan.capability,
            steps = plan.len(),
        );
        self.drive(plan, runner, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        plan: &IntegrationPlan,
        runner: Arc<dyn StepRunner>,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let started = Instant::now();
        let deadline = started + plan.timeout;
        let token = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            correlation_id: plan.correlation_id,
            runner,
            semaphore: Arc::new(Semaphore::new(plan.max_concurrent.max(1))),
            retry: self.retry.clone(),
            enable_fallbacks: self.enable_fallbacks,
            token: token.clone(),
            tx,
        };
        let mut state = ExecutionState::new(plan);
        let mut tasks = JoinSet::new();
        let mut outstanding = 0usize;

        for id in state.initially_ready() {
            dispatcher.spawn(&mut tasks, plan, &mut state, id);
            outstanding += 1;
        }

        let mut timed_out = false;
        let mut cancelled = false;
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        while outstanding > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = &mut timer => {
                    timed_out = true;
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if !matches!(event, StepEvent::Started { .. }) {
                        outstanding -= 1;
                    }
                    for id in state.apply(plan, event) {
                        dispatcher.spawn(&mut tasks, plan, &mut state, id);
                        outstanding += 1;
                    }
                }
            }
        }

        if timed_out || cancelled {
            let reason = if timed_out {
                "integration timed out before the step started"
            } else {
                "integration cancelled before the step started"
            };
            warn!(timed_out, cancelled, in_flight = outstanding, "stopping integration");
            token.cancel();
            state.stop(reason);

            let grace = tokio::time::sleep(self.shutdown_grace);
            tokio::pin!(grace);
            while outstanding > 0 {
                tokio::select! {
                    _ = &mut grace => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if !matches!(event, StepEvent::Started { .. }) {
                            outstanding -= 1;
                        }
                        // No new work once stopping.
                        let _ = state.apply(plan, event);
                    }
                }
            }
            while let Ok(event) = rx.try_recv() {
                let _ = state.apply(plan, event);
            }
            state.force_fail_running("step did not finish within the shutdown grace period");
            tasks.abort_all();
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "step task panicked");
                }
            }
        }
        let reason = state.stopped.unwrap_or("step was never reached");
        state.skip_pending(reason);

        let records = state.records;
        let outcome = ExecutionReport::outcome_of(&records);
        let elapsed = started.elapsed();
        info!(
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            cancelled,
            "integration finished"
        );
        ExecutionReport {
            correlation_id: plan.correlation_id,
            outcome,
            records,
            root: plan.root,
            timed_out,
            cancelled,
            elapsed,
        }
    }
}

/// Per-run bookkeeping owned by the driving task.
struct ExecutionState {
    records: Vec<ExecutionRecord>,
    outputs: Vec<Option<Value>>,
    waiting_on: Vec<BTreeSet<StepId>>,
    dependents: Vec<Vec<StepId>>,
    /// Spawned steps; each reports `Started` or `Abandoned` exactly once.
    dispatched: Vec<bool>,
    /// Set once the run is stopping; reason for steps that never start.
    stopped: Option<&'static str>,
}

impl ExecutionState {
    fn new(plan: &IntegrationPlan) -> Self {
        let mut dependents = vec![Vec::new(); plan.len()];
        let mut waiting_on = Vec::with_capacity(plan.len());
        for step in &plan.steps {
            let deps: BTreeSet<StepId> = step.depends_on.iter().copied().collect();
            for dep in &deps {
                dependents[dep.index()].push(step.id);
            }
            waiting_on.push(deps);
        }
        Self {
            records: plan
                .steps
                .iter()
                .map(|s| ExecutionRecord::pending(s.id, s.capability(), s.manifest.id(), s.critical))
                .collect(),
            outputs: vec![None; plan.len()],
            waiting_on,
            dependents,
            dispatched: vec![false; plan.len()],
            stopped: None,
        }
    }

    fn initially_ready(&self) -> Vec<StepId> {
        self.waiting_on
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| StepId(i))
            .collect()
    }

    fn inputs_for(&self, plan: &IntegrationPlan, id: StepId) -> Vec<DependencyOutput> {
        let Some(step) = plan.step(id) else {
            return Vec::new();
        };
        step.depends_on
            .iter()
            .filter_map(|dep| {
                let output = self.outputs.get(dep.index())?.as_ref()?;
                Some(DependencyOutput {
                    step: *dep,
                    capability: plan.step(*dep)?.capability().to_string(),
                    output: output.clone(),
                })
            })
            .collect()
    }

    /// Apply one event; returns steps that became ready.
    fn apply(&mut self, plan: &IntegrationPlan, event: StepEvent) -> Vec<StepId> {
        match event {
            StepEvent::Started { step, at } => {
                let record = &mut self.records[step.index()];
                if record.status != StepStatus::Pending {
                    return Vec::new();
                }
                record.status = StepStatus::Running;
                record.started_at = Some(at);
                record.last_error = None;
                debug!(step = %step, capability = %record.capability, "step started");
                Vec::new()
            }
            StepEvent::Abandoned { step } => {
                let reason = self.stopped.unwrap_or("integration stopped before the step started");
                let record = &mut self.records[step.index()];
                if record.status == StepStatus::Pending {
                    record.skip(reason);
                }
                debug!(step = %step, capability = %record.capability, "step abandoned before start");
                Vec::new()
            }
            StepEvent::Finished { step, result } => {
                let record = &mut self.records[step.index()];
                record.attempts = result.attempts;
                record.fallback_used = result.fallback_used;
                record.finished_at = Some(Utc::now());
                let succeeded = match result.output {
                    Ok(value) => {
                        record.status = StepStatus::Succeeded;
                        record.last_error = None;
                        record.output = Some(value.clone());
                        self.outputs[step.index()] = Some(value);
                        info!(
                            step = %step,
                            capability = %record.capability,
                            attempts = record.attempts,
                            fallback = record.fallback_used.is_some(),
                            "step succeeded"
                        );
                        true
                    }
                    Err(message) => {
                        record.status = StepStatus::Failed;
                        warn!(
                            step = %step,
                            capability = %record.capability,
                            attempts = record.attempts,
                            error = %message,
                            "step failed"
                        );
                        record.last_error = Some(message);
                        false
                    }
                };
                self.settle(plan, step, succeeded)
            }
        }
    }

    /// Release dependents of a finished step, skipping those it blocks.
    fn settle(&mut self, plan: &IntegrationPlan, finished: StepId, succeeded: bool) -> Vec<StepId> {
        let mut ready = Vec::new();
        let mut worklist = VecDeque::from([(finished, succeeded)]);
        while let Some((done, ok)) = worklist.pop_front() {
            for dependent in self.dependents[done.index()].clone() {
                self.waiting_on[dependent.index()].remove(&done);
                if self.records[dependent.index()].status != StepStatus::Pending {
                    continue;
                }
                let blocked = !ok
                    && plan
                        .step(dependent)
                        .map(|s| s.blocks_on(done))
                        .unwrap_or(true);
                if blocked {
                    self.records[dependent.index()]
                        .skip(format!("dependency {done} did not succeed"));
                    debug!(step = %dependent, dependency = %done, "step skipped");
                    worklist.push_back((dependent, false));
                } else if self.waiting_on[dependent.index()].is_empty() {
                    ready.push(dependent);
                }
            }
        }
        ready
    }

    fn mark_dispatched(&mut self, id: StepId) {
        self.dispatched[id.index()] = true;
    }

    /// Skip every step not yet handed to a worker. Dispatched steps settle
    /// through their own `Started` or `Abandoned` event.
    fn stop(&mut self, reason: &'static str) {
        self.stopped = Some(reason);
        for (record, dispatched) in self.records.iter_mut().zip(&self.dispatched) {
            if record.status == StepStatus::Pending && !dispatched {
                record.skip(reason);
            }
        }
    }

    fn skip_pending(&mut self, reason: &str) {
        for record in self.records.iter_mut().filter(|r| r.status == StepStatus::Pending) {
            record.skip(reason);
        }
    }

    fn force_fail_running(&mut self, reason: &str) {
        for record in self.records.iter_mut().filter(|r| r.status == StepStatus::Running) {
            warn!(step = %record.step, capability = %record.capability, "forcing step to failed");
            record.status = StepStatus::Failed;
            record.last_error = Some(reason.to_string());
            record.finished_at = Some(Utc::now());
        }
    }
}

/// Shared handles cloned into every step task.
struct Dispatcher {
    correlation_id: Uuid,
    runner: Arc<dyn StepRunner>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    enable_fallbacks: bool,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<StepEvent>,
}

impl Dispatcher {
    fn spawn(&self, tasks: &mut JoinSet<()>, plan: &IntegrationPlan, state: &mut ExecutionState, id: StepId) {
        let Some(step) = plan.step(id) else {
            return;
        };
        state.mark_dispatched(id);
        let mut candidates = vec![step.manifest.clone()];
        if self.enable_fallbacks {
            candidates.extend(step.fallbacks.iter().cloned());
        }
        let job = StepJob {
            correlation_id: self.correlation_id,
            step: id,
            candidates,
            members: step.members.clone(),
            inputs: state.inputs_for(plan, id),
            runner: self.runner.clone(),
            retry: self.retry.clone(),
            token: self.token.clone(),
        };
        let semaphore = self.semaphore.clone();
        let tx = self.tx.clone();

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send(StepEvent::Abandoned { step: id });
                    return;
                }
            };
            if job.token.is_cancelled() {
                let _ = tx.send(StepEvent::Abandoned { step: id });
                return;
            }
            let _ = tx.send(StepEvent::Started {
                step: id,
                at: Utc::now(),
            });
            let result = job.run().await;
            let _ = tx.send(StepEvent::Finished { step: id, result });
        });
    }
}

/// One step's work: the primary manifest, then each fallback, with retries.
struct StepJob {
    correlation_id: Uuid,
    step: StepId,
    candidates: Vec<Arc<CapabilityManifest>>,
    members: Vec<Arc<CapabilityManifest>>,
    inputs: Vec<DependencyOutput>,
    runner: Arc<dyn StepRunner>,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl StepJob {
    async fn run(self) -> StepResult {
        let mut attempts = 0u32;
        let mut last_error = String::from("no manifest to run");

        for (slot, manifest) in self.candidates.iter().enumerate() {
            let fallback = slot.checked_sub(1);
            let has_next = slot + 1 < self.candidates.len();
            let mut attempt = 0u32;
            loop {
                if self.token.is_cancelled() {
                    return self.failed(attempts, "cancelled");
                }
                attempts += 1;
                let ctx = StepContext {
                    correlation_id: self.correlation_id,
                    step: self.step,
                    manifest: manifest.clone(),
                    members: self.members.clone(),
                    attempt,
                    fallback,
                    inputs: self.inputs.clone(),
                    cancel: self.token.clone(),
                };
                let outcome = match AssertUnwindSafe(self.runner.run(ctx)).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(_) => Err("step runner panicked".to_string()),
                };
                match outcome {
                    Ok(value) => {
                        return StepResult {
                            output: Ok(value),
                            attempts,
                            fallback_used: fallback.map(|_| manifest.id()),
                        }
                    }
                    Err(message) => {
                        debug!(
                            step = %self.step,
                            manifest_id = %manifest.id(),
                            attempt,
                            error = %message,
                            "attempt failed"
                        );
                        last_error = message;
                    }
                }
                match self.retry.decide(attempt, has_next) {
                    Decision::Retry { delay } => {
                        tokio::select! {
                            _ = self.token.cancelled() => {
                                return self.failed(attempts, format!("cancelled after: {last_error}"));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    Decision::Fallback => {
                        warn!(
                            step = %self.step,
                            manifest_id = %manifest.id(),
                            "retries exhausted, trying fallback"
                        );
                        break;
                    }
                    Decision::Fail => return self.failed(attempts, last_error),
                }
            }
        }
        self.failed(attempts, last_error)
    }

    fn failed(&self, attempts: u32, message: impl Into<String>) -> StepResult {
        StepResult {
            output: Err(message.into()),
            attempts,
            fallback_used: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{step_fn, PlanOutcome};
    use crate::manifest::{CapabilityManifest, CapabilityType, IOSchema};
    use crate::plan::AdaptationStep;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manifest(module: &str, name: &str) -> Arc<CapabilityManifest> {
        Arc::new(
            CapabilityManifest::builder(module, name, CapabilityType::Transformation)
                .version("1.0.0")
                .output("result", IOSchema::json_type("string").unwrap())
                .description("test manifest")
                .build_unchecked(),
        )
    }

    fn fast() -> PlanExecutor {
        PlanExecutor::new(RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn test_dependency_output_flows_to_dependent() {
        let a = AdaptationStep::new(StepId(0), manifest("m", "a"));
        let b = AdaptationStep::new(StepId(1), manifest("m", "b")).with_dependencies(vec![StepId(0)]);
        let plan = IntegrationPlan::from_steps("b", vec![a, b], StepId(1)).unwrap();

        let runner = |ctx: StepContext| async move {
            match ctx.capability() {
                "a" => Ok(json!(1)),
                _ => Ok(json!(ctx.input("a").and_then(|v| v.as_i64()).unwrap_or(0) + 1)),
            }
        };
        let report = fast().execute(&plan, step_fn(runner)).await;
        assert_eq!(report.outcome, PlanOutcome::Succeeded);
        assert_eq!(report.output(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_retries_before_failing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let plan = IntegrationPlan::from_steps(
            "a",
            vec![AdaptationStep::new(StepId(0), manifest("m", "a"))],
            StepId(0),
        )
        .unwrap();
        let runner = move |_ctx: StepContext| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }
        };
        let report = fast().execute(&plan, step_fn(runner)).await;
        assert_eq!(report.outcome, PlanOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let record = report.record(StepId(0)).unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_panicking_runner_is_a_failure() {
        let plan = IntegrationPlan::from_steps(
            "a",
            vec![AdaptationStep::new(StepId(0), manifest("m", "a"))],
            StepId(0),
        )
        .unwrap();
        let runner = |_ctx: StepContext| async move {
            if true {
                panic!("runner bug");
            }
            Ok(json!(null))
        };
        let report = fast().execute(&plan, step_fn(runner)).await;
        assert_eq!(report.status_of(StepId(0)), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn test_optional_dependency_failure_does_not_block() {
        let a = AdaptationStep::new(StepId(0), manifest("m", "a")).non_critical();
        let mut b = AdaptationStep::new(StepId(1), manifest("m", "b")).with_dependencies(vec![StepId(0)]);
        b.optional_dependencies = vec![StepId(0)];
        let plan = IntegrationPlan::from_steps("b", vec![a, b], StepId(1)).unwrap();

        let runner = |ctx: StepContext| async move {
            if ctx.capability() == "a" {
                anyhow::bail!("optional part down");
            }
            Ok(json!({ "has_a": ctx.input("a").is_some() }))
        };
        let report = fast().execute(&plan, step_fn(runner)).await;
        assert_eq!(report.outcome, PlanOutcome::Degraded);
        assert_eq!(report.output(), Some(&json!({ "has_a": false })));
    }

    #[test]
    fn test_stop_leaves_dispatched_steps_to_their_events() {
        let steps = vec![
            AdaptationStep::new(StepId(0), manifest("m", "a")),
            AdaptationStep::new(StepId(1), manifest("m", "b")),
            AdaptationStep::new(StepId(2), manifest("m", "c")),
        ];
        let plan = IntegrationPlan::from_steps("a", steps, StepId(0)).unwrap();
        let mut state = ExecutionState::new(&plan);
        state.mark_dispatched(StepId(0));
        state.mark_dispatched(StepId(1));

        state.stop("integration timed out before the step started");
        assert_eq!(state.records[0].status, StepStatus::Pending);
        assert_eq!(state.records[1].status, StepStatus::Pending);
        assert_eq!(state.records[2].status, StepStatus::Skipped);

        // A start queued before the stop still counts as in flight.
        let now = Utc::now();
        state.apply(&plan, StepEvent::Started { step: StepId(0), at: now });
        assert_eq!(state.records[0].status, StepStatus::Running);
        assert_eq!(state.records[0].started_at, Some(now));

        state.apply(&plan, StepEvent::Abandoned { step: StepId(1) });
        assert_eq!(state.records[1].status, StepStatus::Skipped);
        assert_eq!(
            state.records[1].last_error.as_deref(),
            Some("integration timed out before the step started")
        );

        // Skipped records never go back to running.
        state.apply(&plan, StepEvent::Started { step: StepId(2), at: now });
        assert_eq!(state.records[2].status, StepStatus::Skipped);
        assert!(state.records[2].started_at.is_none());

        state.force_fail_running("step did not finish within the shutdown grace period");
        assert_eq!(state.records[0].status, StepStatus::Failed);
    }
}
