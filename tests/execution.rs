mod common;

use capability_mesh::executor::{step_fn, PlanExecutor, PlanOutcome, RetryPolicy, StepContext, StepStatus};
use capability_mesh::manifest::CapabilityManifest;
use capability_mesh::plan::{AdaptationStep, IntegrationPlan, StepId};
use capability_mesh::Error;
use common::manifest;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn step(id: usize, name: &str) -> AdaptationStep {
    AdaptationStep::new(StepId(id), Arc::new(manifest("mod", name, "1.0.0")))
}

fn executor() -> PlanExecutor {
    PlanExecutor::new(RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(100)))
        .with_shutdown_grace(Duration::from_millis(100))
}

/// A depends on B, B depends on C.
fn chain_plan() -> IntegrationPlan {
    let c = step(0, "cap.c");
    let b = step(1, "cap.b").with_dependencies(vec![StepId(0)]);
    let a = step(2, "cap.a").with_dependencies(vec![StepId(1)]);
    IntegrationPlan::from_steps("cap.a", vec![c, b, a], StepId(2)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_failed_leaf_skips_its_dependents() {
    common::init_tracing();
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = calls.clone();
    let runner = step_fn(move |ctx: StepContext| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(ctx.capability().to_string());
            if ctx.capability() == "cap.c" {
                anyhow::bail!("upstream exploded");
            }
            Ok(json!("ok"))
        }
    });

    let plan = chain_plan();
    let report = executor().execute(&plan, runner).await;

    assert_eq!(report.outcome, PlanOutcome::Failed);
    assert_eq!(report.status_of(StepId(0)), Some(StepStatus::Failed));
    assert_eq!(report.status_of(StepId(1)), Some(StepStatus::Skipped));
    assert_eq!(report.status_of(StepId(2)), Some(StepStatus::Skipped));
    assert_eq!(report.record(StepId(0)).unwrap().attempts, 3);
    assert_eq!(*calls.lock().unwrap(), vec!["cap.c"; 3]);
    assert!(report.output().is_none());

    let err = report.ensure_success(plan.timeout).unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_success_is_degraded() {
    let primary = Arc::new(manifest("flaky", "ocr.extract", "1.1.0"));
    let backup = Arc::new(manifest("steady", "ocr.extract", "1.0.0"));
    let backup_id = backup.id();
    let root = AdaptationStep::new(StepId(0), primary).with_fallbacks(vec![backup]);
    let plan = IntegrationPlan::from_steps("ocr.extract", vec![root], StepId(0)).unwrap();

    let runner = step_fn(|ctx: StepContext| async move {
        match ctx.fallback {
            None => anyhow::bail!("{} is down", ctx.manifest.module_id()),
            Some(_) => Ok(json!({ "text": "from backup" })),
        }
    });

    let report = executor().execute(&plan, runner.clone()).await;
    assert_eq!(report.outcome, PlanOutcome::Degraded);
    let record = report.record(StepId(0)).unwrap();
    assert_eq!(record.status, StepStatus::Succeeded);
    assert_eq!(record.fallback_used, Some(backup_id));
    assert_eq!(record.attempts, 4);
    assert!(report.ensure_success(plan.timeout).is_ok());

    let without = executor().with_fallbacks(false).execute(&plan, runner).await;
    assert_eq!(without.outcome, PlanOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_skips_unstarted_and_fails_stuck_steps() {
    let slow = step(0, "cap.slow");
    let polite = step(1, "cap.polite");
    let after = step(2, "cap.after").with_dependencies(vec![StepId(0), StepId(1)]);
    let plan = IntegrationPlan::from_steps("cap.after", vec![slow, polite, after], StepId(2))
        .unwrap()
        .with_timeout(Duration::from_secs(1));

    let runner = step_fn(|ctx: StepContext| async move {
        match ctx.capability() {
            // Ignores cancellation entirely.
            "cap.slow" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
            "cap.polite" => {
                ctx.cancel.cancelled().await;
                anyhow::bail!("stopped on request")
            }
            _ => Ok(Value::Null),
        }
    });

    let report = executor().execute(&plan, runner).await;
    assert!(report.timed_out);
    assert!(!report.cancelled);
    assert_eq!(report.outcome, PlanOutcome::Failed);

    let slow = report.record(StepId(0)).unwrap();
    assert_eq!(slow.status, StepStatus::Failed);
    assert!(slow.last_error.as_deref().unwrap().contains("shutdown grace"));

    let polite = report.record(StepId(1)).unwrap();
    assert_eq!(polite.status, StepStatus::Failed);
    assert!(polite.last_error.as_deref().unwrap().contains("stopped on request"));

    assert_eq!(report.status_of(StepId(2)), Some(StepStatus::Skipped));
    assert!(report.elapsed < Duration::from_secs(2));

    let err = report.ensure_success(plan.timeout).unwrap_err();
    assert!(matches!(err, Error::ExecutionTimeout { timeout_ms: 1000 }));
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let plan = chain_plan().with_timeout(Duration::from_secs(60));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let runner = step_fn(|ctx: StepContext| async move {
        tokio::select! {
            _ = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(Value::Null),
        }
    });

    let report = executor().execute_with_cancel(&plan, runner, cancel).await;
    assert!(report.cancelled);
    assert!(!report.timed_out);
    assert_eq!(report.status_of(StepId(0)), Some(StepStatus::Failed));
    assert_eq!(report.count(StepStatus::Skipped), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let mut steps: Vec<AdaptationStep> = (0..6).map(|i| step(i, &format!("leaf.{i}"))).collect();
    steps.push(step(6, "root").with_dependencies((0..6).map(StepId).collect()));
    let plan = IntegrationPlan::from_steps("root", steps, StepId(6))
        .unwrap()
        .with_max_concurrent(2);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    let runner = step_fn(move |ctx: StepContext| {
        let (running, peak) = (r.clone(), p.clone());
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(ctx.inputs.len()))
        }
    });

    let report = executor().execute(&plan, runner).await;
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(report.output(), Some(&json!(6)));
}

#[tokio::test]
async fn test_merged_step_sees_members() {
    let a = Arc::new(manifest("maps", "geo.lookup", "1.0.0"));
    let b = Arc::new(manifest("places", "geo.lookup", "1.0.0"));
    let composite: Arc<CapabilityManifest> = Arc::new(manifest("merged:maps+places", "geo.lookup", "1.0.0"));
    let mut root = AdaptationStep::new(StepId(0), composite);
    root.members = vec![a, b];
    let plan = IntegrationPlan::from_steps("geo.lookup", vec![root], StepId(0)).unwrap();

    let runner = step_fn(|ctx: StepContext| async move { Ok(json!(ctx.members.len())) });
    let report = PlanExecutor::default().execute(&plan, runner).await;
    assert_eq!(report.output(), Some(&json!(2)));
}
