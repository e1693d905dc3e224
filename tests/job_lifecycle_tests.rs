//! Job lifecycle scenarios driven through the controller.

mod common;

use common::*;
use scanflow_core::models::{
    AllocationStatus, FailureAction, JobSpec, OrchestrationStrategy, ResourceRequirement,
    ResourceType, StepSpec, StepType, WorkflowStep,
};
use scanflow_core::registry::HandlerRegistry;
use scanflow_core::services::NotificationKind;
use scanflow_core::state_machine::{JobState, StepState};
use std::sync::Arc;
use std::time::Duration;

fn step_status(steps: &[WorkflowStep], id: &str) -> StepState {
    steps
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.status)
        .unwrap_or_else(|| panic!("no step {id}"))
}

#[tokio::test]
async fn stop_on_failure_fails_job_and_skips_dependents() {
    let registry = HandlerRegistry::new();
    registry.register_for_step("step_2", Arc::new(FailingHandler { message: "schema mismatch" }));
    let h = harness(fast_config(), registry);

    let mut spec = JobSpec::new("stop", vec!["pg://orders".into()]);
    for step in sequential_steps(3) {
        let step = if step.id == "step_2" {
            step.on_failure(FailureAction::Stop)
        } else {
            step
        };
        spec = spec.with_step(step);
    }

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    let steps = h.controller.get_steps(job_id).unwrap();
    assert_eq!(step_status(&steps, "step_1"), StepState::Completed);
    assert_eq!(step_status(&steps, "step_2"), StepState::Failed);
    assert_eq!(step_status(&steps, "step_3"), StepState::Skipped);
    assert!(job.error_log.iter().any(|e| e.step.as_deref() == Some("step_2")));
    assert!(job.completed_at.is_some());
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::JobFailed).len(), 1);
}

#[tokio::test]
async fn continue_keeps_independent_branches_running() {
    let registry = HandlerRegistry::new();
    registry.register_for_step("enrich", Arc::new(FailingHandler { message: "lookup failed" }));
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("branches", vec!["pg://warehouse".into()])
        .with_failure_threshold(1.0)
        .with_step(StepSpec::new("scan", StepType::Scan))
        .with_step(StepSpec::new("enrich", StepType::Enrichment).depends_on(["scan"]))
        .with_step(StepSpec::new("notify", StepType::Notification).depends_on(["enrich"]))
        .with_step(StepSpec::new("validate", StepType::Validation).depends_on(["scan"]));

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    let steps = h.controller.get_steps(job_id).unwrap();
    assert_eq!(step_status(&steps, "enrich"), StepState::Failed);
    assert_eq!(step_status(&steps, "notify"), StepState::Skipped);
    assert_eq!(step_status(&steps, "validate"), StepState::Completed);
    // A failed step keeps the job from completing even under the threshold
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.results.completed_steps, 2);
}

#[tokio::test]
async fn optional_step_failure_completes_job() {
    let registry = HandlerRegistry::new();
    registry.register_for_step("enrich", Arc::new(FailingHandler { message: "optional" }));
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("optional", vec!["pg://warehouse".into()])
        .with_step(StepSpec::new("scan", StepType::Scan))
        .with_step(
            StepSpec::new("enrich", StepType::Enrichment)
                .depends_on(["scan"])
                .on_failure(FailureAction::Skip),
        )
        .with_step(StepSpec::new("validate", StepType::Validation).depends_on(["scan"]));

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Completed);
    assert_eq!(job.results.skipped_steps, 1);
    assert_eq!(job.results.failed_steps, 0);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let flaky = FlakyHandler::new(2);
    let registry = HandlerRegistry::new();
    registry.register_for_step("scan", flaky.clone());
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("flaky", vec!["pg://warehouse".into()])
        .with_step(StepSpec::new("scan", StepType::Scan).with_retries(3, 0));
    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Completed);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(job.results.retried_attempts, 2);
    let steps = h.controller.get_steps(job_id).unwrap();
    assert_eq!(steps[0].retry_count, 2);
    assert_eq!(steps[0].attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_step() {
    let flaky = FlakyHandler::new(10);
    let registry = HandlerRegistry::new();
    registry.register_for_step("scan", flaky.clone());
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("flaky", vec!["pg://warehouse".into()])
        .with_step(StepSpec::new("scan", StepType::Scan).with_retries(2, 0));
    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test]
async fn dependency_cycle_fails_before_any_step_runs() {
    let h = harness(fast_config(), HandlerRegistry::new());
    let spec = JobSpec::new("cycle", vec!["pg://warehouse".into()])
        .with_step(StepSpec::new("a", StepType::Scan).depends_on(["c"]))
        .with_step(StepSpec::new("b", StepType::Scan).depends_on(["a"]))
        .with_step(StepSpec::new("c", StepType::Scan).depends_on(["b"]));

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert!(job.error_log.iter().any(|e| e.cause == "dependency_cycle"));
    assert!(h.controller.step_start_order(job_id).unwrap().is_empty());
}

#[tokio::test]
async fn steps_start_in_dependency_order() {
    let h = harness(fast_config(), HandlerRegistry::new());
    let spec = JobSpec::new("diamond", vec!["pg://warehouse".into()])
        .with_strategy(OrchestrationStrategy::Parallel)
        .with_step(StepSpec::new("d", StepType::Notification).depends_on(["b", "c"]))
        .with_step(StepSpec::new("b", StepType::Validation).depends_on(["a"]))
        .with_step(StepSpec::new("c", StepType::Enrichment).depends_on(["a"]))
        .with_step(StepSpec::new("a", StepType::Scan));

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();
    assert_eq!(job.status, JobState::Completed);

    let order = h.controller.step_start_order(job_id).unwrap();
    assert_eq!(order.first().map(String::as_str), Some("a"));
    assert_eq!(order.last().map(String::as_str), Some("d"));
    assert!(scanflow_core::orchestration::is_valid_start_order(
        &order,
        &h.controller.get_steps(job_id).unwrap()
    ));
}

#[tokio::test]
async fn panicking_handler_fails_only_its_step() {
    let registry = HandlerRegistry::new();
    registry.register_for_step("bad", Arc::new(PanickingHandler));
    // One CPU unit: "good" can only run if "bad" gave its unit back
    let h = harness(small_pool_config(1.0), registry);

    let spec = JobSpec::new("panic", vec!["pg://warehouse".into()])
        .with_failure_threshold(1.0)
        .with_strategy(OrchestrationStrategy::Sequential)
        .with_step(
            StepSpec::new("bad", StepType::Scan)
                .with_order(0)
                .with_resource(ResourceRequirement::new(ResourceType::Cpu, 1.0)),
        )
        .with_step(
            StepSpec::new("good", StepType::Scan)
                .with_order(1)
                .with_resource(ResourceRequirement::new(ResourceType::Cpu, 1.0)),
        );

    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    let steps = h.controller.get_steps(job_id).unwrap();
    assert_eq!(step_status(&steps, "bad"), StepState::Failed);
    assert_eq!(step_status(&steps, "good"), StepState::Completed);
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(h.ctx.allocator.pool_snapshot("cpu").unwrap().allocated, 0.0);
}

#[tokio::test]
async fn cancelling_a_running_job_releases_its_allocations() {
    let registry = HandlerRegistry::new();
    registry.register_for_type(
        StepType::Scan,
        Arc::new(SlowHandler {
            delay: Duration::from_secs(30),
        }),
    );
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("long", vec!["pg://big".into()])
        .with_resource(ResourceRequirement::new(ResourceType::Cpu, 8.0))
        .with_step(
            StepSpec::new("scan", StepType::Scan)
                .with_resource(ResourceRequirement::new(ResourceType::Memory, 16.0)),
        );
    let job_id = h.controller.submit_job(spec).await.unwrap();
    assert!(wait_for_state(&h.controller, job_id, JobState::Executing).await);

    // Wait for the step to hold its own allocation
    for _ in 0..200 {
        if h.ctx.allocator.allocations_for_job(job_id).len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.ctx.allocator.allocations_for_job(job_id).len(), 2);

    let job = h.controller.cancel_job(job_id).await.unwrap();
    assert_eq!(job.status, JobState::Cancelled);

    assert!(h
        .ctx
        .allocator
        .allocations_for_job(job_id)
        .iter()
        .all(|a| a.status == AllocationStatus::Released));
    assert_eq!(h.ctx.allocator.pool_snapshot("cpu").unwrap().allocated, 0.0);
    assert_eq!(h.ctx.allocator.pool_snapshot("memory").unwrap().allocated, 0.0);

    let steps = h.controller.get_steps(job_id).unwrap();
    assert!(steps.iter().all(|s| s.status.is_terminal()));
    assert!(h.controller.cancel_job(job_id).await.is_err());
}

#[tokio::test]
async fn paused_job_resumes_and_completes() {
    let registry = HandlerRegistry::new();
    registry.register_for_type(
        StepType::Scan,
        Arc::new(SlowHandler {
            delay: Duration::from_millis(50),
        }),
    );
    let h = harness(fast_config(), registry);

    let mut spec = JobSpec::new("pausable", vec!["pg://warehouse".into()]);
    for step in sequential_steps(3) {
        spec = spec.with_step(step);
    }
    let job_id = h.controller.submit_job(spec).await.unwrap();
    assert!(wait_for_state(&h.controller, job_id, JobState::Executing).await);

    h.controller.pause_job(job_id).unwrap();
    assert_eq!(h.controller.get_job_status(job_id).unwrap().status, JobState::Paused);
    let started_at_pause = h.controller.step_start_order(job_id).unwrap().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.controller.step_start_order(job_id).unwrap().len(),
        started_at_pause
    );
    assert!(started_at_pause < 3);

    h.controller.resume_job(job_id).unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();
    assert_eq!(job.status, JobState::Completed);
    assert_eq!(job.results.completed_steps, 3);
}

#[tokio::test]
async fn job_timeout_marks_job_timed_out() {
    let registry = HandlerRegistry::new();
    registry.register_for_type(
        StepType::Scan,
        Arc::new(SlowHandler {
            delay: Duration::from_secs(30),
        }),
    );
    let h = harness(fast_config(), registry);

    let spec = JobSpec::new("slow", vec!["pg://slow".into()]).with_timeout_seconds(1);
    let job_id = h.controller.submit_job(spec).await.unwrap();
    let job = h.controller.wait_for_completion(job_id, wait_timeout()).await.unwrap();

    assert_eq!(job.status, JobState::Timeout);
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::JobTimedOut).len(), 1);
}

#[tokio::test]
async fn invalid_specs_are_rejected_up_front() {
    let h = harness(fast_config(), HandlerRegistry::new());

    let too_wide = JobSpec::new("wide", vec!["pg://a".into()]).with_max_concurrent_scans(10_000);
    assert!(h.controller.create_job(too_wide).await.is_err());

    let unknown_dep = JobSpec::new("dangling", vec!["pg://warehouse".into()])
        .with_step(StepSpec::new("a", StepType::Scan).depends_on(["missing"]));
    assert!(h.controller.create_job(unknown_dep).await.is_err());

    assert!(h.controller.list_jobs().is_empty());
}
