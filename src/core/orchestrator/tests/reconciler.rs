use super::{Harness, script};
use crate::core::backend::RunnerPod;
use crate::core::orchestrator::{RunOutcome, RunStatus, StepStatus};
use crate::core::store::RunStore;

async fn started(h: &Harness, steps: &[&str]) -> RunOutcome {
    for name in steps {
        h.step(name, script("x")).await;
    }
    h.coordinator.start_run(h.organizer_request()).await.unwrap()
}

fn pod(name: &str, phase: &str) -> RunnerPod {
    RunnerPod {
        name: name.to_string(),
        phase: phase.to_string(),
    }
}

#[tokio::test]
async fn finished_steps_complete_and_collect_logs() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    let handle = &outcome.submitted[0];
    h.backend.set_stage(handle, "finished");
    h.backend.set_pods(handle, vec![pod("login-pod-1", "Succeeded")]);
    h.backend.set_pod_logs("login-pod-1", "checks.........: 100.00%");

    let summary = h.reconciler.sweep().await.unwrap();
    assert_eq!(summary.total_steps, 1);
    assert_eq!(summary.updated_steps, 1);
    assert_eq!(summary.error_steps, 0);
    assert_eq!(summary.updated_runs, 1);

    let step = &h.store.run_steps(&outcome.run.id).await.unwrap()[0];
    assert_eq!(step.status, StepStatus::Completed);
    assert!(step.completed_at.is_some());
    assert!(
        step.container_logs
            .as_deref()
            .unwrap()
            .contains("=== Container: login-pod-1 ===")
    );

    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn finished_with_failed_replica_is_a_failure() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    let handle = &outcome.submitted[0];
    h.backend.set_stage(handle, "finished");
    h.backend.set_pods(
        handle,
        vec![pod("login-pod-1", "Succeeded"), pod("login-pod-2", "Failed")],
    );

    h.reconciler.sweep().await.unwrap();

    let step = &h.store.run_steps(&outcome.run.id).await.unwrap()[0];
    assert_eq!(step.status, StepStatus::Failed);
    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn vanished_execution_is_marked_deleted() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    h.backend.forget_run(&outcome.submitted[0]);

    let summary = h.reconciler.sweep().await.unwrap();
    assert_eq!(summary.results[0].status, StepStatus::Deleted);

    let step = &h.store.run_steps(&outcome.run.id).await.unwrap()[0];
    assert_eq!(step.status, StepStatus::Deleted);
    assert!(step.completed_at.is_some());
}

#[tokio::test]
async fn unreachable_backend_leaves_steps_untouched() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login", "search"]).await;
    h.backend.set_unavailable(true);

    let summary = h.reconciler.sweep().await.unwrap();
    assert_eq!(summary.total_steps, 2);
    assert_eq!(summary.error_steps, 2);
    assert_eq!(summary.updated_steps, 0);

    for step in h.store.run_steps(&outcome.run.id).await.unwrap() {
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.last_status_check.is_none());
    }
    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
}

#[tokio::test]
async fn running_step_does_not_regress_to_pending() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    h.backend.set_stage(&outcome.submitted[0], "initialization");

    let summary = h.reconciler.sweep().await.unwrap();
    assert!(!summary.results[0].updated);

    let step = &h.store.run_steps(&outcome.run.id).await.unwrap()[0];
    assert_eq!(step.status, StepStatus::Running);
    assert!(step.last_status_check.is_some());
}

#[tokio::test]
async fn run_stays_running_until_every_step_is_terminal() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login", "search"]).await;
    h.backend.set_stage(&outcome.submitted[0], "finished");
    h.backend.set_stage(&outcome.submitted[1], "started");

    h.reconciler.sweep().await.unwrap();
    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);

    h.backend.set_stage(&outcome.submitted[1], "stopped");
    h.reconciler.sweep().await.unwrap();
    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);

    let steps = h.store.run_steps(&outcome.run.id).await.unwrap();
    assert_eq!(steps[1].status, StepStatus::Cancelled);
}

#[tokio::test]
async fn steps_failed_at_start_count_in_roll_up() {
    let h = Harness::new().await;
    h.step("login", script("a")).await;
    h.step("broken", script("b")).await;
    h.backend.fail_runs_containing("broken");
    let outcome = h.coordinator.start_run(h.organizer_request()).await.unwrap();
    h.backend.set_stage(&outcome.submitted[0], "finished");

    let summary = h.reconciler.sweep().await.unwrap();
    assert_eq!(summary.total_steps, 1);
    let run = h.store.get_run(&outcome.run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn terminal_steps_without_logs_are_backfilled() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    let handle = outcome.submitted[0].clone();
    h.backend.set_stage(&handle, "finished");
    h.backend.set_pods(&handle, vec![pod("login-pod-1", "Succeeded")]);

    h.reconciler.sweep().await.unwrap();
    let step = &h.store.run_steps(&outcome.run.id).await.unwrap()[0];
    assert_eq!(step.status, StepStatus::Completed);
    assert!(step.container_logs.as_deref().unwrap().contains("(ERROR)"));

    let summary = h.reconciler.sweep().await.unwrap();
    assert_eq!(summary.total_steps, 0);
}

#[tokio::test]
async fn step_details_refresh_logs_while_active() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login"]).await;
    let handle = &outcome.submitted[0];
    h.backend.set_pods(handle, vec![pod("login-pod-1", "Running")]);
    h.backend.set_pod_logs("login-pod-1", "running iteration 42");

    let step_id = h.store.run_steps(&outcome.run.id).await.unwrap()[0].id.clone();
    let step = h.reconciler.step_details(&step_id, Some(50)).await.unwrap();
    assert!(
        step.container_logs
            .as_deref()
            .unwrap()
            .contains("running iteration 42")
    );
    assert_eq!(step.status, StepStatus::Running);

    assert!(h.reconciler.step_details("missing", None).await.is_err());
}

#[tokio::test]
async fn cleanup_removes_runs_then_configs() {
    let h = Harness::new().await;
    let outcome = started(&h, &["login", "search"]).await;
    h.backend.forget_run(&outcome.submitted[1]);

    let report = h.reconciler.cleanup_run(&outcome.run.id).await.unwrap();
    assert!(report.failures.is_empty());
    let mut expected = outcome.submitted.clone();
    expected.sort();
    assert_eq!(report.deleted, expected);
    assert!(h.backend.run_names().is_empty());
    for handle in &outcome.submitted {
        assert!(h.backend.config(&format!("{}-config", handle)).is_none());
    }

    let calls = h.backend.calls();
    let first = &outcome.submitted[0];
    let run_pos = calls
        .iter()
        .position(|c| c == &format!("delete_run:{}", first))
        .unwrap();
    let config_pos = calls
        .iter()
        .position(|c| c == &format!("delete_config:{}-config", first))
        .unwrap();
    assert!(run_pos < config_pos);
}

#[tokio::test]
async fn cleanup_of_unknown_run_is_not_found() {
    let h = Harness::new().await;
    assert!(h.reconciler.cleanup_run("missing").await.is_err());
}
