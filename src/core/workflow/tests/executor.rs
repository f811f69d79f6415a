use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use super::{Harness, Reply, tagged_plan};
use crate::core::error::EngineError;
use crate::core::services::ServiceType;
use crate::core::workflow::{Plan, RetryPolicy, Step, StepStatus, WorkflowStatus};

const USER: &str = "alice";

fn statuses(record: &crate::core::workflow::WorkflowRecord) -> Vec<StepStatus> {
    record.steps().iter().map(|s| s.status()).collect()
}

#[tokio::test]
async fn single_step_create_issue_completes() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    h.script
        .push(Reply::Ok(json!({ "number": 7, "title": "X" })));

    let mut params = serde_json::Map::new();
    params.insert("title".into(), json!("X"));
    let plan = Plan {
        title: "Create issue".into(),
        steps: vec![Step::new(ServiceType::Github, "create_issue", params)],
    };
    let record = h.executor.execute(plan, USER).await.unwrap();

    assert_eq!(record.steps().len(), 1);
    assert_eq!(record.steps()[0].status(), StepStatus::Completed);
    assert_eq!(record.steps()[0].result(), Some(&json!({ "number": 7, "title": "X" })));
    assert_eq!(record.steps()[0].attempts(), 1);
    assert_eq!(record.status(), WorkflowStatus::Completed);
    assert_eq!(h.store.get(&record.id).unwrap(), record);
}

#[tokio::test]
async fn permanent_failure_mid_plan_is_partial_and_skips_the_rest() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    h.connect(USER, ServiceType::Slack).await;
    h.script.push(Reply::Ok(json!({ "number": 1 })));
    h.script.push(Reply::Permanent("HTTP 403"));

    let plan = tagged_plan(&[
        (ServiceType::Github, "create_issue"),
        (ServiceType::Slack, "send_message"),
        (ServiceType::Github, "create_branch"),
    ]);
    let record = h.executor.execute(plan, USER).await.unwrap();

    assert_eq!(record.status(), WorkflowStatus::Partial);
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Completed, StepStatus::Failed, StepStatus::Skipped]
    );
    let err = record.steps()[1].error().unwrap();
    assert_eq!(err.kind, "adapter_permanent_error");
    assert!(err.detail.contains("403"));
    assert_eq!(record.steps()[1].attempts(), 1);
    assert_eq!(h.script.calls(), vec!["s1", "s2"]);
}

#[tokio::test]
async fn first_step_failure_is_failed_not_partial() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Jira).await;
    h.script.push(Reply::Permanent("HTTP 400"));

    let plan = tagged_plan(&[
        (ServiceType::Jira, "create_issue"),
        (ServiceType::Jira, "list_projects"),
    ]);
    let record = h.executor.execute(plan, USER).await.unwrap();

    assert_eq!(record.status(), WorkflowStatus::Failed);
    assert_eq!(statuses(&record), vec![StepStatus::Failed, StepStatus::Skipped]);
    assert_eq!(h.script.calls(), vec!["s1"]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_with_backoff() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Jenkins).await;
    h.script.push(Reply::Transient("HTTP 503"));
    h.script.push(Reply::Transient("HTTP 502"));

    let started = tokio::time::Instant::now();
    let record = h
        .executor
        .execute(tagged_plan(&[(ServiceType::Jenkins, "trigger_build")]), USER)
        .await
        .unwrap();

    assert_eq!(record.status(), WorkflowStatus::Completed);
    assert_eq!(record.steps()[0].attempts(), 3);
    // 100ms then 200ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn exhausted_transient_budget_fails_the_step() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Slack).await;
    for _ in 0..3 {
        h.script.push(Reply::Transient("HTTP 500"));
    }

    let record = h
        .executor
        .execute(
            tagged_plan(&[
                (ServiceType::Slack, "send_message"),
                (ServiceType::Slack, "list_channels"),
            ]),
            USER,
        )
        .await
        .unwrap();

    assert_eq!(record.status(), WorkflowStatus::Failed);
    let step = &record.steps()[0];
    assert_eq!(step.attempts(), 3);
    let err = step.error().unwrap();
    assert_eq!(err.kind, "adapter_transient_error");
    assert!(err.detail.contains("3 attempt"));
    assert_eq!(record.steps()[1].status(), StepStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn hung_call_is_cut_by_timeout_and_retried() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    h.script.push(Reply::Hang);

    let started = tokio::time::Instant::now();
    let record = h
        .executor
        .execute(tagged_plan(&[(ServiceType::Github, "list_repos")]), USER)
        .await
        .unwrap();

    assert_eq!(record.status(), WorkflowStatus::Completed);
    assert_eq!(record.steps()[0].attempts(), 2);
    assert!(started.elapsed() >= super::ADAPTER_TIMEOUT);
}

#[tokio::test]
async fn zero_retry_policy_fails_on_first_transient_error() {
    let h = Harness::with_policy(RetryPolicy {
        max_attempts: 1,
        ..Default::default()
    });
    h.connect(USER, ServiceType::Github).await;
    h.script.push(Reply::Transient("HTTP 502"));

    let record = h
        .executor
        .execute(tagged_plan(&[(ServiceType::Github, "list_repos")]), USER)
        .await
        .unwrap();
    assert_eq!(record.status(), WorkflowStatus::Failed);
    assert_eq!(record.steps()[0].attempts(), 1);
}

#[tokio::test]
async fn disconnected_service_fails_the_step_without_calling_out() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;

    let plan = tagged_plan(&[
        (ServiceType::Github, "list_repos"),
        (ServiceType::Slack, "send_message"),
    ]);
    let record = h.executor.execute(plan, USER).await.unwrap();

    assert_eq!(record.status(), WorkflowStatus::Partial);
    let step = &record.steps()[1];
    assert_eq!(step.error().unwrap().kind, "service_not_connected");
    assert_eq!(step.attempts(), 0);
    assert_eq!(h.script.calls(), vec!["s1"]);
}

#[tokio::test]
async fn retry_reruns_only_unfinished_steps() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    h.connect(USER, ServiceType::Slack).await;
    h.script.push(Reply::Ok(json!({ "number": 11 })));
    h.script.push(Reply::Permanent("HTTP 404"));

    let plan = tagged_plan(&[
        (ServiceType::Github, "create_issue"),
        (ServiceType::Slack, "send_message"),
        (ServiceType::Github, "create_branch"),
    ]);
    let first = h.executor.execute(plan, USER).await.unwrap();
    assert_eq!(first.status(), WorkflowStatus::Partial);

    let retried = h.executor.retry(&first.id).await.unwrap();
    assert_eq!(retried.id, first.id);
    assert_eq!(retried.retry_count(), 1);
    assert_eq!(retried.status(), WorkflowStatus::Completed);
    assert_eq!(
        statuses(&retried),
        vec![StepStatus::Completed; 3]
    );
    // The completed step kept its output and was not called again.
    assert_eq!(retried.steps()[0].result(), Some(&json!({ "number": 11 })));
    assert_eq!(retried.steps()[0].attempts(), 1);
    assert_eq!(h.script.calls(), vec!["s1", "s2", "s2", "s3"]);
    assert_eq!(h.store.get(&first.id).unwrap(), retried);
}

#[tokio::test]
async fn retry_of_completed_workflow_is_rejected_unchanged() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    let record = h
        .executor
        .execute(tagged_plan(&[(ServiceType::Github, "list_repos")]), USER)
        .await
        .unwrap();
    assert_eq!(record.status(), WorkflowStatus::Completed);

    let err = h.executor.retry(&record.id).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_retry_state");
    assert_eq!(h.store.get(&record.id).unwrap(), record);
    assert_eq!(h.script.calls().len(), 1);
}

#[tokio::test]
async fn retry_of_unknown_workflow_is_not_found() {
    let h = Harness::new();
    assert_eq!(
        h.executor.retry("nope").await.unwrap_err(),
        EngineError::WorkflowNotFound("nope".into())
    );
}

#[tokio::test]
async fn progress_is_visible_mid_flight_and_retry_is_rejected_while_running() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    let gate = Arc::new(Notify::new());
    h.script.push(Reply::Ok(json!({ "first": true })));
    h.script.push(Reply::Gate(gate.clone()));

    let executor = h.executor.clone();
    let run = tokio::spawn(async move {
        executor
            .execute(
                tagged_plan(&[
                    (ServiceType::Github, "create_issue"),
                    (ServiceType::Github, "create_branch"),
                ]),
                USER,
            )
            .await
    });

    for _ in 0..200 {
        if h.script.calls().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let live = h.store.list(USER).unwrap().remove(0);
    assert_eq!(live.status(), WorkflowStatus::Running);
    assert_eq!(
        statuses(&live),
        vec![StepStatus::Completed, StepStatus::Running]
    );

    let err = h.executor.retry(&live.id).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_retry_state");

    gate.notify_one();
    let finished = run.await.unwrap().unwrap();
    assert_eq!(finished.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn disconnect_mid_step_does_not_affect_the_captured_connection() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Slack).await;
    let gate = Arc::new(Notify::new());
    h.script.push(Reply::Gate(gate.clone()));

    let executor = h.executor.clone();
    let run = tokio::spawn(async move {
        executor
            .execute(tagged_plan(&[(ServiceType::Slack, "send_message")]), USER)
            .await
    });
    for _ in 0..200 {
        if !h.script.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.connections
        .disconnect(USER, ServiceType::Slack)
        .await
        .unwrap();
    gate.notify_one();

    let record = run.await.unwrap().unwrap();
    assert_eq!(record.status(), WorkflowStatus::Completed);
}

async fn wait_for_calls(h: &Harness, n: usize) {
    for _ in 0..200 {
        if h.script.calls().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn run_finishes_after_the_caller_stops_waiting() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Github).await;
    let gate = Arc::new(Notify::new());
    h.script.push(Reply::Ok(json!({ "first": true })));
    h.script.push(Reply::Gate(gate.clone()));

    let plan = tagged_plan(&[
        (ServiceType::Github, "create_issue"),
        (ServiceType::Github, "create_branch"),
    ]);
    let waited = tokio::time::timeout(
        Duration::from_millis(200),
        h.executor.execute(plan, USER),
    )
    .await;
    assert!(waited.is_err(), "the gated step should still be running");

    let live = h.store.list(USER).unwrap().remove(0);
    assert_eq!(live.status(), WorkflowStatus::Running);
    assert_eq!(
        statuses(&live),
        vec![StepStatus::Completed, StepStatus::Running]
    );

    gate.notify_one();
    let mut finished = h.store.get(&live.id).unwrap();
    for _ in 0..200 {
        if finished.status() != WorkflowStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        finished = h.store.get(&live.id).unwrap();
    }
    assert_eq!(finished.status(), WorkflowStatus::Completed);
    assert_eq!(statuses(&finished), vec![StepStatus::Completed; 2]);
    assert_eq!(h.script.calls(), vec!["s1", "s2"]);
}

#[tokio::test]
async fn lost_writer_stops_the_run_and_leaves_a_retryable_record() {
    let h = Harness::new();
    h.connect(USER, ServiceType::Slack).await;
    let gate = Arc::new(Notify::new());
    h.script.push(Reply::Gate(gate.clone()));

    let executor = h.executor.clone();
    let run = tokio::spawn(async move {
        executor
            .execute(
                tagged_plan(&[
                    (ServiceType::Slack, "send_message"),
                    (ServiceType::Slack, "list_channels"),
                ]),
                USER,
            )
            .await
    });
    wait_for_calls(&h, 1).await;

    let id = h.store.list(USER).unwrap().remove(0).id;
    h.store.revoke_writer(&id);
    gate.notify_one();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "store_error");
    // Only the first step was ever dispatched.
    assert_eq!(h.script.calls(), vec!["s1"]);

    let stored = h.store.get(&id).unwrap();
    assert_eq!(stored.status(), WorkflowStatus::Failed);
    assert_eq!(stored.steps()[0].error().unwrap().kind, "step_interrupted");
    assert_eq!(stored.steps()[1].status(), StepStatus::Skipped);

    let retried = h.executor.retry(&id).await.unwrap();
    assert_eq!(retried.status(), WorkflowStatus::Completed);
}
