//! Plan execution: strict step order, bounded retry, fail-fast.
//!
//! Every state change is written through to the [`WorkflowStore`] so a
//! running workflow can be observed mid-flight. Step failures are recorded on
//! the step and never returned to the caller. Steps that completed before a
//! failure keep their side effects; nothing is rolled back.
//!
//! Runs happen on their own task. A caller that stops waiting (an HTTP
//! client that disconnects, say) does not stop the run.

mod backoff;

pub use backoff::{Backoff, RetryPolicy};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::store::{WorkflowStore, WriterLease};
use super::types::{Plan, Step, StepStatus, WorkflowRecord};
use crate::core::adapters::{AdapterError, AdapterRegistry};
use crate::core::connections::ConnectionRegistry;
use crate::core::error::EngineError;

#[derive(Clone)]
pub struct PlanExecutor {
    adapters: Arc<AdapterRegistry>,
    connections: Arc<ConnectionRegistry>,
    store: Arc<WorkflowStore>,
    policy: RetryPolicy,
}

impl PlanExecutor {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        connections: Arc<ConnectionRegistry>,
        store: Arc<WorkflowStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            adapters,
            connections,
            store,
            policy,
        }
    }

    /// Create a record for `plan` and run it to a terminal state. Only store
    /// failures are returned as errors.
    pub async fn execute(&self, plan: Plan, user_id: &str) -> Result<WorkflowRecord, EngineError> {
        let record = WorkflowRecord::from_plan(plan, user_id);
        let lease = self.store.create(record.clone())?;
        info!(
            workflow_id = %record.id,
            user_id = %user_id,
            steps = record.steps().len(),
            "Workflow created"
        );
        self.run_detached(record, lease).await
    }

    /// Re-run a `failed` or `partial` workflow under the same id.
    ///
    /// Completed steps are skipped and keep their output; failed and skipped
    /// steps run again from the first one. This assumes adapter actions are
    /// idempotent, or that issuing one twice is acceptable: a step that timed
    /// out may have taken effect remotely and will be sent again.
    ///
    /// Rejected with `InvalidRetryState`, without touching the record, when
    /// the workflow is completed or still has a writer.
    pub async fn retry(&self, workflow_id: &str) -> Result<WorkflowRecord, EngineError> {
        let (mut record, lease) = self.store.claim_for_retry(workflow_id)?;
        record.begin_retry();
        info!(
            workflow_id = %record.id,
            retry_count = record.retry_count(),
            pending = record.steps().len() - record.completed_steps(),
            "Retrying workflow"
        );
        self.run_detached(record, lease).await
    }

    /// Drive `run` on a spawned task that owns the lease. The lease is
    /// released before the result is handed back, so the record is
    /// retryable as soon as the caller sees it.
    async fn run_detached(
        &self,
        record: WorkflowRecord,
        lease: WriterLease,
    ) -> Result<WorkflowRecord, EngineError> {
        let (done_tx, done_rx) = oneshot::channel();
        let workflow_id = record.id.clone();
        let executor = self.clone();

        tokio::spawn(async move {
            let outcome = executor.run(record, &lease).await;
            drop(lease);
            let _ = done_tx.send(outcome);
        });

        done_rx.await.map_err(|_| {
            EngineError::Store(format!(
                "runner for workflow {} stopped unexpectedly",
                workflow_id
            ))
        })?
    }

    /// A persist failure stops the loop: the run can no longer write, so its
    /// record would disagree with the stored one.
    async fn run(
        &self,
        mut record: WorkflowRecord,
        lease: &WriterLease,
    ) -> Result<WorkflowRecord, EngineError> {
        let user_id = record.user_id.clone();
        let workflow_id = record.id.clone();

        for index in 0..record.steps().len() {
            let Some(step) = record.step_mut(index) else {
                break;
            };
            if step.status() == StepStatus::Completed {
                continue;
            }
            step.mark_running();
            let step = step.clone();
            record.refresh_status();
            self.persist(lease, &record)?;

            let (outcome, attempts) = self.run_step(&step, &user_id, &workflow_id).await;

            let failed = outcome.is_err();
            if let Some(slot) = record.step_mut(index) {
                slot.add_attempts(attempts);
                match outcome {
                    Ok(output) => slot.complete(output),
                    Err(err) => {
                        warn!(
                            workflow_id = %workflow_id,
                            step = index,
                            service = %step.service_type(),
                            action = %step.action(),
                            kind = err.kind(),
                            "Step failed: {}",
                            err
                        );
                        slot.fail(err.body());
                    }
                }
            }

            if failed {
                for later in index + 1..record.steps().len() {
                    if let Some(rest) = record.step_mut(later)
                        && rest.status() != StepStatus::Completed
                    {
                        rest.skip();
                    }
                }
            }
            record.refresh_status();
            self.persist(lease, &record)?;
            if failed {
                break;
            }
        }

        info!(
            workflow_id = %record.id,
            status = record.status().as_str(),
            completed = record.completed_steps(),
            steps = record.steps().len(),
            "Workflow finished"
        );
        Ok(record)
    }

    /// One step with its retry loop. The connection is captured once, so a
    /// reconnect during the backoff does not change the credentials used.
    async fn run_step(
        &self,
        step: &Step,
        user_id: &str,
        workflow_id: &str,
    ) -> (Result<Value, EngineError>, u32) {
        let snapshot = match self.connections.snapshot(user_id, step.service_type()).await {
            Ok(s) => s,
            Err(e) => return (Err(e), 0),
        };
        let adapter = match self.adapters.resolve(snapshot) {
            Ok(a) => a,
            Err(e) => return (Err(e.into()), 0),
        };

        let timeout = self.adapters.timeout();
        let mut backoff = Backoff::new(self.policy);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, adapter.execute(step)).await {
                Ok(r) => r,
                Err(_) => Err(AdapterError::transient(format!(
                    "{} timed out after {}ms",
                    step.label(),
                    timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(output) => return (Ok(output), attempts),
                Err(e) if e.is_transient() => e,
                Err(e) => return (Err(e.into()), attempts),
            };

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        workflow_id = %workflow_id,
                        step = %step.label(),
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "Transient step failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return (
                        Err(EngineError::AdapterTransient(format!(
                            "{} (gave up after {} attempt(s))",
                            err.message, attempts
                        ))),
                        attempts,
                    );
                }
            }
        }
    }

    fn persist(&self, lease: &WriterLease, record: &WorkflowRecord) -> Result<(), EngineError> {
        self.store.update(lease, record).inspect_err(|e| {
            error!(
                workflow_id = %record.id,
                "Failed to persist workflow progress, stopping run: {}",
                e
            );
        })
    }
}
