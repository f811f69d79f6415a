mod executor;
mod store;
pub mod types;

pub use executor::{Backoff, PlanExecutor, RetryPolicy};
pub use store::{WorkflowStore, WriterLease};
pub use types::{Plan, Step, StepStatus, WorkflowRecord, WorkflowStatus, WorkflowSummary};

pub fn can_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    if from == to {
        return true;
    }
    match from {
        WorkflowStatus::Pending => matches!(to, WorkflowStatus::Running),
        WorkflowStatus::Running => matches!(
            to,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Partial
        ),
        WorkflowStatus::Failed | WorkflowStatus::Partial => matches!(to, WorkflowStatus::Running),
        WorkflowStatus::Completed => false,
    }
}

/// Workflow status as a pure function of step statuses.
///
/// A failed step makes the run `partial` when anything before it completed,
/// otherwise `failed`. With no failure, all-completed is `completed`,
/// all-pending is `pending`, and anything else is still `running`.
pub fn derive_status(steps: &[Step]) -> WorkflowStatus {
    let failed = steps.iter().any(|s| s.status() == StepStatus::Failed);
    let completed = steps
        .iter()
        .filter(|s| s.status() == StepStatus::Completed)
        .count();

    if failed {
        return if completed > 0 {
            WorkflowStatus::Partial
        } else {
            WorkflowStatus::Failed
        };
    }
    if completed == steps.len() {
        return WorkflowStatus::Completed;
    }
    if steps.iter().all(|s| s.status() == StepStatus::Pending) {
        return WorkflowStatus::Pending;
    }
    WorkflowStatus::Running
}

#[cfg(test)]
mod tests;
