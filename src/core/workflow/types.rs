use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::ErrorBody;
use crate::core::services::ServiceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Partial => "partial",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Partial
        )
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, WorkflowStatus::Failed | WorkflowStatus::Partial)
    }
}

/// One action against one service. The target and parameters are fixed at
/// compile time; only the executor moves status, result and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    service_type: ServiceType,
    action: String,
    parameters: serde_json::Map<String, serde_json::Value>,
    status: StepStatus,
    result: Option<serde_json::Value>,
    error: Option<ErrorBody>,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        service_type: ServiceType,
        action: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            service_type,
            action: action.into(),
            parameters,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.parameters
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorBody> {
        self.error.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.service_type, self.action)
    }

    pub(in crate::core::workflow) fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.error = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub(in crate::core::workflow) fn add_attempts(&mut self, n: u32) {
        self.attempts += n;
    }

    pub(in crate::core::workflow) fn complete(&mut self, output: serde_json::Value) {
        self.status = StepStatus::Completed;
        self.result = Some(output);
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub(in crate::core::workflow) fn fail(&mut self, error: ErrorBody) {
        self.status = StepStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(in crate::core::workflow) fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.finished_at = None;
        self.started_at = None;
    }

    /// Back to pending for a retry run. Completed steps never reach here.
    pub(in crate::core::workflow) fn reset_for_retry(&mut self) {
        debug_assert_ne!(self.status, StepStatus::Completed);
        self.status = StepStatus::Pending;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }
}

/// Compiled, not yet executed. Consumed once by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub title: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub title: String,
    pub user_id: String,
    steps: Vec<Step>,
    status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    retry_count: u32,
}

impl WorkflowRecord {
    pub fn from_plan(plan: Plan, user_id: &str) -> Self {
        let now = Utc::now();
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: plan.title,
            user_id: user_id.to_string(),
            steps: plan.steps,
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
        };
        record.refresh_status();
        record
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            step_count: self.steps.len(),
            completed_steps: self.completed_steps(),
            retry_count: self.retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(in crate::core::workflow) fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    pub(in crate::core::workflow) fn begin_retry(&mut self) {
        self.retry_count += 1;
        for step in self.steps.iter_mut() {
            if step.status != StepStatus::Completed {
                step.reset_for_retry();
            }
        }
    }

    /// Settle a run that stopped without finishing: the first unfinished
    /// step fails with `error` and every later unfinished step is skipped.
    pub(in crate::core::workflow) fn interrupt(&mut self, error: ErrorBody) {
        let mut failed = false;
        for step in self.steps.iter_mut() {
            if step.status == StepStatus::Completed {
                continue;
            }
            if failed {
                step.skip();
            } else {
                step.fail(error.clone());
                failed = true;
            }
        }
        self.refresh_status();
    }

    /// Re-derive `status` from the steps. The only place status changes.
    pub(in crate::core::workflow) fn refresh_status(&mut self) {
        self.status = super::derive_status(&self.steps);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub title: String,
    pub status: WorkflowStatus,
    pub step_count: usize,
    pub completed_steps: usize,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
