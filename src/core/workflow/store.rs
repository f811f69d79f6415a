use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::can_transition;
use super::types::{WorkflowRecord, WorkflowStatus};
use crate::core::error::EngineError;

#[derive(Default)]
struct StoreInner {
    records: HashMap<String, WorkflowRecord>,
    /// Insertion order, oldest first.
    order: Vec<String>,
    /// Ids with a live writer, and that writer's lease token.
    writers: HashMap<String, u64>,
    next_token: u64,
}

impl StoreInner {
    fn grant(&mut self, id: &str) -> u64 {
        self.next_token += 1;
        self.writers.insert(id.to_string(), self.next_token);
        self.next_token
    }
}

/// Process-scoped, in-memory workflow records. Nothing is persisted and
/// nothing is evicted; records live as long as the process.
///
/// Writes go through a [`WriterLease`]. At most one lease exists per id, so
/// an in-flight run and a retry can never both write the same record.
#[derive(Default)]
pub struct WorkflowStore {
    inner: RwLock<StoreInner>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Store(e.to_string())
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record and hand the caller its writer lease.
    pub fn create(self: &Arc<Self>, record: WorkflowRecord) -> Result<WriterLease, EngineError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.records.contains_key(&record.id) {
            return Err(EngineError::Store(format!(
                "workflow {} already exists",
                record.id
            )));
        }
        let id = record.id.clone();
        inner.order.push(id.clone());
        inner.records.insert(id.clone(), record);
        let token = inner.grant(&id);
        Ok(WriterLease {
            store: Arc::clone(self),
            id,
            token,
        })
    }

    pub fn get(&self, id: &str) -> Result<WorkflowRecord, EngineError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(id.to_string()))
    }

    /// Records owned by `user_id`, newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<WorkflowRecord>, EngineError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    /// Replace the stored record. The lease must belong to the record and the
    /// status change must be a legal transition.
    pub fn update(&self, lease: &WriterLease, record: &WorkflowRecord) -> Result<(), EngineError> {
        if lease.id != record.id {
            return Err(EngineError::Store(format!(
                "lease for {} cannot write {}",
                lease.id, record.id
            )));
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.writers.get(&record.id) != Some(&lease.token) {
            return Err(EngineError::Store(format!(
                "lease for workflow {} is no longer active",
                record.id
            )));
        }
        let current = inner
            .records
            .get_mut(&record.id)
            .ok_or_else(|| EngineError::WorkflowNotFound(record.id.clone()))?;
        if !can_transition(current.status(), record.status()) {
            return Err(EngineError::Store(format!(
                "illegal transition {} -> {} for workflow {}",
                current.status().as_str(),
                record.status().as_str(),
                record.id
            )));
        }
        *current = record.clone();
        Ok(())
    }

    /// Take the writer lease for a retry. Rejects without touching the record
    /// when the workflow is running, already leased, or not failed/partial.
    pub fn claim_for_retry(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<(WorkflowRecord, WriterLease), EngineError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let record = inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(id.to_string()))?;

        if inner.writers.contains_key(id) {
            return Err(EngineError::InvalidRetryState {
                id: id.to_string(),
                status: WorkflowStatus::Running.as_str().to_string(),
            });
        }
        if !record.status().is_retryable() {
            return Err(EngineError::InvalidRetryState {
                id: id.to_string(),
                status: record.status().as_str().to_string(),
            });
        }

        let token = inner.grant(id);
        Ok((
            record,
            WriterLease {
                store: Arc::clone(self),
                id: id.to_string(),
                token,
            },
        ))
    }

    /// Drop the writer `token` holds. A record left `running` with no writer
    /// can never finish, so it is settled as interrupted and becomes
    /// retryable.
    fn release(&self, id: &str, token: u64) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => e.into_inner(),
        };
        if inner.writers.get(id) == Some(&token) {
            inner.writers.remove(id);
        }
        if inner.writers.contains_key(id) {
            return;
        }
        if let Some(record) = inner.records.get_mut(id)
            && record.status() == WorkflowStatus::Running
        {
            record.interrupt(
                EngineError::Interrupted(
                    "the run stopped before this step finished; retry the workflow".into(),
                )
                .body(),
            );
            warn!(
                workflow_id = %id,
                status = record.status().as_str(),
                "Workflow run ended without finishing; marked interrupted"
            );
        }
    }

    #[cfg(test)]
    pub(in crate::core::workflow) fn revoke_writer(&self, id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.writers.remove(id);
        }
    }
}

/// Exclusive write access to one workflow record. Dropping it releases the
/// record for the next writer.
pub struct WriterLease {
    store: Arc<WorkflowStore>,
    id: String,
    token: u64,
}

impl WriterLease {
    pub fn workflow_id(&self) -> &str {
        &self.id
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        self.store.release(&self.id, self.token);
    }
}
