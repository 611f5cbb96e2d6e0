use chrono::Utc;
use loomcore::{EngineError, WorkflowId, WorkflowRecord, WorkflowStatus};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

struct Inner {
    records: HashMap<WorkflowId, WorkflowRecord>,
    /// Cancel token per workflow currently admitted and not yet settled.
    /// The size of this map is the running-subset size the gate bounds.
    running: HashMap<WorkflowId, CancellationToken>,
}

/// Concurrency gate plus workflow record table.
///
/// Admission and settlement are the only writers. A workflow joins the
/// running subset atomically on admission (or not at all, when the gate is
/// full) and leaves it exactly once on settlement; the historical record
/// stays queryable afterwards.
pub struct WorkflowRegistry {
    inner: Mutex<Inner>,
    max_running: usize,
}

impl WorkflowRegistry {
    pub fn new(max_running: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                running: HashMap::new(),
            }),
            max_running,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a queued workflow, or fail with `CapacityExceeded` leaving the
    /// table untouched
    pub fn admit(&self, record: WorkflowRecord) -> Result<CancellationToken, EngineError> {
        let mut inner = self.lock();
        if inner.running.len() >= self.max_running {
            return Err(EngineError::CapacityExceeded {
                limit: self.max_running,
            });
        }
        let id = record.id;
        let token = CancellationToken::new();
        inner.records.insert(id, record);
        inner.running.insert(id, token.clone());
        Ok(token)
    }

    /// Transition an admitted workflow to Running
    pub fn mark_running(&self, id: WorkflowId) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(&id) {
            if record.status == WorkflowStatus::Queued {
                record.status = WorkflowStatus::Running;
                record.started_at = Some(Utc::now());
            }
        }
    }

    /// Move a workflow to a terminal status and drop it from the running
    /// subset. Returns true only for the first settlement; later calls are
    /// no-ops, keeping status transitions monotonic.
    pub fn settle(&self, id: WorkflowId, status: WorkflowStatus) -> bool {
        debug_assert!(status.is_terminal());
        let mut inner = self.lock();
        let first = inner.running.remove(&id).is_some();
        if first {
            if let Some(record) = inner.records.get_mut(&id) {
                if !record.status.is_terminal() {
                    record.status = status;
                    record.finished_at = Some(Utc::now());
                }
            }
        }
        first
    }

    /// Request cooperative cancellation of a running workflow
    pub fn cancel(&self, id: WorkflowId) -> bool {
        let inner = self.lock();
        match inner.running.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Mutate a record through the registry's single-writer lock
    pub fn update<F>(&self, id: WorkflowId, f: F)
    where
        F: FnOnce(&mut WorkflowRecord),
    {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(&id) {
            f(record);
        }
    }

    /// Clone of the current record; a pure, repeatable read
    pub fn snapshot(&self, id: WorkflowId) -> Option<WorkflowRecord> {
        self.lock().records.get(&id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn is_running(&self, id: WorkflowId) -> bool {
        self.lock().running.contains_key(&id)
    }
}
