use chrono::{DateTime, Utc};
use loomcore::WorkflowId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::TempPath;
use tokio::process::Child;
use uuid::Uuid;

pub type HandleId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    TempFile,
    Process,
}

/// Descriptor for a tracked temp file or child process
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub id: HandleId,
    pub kind: ResourceKind,
    pub workflow_id: WorkflowId,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
}

type ProcessSlot = std::sync::Arc<Mutex<Option<Child>>>;

enum Backing {
    TempFile(TempPath),
    Process(ProcessSlot),
}

struct Entry {
    handle: ResourceHandle,
    backing: Backing,
}

/// Tracks every temp file and child process opened by adapters, tagged
/// with the owning workflow and node, and releases them when the owning
/// node's execution settles.
///
/// The table is single-writer: only this type mutates it, through
/// `create_temp_file` / `track_process` / `release_*`. Release is
/// idempotent; deleting an already-deleted file or killing an
/// already-exited process is a no-op.
#[derive(Default)]
pub struct ResourceManager {
    entries: Mutex<HashMap<HandleId, Entry>>,
}

fn recover<'a, T>(guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scratch file owned by `node_id`. The file is deleted when
    /// the node settles, even if the adapter already removed it.
    pub fn create_temp_file(
        &self,
        workflow_id: WorkflowId,
        node_id: &str,
    ) -> std::io::Result<(HandleId, PathBuf)> {
        let file = tempfile::Builder::new().prefix("loomflow-").tempfile()?;
        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();

        let handle = ResourceHandle {
            id: Uuid::new_v4(),
            kind: ResourceKind::TempFile,
            workflow_id,
            node_id: node_id.to_string(),
            created_at: Utc::now(),
        };
        tracing::debug!(node_id, path = %path.display(), "tracking temp file");

        let id = handle.id;
        recover(self.entries.lock()).insert(
            id,
            Entry {
                handle,
                backing: Backing::TempFile(temp_path),
            },
        );
        Ok((id, path))
    }

    /// Take ownership of a spawned child process. The returned handle lets
    /// the adapter reclaim the child to wait on it; anything still in the
    /// slot when the node settles is killed.
    pub fn track_process(
        &self,
        workflow_id: WorkflowId,
        node_id: &str,
        child: Child,
    ) -> ProcessHandle {
        let handle = ResourceHandle {
            id: Uuid::new_v4(),
            kind: ResourceKind::Process,
            workflow_id,
            node_id: node_id.to_string(),
            created_at: Utc::now(),
        };
        tracing::debug!(node_id, pid = child.id(), "tracking child process");

        let slot: ProcessSlot = std::sync::Arc::new(Mutex::new(Some(child)));
        let id = handle.id;
        recover(self.entries.lock()).insert(
            id,
            Entry {
                handle,
                backing: Backing::Process(slot.clone()),
            },
        );
        ProcessHandle { id, slot }
    }

    /// Release every handle owned by one node. Returns how many handles
    /// were closed. Called by the scheduler when the node's execution
    /// settles, success or failure.
    pub fn release_node(&self, workflow_id: WorkflowId, node_id: &str) -> usize {
        self.release_where(|h| h.workflow_id == workflow_id && h.node_id == node_id)
    }

    /// Release every handle owned by one workflow
    pub fn release_workflow(&self, workflow_id: WorkflowId) -> usize {
        self.release_where(|h| h.workflow_id == workflow_id)
    }

    fn release_where(&self, matches: impl Fn(&ResourceHandle) -> bool) -> usize {
        let drained: Vec<Entry> = {
            let mut entries = recover(self.entries.lock());
            let ids: Vec<HandleId> = entries
                .iter()
                .filter(|(_, e)| matches(&e.handle))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| entries.remove(&id)).collect()
        };

        let count = drained.len();
        for entry in drained {
            release_entry(entry);
        }
        count
    }

    /// Open temp files attributable to a workflow
    pub fn open_files(&self, workflow_id: WorkflowId) -> usize {
        recover(self.entries.lock())
            .values()
            .filter(|e| {
                e.handle.workflow_id == workflow_id && e.handle.kind == ResourceKind::TempFile
            })
            .count()
    }

    /// Child processes attributable to a workflow that have not been
    /// reclaimed or reaped
    pub fn active_processes(&self, workflow_id: WorkflowId) -> usize {
        recover(self.entries.lock())
            .values()
            .filter(|e| match &e.backing {
                Backing::Process(slot) => {
                    e.handle.workflow_id == workflow_id && recover(slot.lock()).is_some()
                }
                _ => false,
            })
            .count()
    }
}

fn release_entry(entry: Entry) {
    match entry.backing {
        // TempPath deletes on drop and ignores a file that is already gone
        Backing::TempFile(path) => drop(path),
        Backing::Process(slot) => {
            if let Some(mut child) = recover(slot.lock()).take() {
                tracing::debug!(
                    node_id = %entry.handle.node_id,
                    "killing child process left open by node"
                );
                let _ = child.start_kill();
            }
        }
    }
}

/// Adapter-side view of a tracked child process
pub struct ProcessHandle {
    pub id: HandleId,
    slot: ProcessSlot,
}

impl ProcessHandle {
    /// Reclaim the child to wait on it. After this the manager's cleanup
    /// for the process becomes a no-op; the caller is responsible for
    /// reaping (or killing) the child it took.
    pub fn take(&self) -> Option<Child> {
        recover(self.slot.lock()).take()
    }
}
