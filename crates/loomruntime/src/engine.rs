use crate::adapters::AdapterRegistry;
use crate::registry::WorkflowRegistry;
use crate::resources::ResourceManager;
use crate::scheduler::Scheduler;
use crate::validator;
use loomcore::{
    Broadcaster, Connection, EngineError, EventPublisher, NodeSpec, NullBroadcaster,
    ValidationError, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on simultaneously running workflows
    pub max_concurrent_workflows: usize,
    /// Upper bound on nodes per workflow, enforced by the validator
    pub max_nodes: usize,
    /// Execution bound applied to every adapter call
    pub node_timeout: Duration,
    /// Hard cap on per-node dispatch count, bounding loop bodies
    pub max_loop_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            max_nodes: 200,
            node_timeout: Duration::from_secs(60),
            max_loop_iterations: 100,
        }
    }
}

/// The workflow execution engine.
///
/// Owns its adapter registry, workflow registry, and resource manager;
/// multiple isolated engines can coexist in one process. Lifecycle events
/// leave through the injected [`Broadcaster`].
pub struct Engine {
    config: EngineConfig,
    adapters: Arc<AdapterRegistry>,
    workflows: Arc<WorkflowRegistry>,
    resources: Arc<ResourceManager>,
    publisher: EventPublisher,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        adapters: AdapterRegistry,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let workflows = Arc::new(WorkflowRegistry::new(config.max_concurrent_workflows));
        Self {
            config,
            adapters: Arc::new(adapters),
            workflows,
            resources: Arc::new(ResourceManager::new()),
            publisher: EventPublisher::new(broadcaster),
        }
    }

    /// Engine with default configuration and no observers, mostly for tests
    pub fn with_adapters(adapters: AdapterRegistry) -> Self {
        Self::new(
            EngineConfig::default(),
            adapters,
            Arc::new(NullBroadcaster),
        )
    }

    /// Engine with custom configuration and no observers
    pub fn with_adapters_and_config(adapters: AdapterRegistry, config: EngineConfig) -> Self {
        Self::new(config, adapters, Arc::new(NullBroadcaster))
    }

    /// Validate a graph without executing it. Never allocates resources or
    /// touches the registry.
    pub fn validate_graph(
        &self,
        nodes: &[NodeSpec],
        connections: &[Connection],
    ) -> Result<(), ValidationError> {
        validator::validate(nodes, connections, &self.adapters, self.config.max_nodes)
    }

    /// Validate, admit, and start executing a workflow.
    ///
    /// Returns as soon as the run is admitted; the workflow executes on a
    /// spawned task. `ValidationError` and `CapacityExceeded` reject here,
    /// with no registry mutation. A failed or stopped run surfaces through
    /// [`ExecutionHandle::wait`], which never resolves success for it.
    pub async fn execute(
        &self,
        nodes: Vec<NodeSpec>,
        connections: Vec<Connection>,
    ) -> Result<ExecutionHandle, EngineError> {
        self.validate_graph(&nodes, &connections)?;

        let record = WorkflowRecord::new(nodes, connections);
        let workflow_id = record.id;
        let cancel = self.workflows.admit(record)?;

        let scheduler = Scheduler::new(
            self.adapters.clone(),
            self.workflows.clone(),
            self.resources.clone(),
            self.publisher.clone(),
            self.config.node_timeout,
            self.config.max_loop_iterations,
        );
        let join = tokio::spawn(async move { scheduler.run(workflow_id, cancel).await });

        Ok(ExecutionHandle { workflow_id, join })
    }

    /// Request cooperative cancellation. Returns whether a running
    /// workflow was found to stop.
    pub fn stop(&self, workflow_id: WorkflowId) -> bool {
        let found = self.workflows.cancel(workflow_id);
        if found {
            tracing::info!(%workflow_id, "stop requested");
        }
        found
    }

    /// Snapshot of a workflow record, live or historical. A pure read.
    pub fn get_status(&self, workflow_id: WorkflowId) -> Option<WorkflowRecord> {
        self.workflows.snapshot(workflow_id)
    }

    pub fn running_count(&self) -> usize {
        self.workflows.running_count()
    }

    pub fn node_types(&self) -> Vec<String> {
        self.adapters.node_types()
    }

    /// Resource accounting, exposed for diagnostics and tests
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }
}

/// Handle on one spawned workflow run
#[derive(Debug)]
pub struct ExecutionHandle {
    workflow_id: WorkflowId,
    join: JoinHandle<Result<RunSummary, EngineError>>,
}

impl ExecutionHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Await settlement. Resolves `Ok` only for a completed run; failed
    /// runs reject with the error that halted them and stopped runs reject
    /// with `Cancelled`.
    pub async fn wait(self) -> Result<RunSummary, EngineError> {
        self.join
            .await
            .map_err(|e| EngineError::Internal(format!("run task panicked: {e}")))?
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    /// Node ids in dispatch order; loop bodies appear once per iteration
    pub completed_nodes: Vec<String>,
    pub duration_ms: u64,
}
