use crate::adapters::{AdapterContext, AdapterRegistry};
use crate::engine::RunSummary;
use crate::registry::WorkflowRegistry;
use crate::resources::ResourceManager;
use chrono::Utc;
use loomcore::{
    node_types, AdapterError, EngineError, EngineEvent, EventPublisher, NodeRunStatus, NodeSpec,
    WorkflowId, WorkflowRecord, WorkflowStatus,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Walks one workflow graph from its start node, dispatching adapters and
/// recording per-node state through the workflow registry.
///
/// Dispatch within a run is sequential over a ready queue; concurrency
/// comes from independent workflows running under the gate. Join policy is
/// first-arrival-wins: a node dispatches on the first inbound arrival and
/// later arrivals in the same wave are dropped. Loop nodes re-open their
/// body subgraph for re-dispatch, bounded by the iteration cap.
pub(crate) struct Scheduler {
    adapters: Arc<AdapterRegistry>,
    workflows: Arc<WorkflowRegistry>,
    resources: Arc<ResourceManager>,
    publisher: EventPublisher,
    node_timeout: Duration,
    max_iterations: u32,
}

impl Scheduler {
    pub(crate) fn new(
        adapters: Arc<AdapterRegistry>,
        workflows: Arc<WorkflowRegistry>,
        resources: Arc<ResourceManager>,
        publisher: EventPublisher,
        node_timeout: Duration,
        max_iterations: u32,
    ) -> Self {
        Self {
            adapters,
            workflows,
            resources,
            publisher,
            node_timeout,
            max_iterations,
        }
    }

    /// Drive an admitted workflow to a terminal status. Settles the
    /// registry entry exactly once on every exit path and releases any
    /// resource still attributed to the workflow.
    pub(crate) async fn run(
        &self,
        workflow_id: WorkflowId,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let outcome = match self.workflows.snapshot(workflow_id) {
            Some(snapshot) => {
                self.workflows.mark_running(workflow_id);
                self.publisher.publish(EngineEvent::WorkflowStarted {
                    workflow_id,
                    node_count: snapshot.nodes.len(),
                    timestamp: Utc::now(),
                });
                tracing::info!(%workflow_id, "workflow started");
                let mut completed = Vec::new();
                let result = self.drive(&snapshot, &cancel, &mut completed).await;
                (result, completed)
            }
            None => (
                Err(EngineError::Internal(format!(
                    "workflow {workflow_id} vanished before dispatch"
                ))),
                Vec::new(),
            ),
        };
        let (result, completed) = outcome;

        // Sweep anything a misbehaving adapter left behind
        self.resources.release_workflow(workflow_id);

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.workflows.settle(workflow_id, WorkflowStatus::Completed);
                self.publisher.publish(EngineEvent::WorkflowCompleted {
                    workflow_id,
                    completed_nodes: completed.len(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                tracing::info!(%workflow_id, nodes = completed.len(), "workflow completed");
                Ok(RunSummary {
                    workflow_id,
                    status: WorkflowStatus::Completed,
                    completed_nodes: completed,
                    duration_ms,
                })
            }
            Err(err @ EngineError::Cancelled { .. }) => {
                self.workflows.settle(workflow_id, WorkflowStatus::Stopped);
                self.publisher.publish(EngineEvent::WorkflowStopped {
                    workflow_id,
                    completed_nodes: completed.len(),
                    timestamp: Utc::now(),
                });
                tracing::info!(%workflow_id, "workflow stopped");
                Err(err)
            }
            Err(err) => {
                self.workflows.settle(workflow_id, WorkflowStatus::Failed);
                self.publisher.publish(EngineEvent::WorkflowFailed {
                    workflow_id,
                    node_id: err.node_id().map(str::to_string),
                    error: err.to_string(),
                    error_kind: err.kind().to_string(),
                    timestamp: Utc::now(),
                });
                tracing::warn!(%workflow_id, error = %err, "workflow failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        snapshot: &WorkflowRecord,
        cancel: &CancellationToken,
        completed: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let workflow_id = snapshot.id;
        let start = snapshot
            .nodes
            .iter()
            .find(|n| n.node_type == node_types::START)
            .ok_or_else(|| EngineError::Internal("validated workflow lost its start node".into()))?;

        let mut queue: VecDeque<String> = VecDeque::new();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut dispatch_counts: HashMap<String, u32> = HashMap::new();
        let mut outputs: HashMap<String, Map<String, Value>> = HashMap::new();

        queue.push_back(start.id.clone());
        dispatched.insert(start.id.clone());

        while let Some(node_id) = queue.pop_front() {
            // Cooperative cancellation, polled between dispatches
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled { workflow_id });
            }

            let node = snapshot
                .find_node(&node_id)
                .cloned()
                .ok_or_else(|| EngineError::Internal(format!("node {node_id} not in snapshot")))?;

            let iteration = *dispatch_counts.get(&node_id).unwrap_or(&0);
            if iteration >= self.max_iterations {
                let err = AdapterError::IterationLimit {
                    limit: self.max_iterations,
                };
                self.record_node_error(workflow_id, &node_id, &err.to_string());
                return Err(EngineError::Adapter {
                    node_id,
                    source: err,
                });
            }
            dispatch_counts.insert(node_id.clone(), iteration + 1);

            self.workflows.update(workflow_id, |record| {
                if let Some(state) = record.node_states.get_mut(&node_id) {
                    state.status = NodeRunStatus::Running;
                    state.started_at = Some(Utc::now());
                    state.iterations = iteration + 1;
                }
            });
            self.publisher.publish(EngineEvent::NodeStarted {
                workflow_id,
                node_id: node_id.clone(),
                node_type: node.node_type.clone(),
                iteration,
                timestamp: Utc::now(),
            });

            let adapter = self.adapters.get(&node.node_type).ok_or_else(|| {
                EngineError::Internal(format!("adapter for {} unregistered mid-run", node.node_type))
            })?;
            let ctx = AdapterContext {
                workflow_id,
                node: node.clone(),
                inputs: collect_inputs(snapshot, &node, &outputs),
                iteration,
                resources: self.resources.clone(),
                events: self.publisher.node_emitter(workflow_id, node_id.clone()),
                cancellation: cancel.clone(),
            };

            let node_started = Instant::now();
            let result = match timeout(self.node_timeout, adapter.execute(ctx)).await {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(source)) => Err(EngineError::Adapter {
                    node_id: node_id.clone(),
                    source,
                }),
                Err(_) => Err(EngineError::Timeout {
                    node_id: node_id.clone(),
                    timeout_ms: self.node_timeout.as_millis() as u64,
                }),
            };

            // Cleanup runs before any error propagates upward
            self.resources.release_node(workflow_id, &node_id);

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(EngineError::Adapter { source, .. }) if source.is_cancelled() => {
                    // Interrupted mid-execution by a stop request
                    self.workflows.update(workflow_id, |record| {
                        if let Some(state) = record.node_states.get_mut(&node_id) {
                            state.status = NodeRunStatus::Skipped;
                            state.completed_at = Some(Utc::now());
                        }
                    });
                    return Err(EngineError::Cancelled { workflow_id });
                }
                Err(err) => {
                    self.record_node_error(workflow_id, &node_id, &err.to_string());
                    self.publisher.publish(EngineEvent::NodeFailed {
                        workflow_id,
                        node_id: node_id.clone(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(err);
                }
            };

            let duration_ms = node_started.elapsed().as_millis() as u64;
            self.workflows.update(workflow_id, |record| {
                if let Some(state) = record.node_states.get_mut(&node_id) {
                    state.status = NodeRunStatus::Completed;
                    state.result = Some(Value::Object(outcome.outputs.clone()));
                    state.error = None;
                    state.completed_at = Some(Utc::now());
                }
            });
            self.publisher.publish(EngineEvent::NodeCompleted {
                workflow_id,
                node_id: node_id.clone(),
                duration_ms,
                timestamp: Utc::now(),
            });
            completed.push(node_id.clone());

            // A loop taking its body branch re-opens the body subgraph
            // (and itself, for the back edge) for re-dispatch. A member
            // still sitting in the queue from another path keeps its
            // dispatched mark, so it cannot run twice in one wave.
            if node.node_type == node_types::LOOP && outcome.branch.as_deref() == Some("body") {
                for member in loop_body(snapshot, &node_id) {
                    if !queue.contains(&member) {
                        dispatched.remove(&member);
                    }
                }
                dispatched.remove(&node_id);
            }

            for target in follow_connections(snapshot, &node, outcome.branch.as_deref()) {
                // First-arrival-wins join: later arrivals are dropped
                if dispatched.insert(target.clone()) {
                    queue.push_back(target);
                }
            }

            outputs.insert(node_id, outcome.outputs);
        }

        Ok(())
    }

    fn record_node_error(&self, workflow_id: WorkflowId, node_id: &str, message: &str) {
        self.workflows.update(workflow_id, |record| {
            if let Some(state) = record.node_states.get_mut(node_id) {
                state.status = NodeRunStatus::Error;
                state.error = Some(message.to_string());
                state.completed_at = Some(Utc::now());
            }
        });
    }
}

/// Gather values delivered to a node's input ports from its producers'
/// recorded outputs
fn collect_inputs(
    snapshot: &WorkflowRecord,
    node: &NodeSpec,
    outputs: &HashMap<String, Map<String, Value>>,
) -> Map<String, Value> {
    let mut inputs = Map::new();
    for conn in &snapshot.connections {
        if conn.to.node_id != node.id {
            continue;
        }
        let Some(producer) = snapshot.find_node(&conn.from.node_id) else {
            continue;
        };
        let (Some(from_port), Some(to_port)) = (
            producer.output_port(conn.from.port_index),
            node.input_port(conn.to.port_index),
        ) else {
            continue;
        };
        if let Some(value) = outputs.get(&conn.from.node_id).and_then(|o| o.get(from_port)) {
            inputs.insert(to_port.to_string(), value.clone());
        }
    }
    inputs
}

/// Targets of a completed node's outgoing connections. With a branch label
/// only connections leaving the matching output port are followed.
fn follow_connections(
    snapshot: &WorkflowRecord,
    node: &NodeSpec,
    branch: Option<&str>,
) -> Vec<String> {
    let mut targets = Vec::new();
    for conn in &snapshot.connections {
        if conn.from.node_id != node.id {
            continue;
        }
        let Some(port_name) = node.output_port(conn.from.port_index) else {
            continue;
        };
        if let Some(label) = branch {
            if port_name != label {
                continue;
            }
        }
        targets.push(conn.to.node_id.clone());
    }
    targets
}

/// Nodes reachable from a loop's body port without passing back through
/// the loop node itself
fn loop_body(snapshot: &WorkflowRecord, loop_id: &str) -> HashSet<String> {
    let Some(loop_node) = snapshot.find_node(loop_id) else {
        return HashSet::new();
    };

    let mut body = HashSet::new();
    let mut frontier: VecDeque<String> = snapshot
        .connections
        .iter()
        .filter(|c| {
            c.from.node_id == loop_id
                && loop_node.output_port(c.from.port_index) == Some("body")
        })
        .map(|c| c.to.node_id.clone())
        .collect();

    while let Some(node_id) = frontier.pop_front() {
        if node_id == loop_id || !body.insert(node_id.clone()) {
            continue;
        }
        for conn in &snapshot.connections {
            if conn.from.node_id == node_id {
                frontier.push_back(conn.to.node_id.clone());
            }
        }
    }
    body
}
