use crate::resources::ResourceManager;
use async_trait::async_trait;
use loomcore::{AdapterError, NodeEmitter, NodeSpec, Port, WorkflowId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Declared input/output ports for a node type
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl PortSchema {
    pub fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|n| Port::new(*n)).collect(),
            outputs: outputs.iter().map(|n| Port::new(*n)).collect(),
        }
    }

    /// One main input, one main output
    pub fn main() -> Self {
        Self::new(&["main"], &["main"])
    }
}

/// Everything an adapter sees while executing one node.
///
/// Resource acquisition goes through `resources` so the scheduler can
/// release anything still open when the node settles; log output goes
/// through `events`; long waits should select against `cancellation`.
pub struct AdapterContext {
    pub workflow_id: WorkflowId,
    pub node: NodeSpec,
    /// Values delivered on input ports, keyed by port name
    pub inputs: Map<String, Value>,
    /// How many times this node has already executed in the run
    pub iteration: u32,
    pub resources: Arc<ResourceManager>,
    pub events: NodeEmitter,
    pub cancellation: CancellationToken,
}

impl AdapterContext {
    pub fn require_input(&self, port: &str) -> Result<&Value, AdapterError> {
        self.inputs
            .get(port)
            .ok_or_else(|| AdapterError::MissingInput(port.to_string()))
    }

    pub fn config(&self, key: &str) -> Option<&Value> {
        self.node.config.get(key)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config(key).and_then(Value::as_str)
    }

    pub fn require_config_str(&self, key: &str) -> Result<&str, AdapterError> {
        self.config_str(key)
            .ok_or_else(|| AdapterError::Configuration(format!("missing config key {key:?}")))
    }

    pub fn config_u64_or(&self, key: &str, default: u64) -> u64 {
        self.config(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn config_bool_or(&self, key: &str, default: bool) -> bool {
        self.config(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// What a node execution produced: output port values plus, for branching
/// nodes, the label of the output port the run should follow
#[derive(Debug, Default)]
pub struct AdapterOutcome {
    pub outputs: Map<String, Value>,
    pub branch: Option<String>,
}

impl AdapterOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_branch(mut self, label: impl Into<String>) -> Self {
        self.branch = Some(label.into());
        self
    }

    /// Copy the node's inputs straight through to its outputs
    pub fn passthrough(inputs: &Map<String, Value>) -> Self {
        Self {
            outputs: inputs.clone(),
            branch: None,
        }
    }
}

/// Executor bound to a node type. Built-ins and plugin adapters implement
/// the same contract and register through the same call.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    /// Type key this adapter handles, e.g. "http.request"
    fn node_type(&self) -> &str;

    fn ports(&self) -> PortSchema {
        PortSchema::main()
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError>;
}

/// Maps node-type strings to executors
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn NodeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn NodeAdapter>) {
        let node_type = adapter.node_type().to_string();
        tracing::debug!("registering node adapter: {node_type}");
        self.adapters.insert(node_type, adapter);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeAdapter>> {
        self.adapters.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.adapters.contains_key(node_type)
    }

    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn port_schema(&self, node_type: &str) -> Option<PortSchema> {
        self.adapters.get(node_type).map(|a| a.ports())
    }
}
