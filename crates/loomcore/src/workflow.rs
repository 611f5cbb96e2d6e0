use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Node type keys the scheduler and validator treat specially.
///
/// Adapters for these types ship in `loomnodes`; plugins register any other
/// key through the adapter registry.
pub mod node_types {
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const CONDITION: &str = "condition";
    pub const LOOP: &str = "loop";
    pub const DELAY: &str = "delay";
    pub const HTTP_REQUEST: &str = "http.request";
    pub const READ_FILE: &str = "file.read";
    pub const WRITE_FILE: &str = "file.write";
    pub const EXECUTE_SCRIPT: &str = "script.execute";
    pub const LOGGER: &str = "logger";
    pub const TRANSFORM: &str = "transform";
}

/// A declared input or output port on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The default single port most nodes carry
    pub fn main() -> Self {
        Self::new("main")
    }
}

/// One node in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Canvas coordinates, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default = "default_ports")]
    pub inputs: Vec<Port>,
    #[serde(default = "default_ports")]
    pub outputs: Vec<Port>,
}

fn default_ports() -> Vec<Port> {
    vec![Port::main()]
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            position: None,
            config: Map::new(),
            inputs: default_ports(),
            outputs: default_ports(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_inputs(mut self, names: &[&str]) -> Self {
        self.inputs = names.iter().map(|n| Port::new(*n)).collect();
        self
    }

    pub fn with_outputs(mut self, names: &[&str]) -> Self {
        self.outputs = names.iter().map(|n| Port::new(*n)).collect();
        self
    }

    pub fn input_port(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).map(|p| p.name.as_str())
    }

    pub fn output_port(&self, index: usize) -> Option<&str> {
        self.outputs.get(index).map(|p| p.name.as_str())
    }
}

/// One endpoint of a connection: a node plus a port index into its
/// declared input or output ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node_id: String,
    pub port_index: usize,
}

/// Directed edge between an output port and an input port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Connection {
    pub fn new(
        from_node: impl Into<String>,
        from_port: usize,
        to_node: impl Into<String>,
        to_port: usize,
    ) -> Self {
        let from_node = from_node.into();
        let to_node = to_node.into();
        Self {
            id: format!("{}:{}->{}:{}", from_node, from_port, to_node, to_port),
            from: Endpoint {
                node_id: from_node,
                port_index: from_port,
            },
            to: Endpoint {
                node_id: to_node,
                port_index: to_port,
            },
        }
    }

    /// Connect the main output of `from` to the main input of `to`
    pub fn main(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, 0, to, 0)
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Workflow lifecycle status. Transitions are monotonic: once a terminal
/// status is reached the record never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Per-node execution status within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Completed,
    Error,
    /// The node was interrupted before producing a result, e.g. by a
    /// cooperative stop landing mid-execution
    Skipped,
}

/// Execution state of a single node within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunState {
    pub status: NodeRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times this node has dispatched in the run; above one only
    /// for loop bodies
    pub iterations: u32,
}

impl Default for NodeRunState {
    fn default() -> Self {
        Self {
            status: NodeRunStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            iterations: 0,
        }
    }
}

/// Live record of one workflow run, owned by the workflow registry.
/// Snapshots handed to callers are clones; the engine never shares the
/// mutable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub nodes: Vec<NodeSpec>,
    pub connections: Vec<Connection>,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub node_states: HashMap<String, NodeRunState>,
}

impl WorkflowRecord {
    pub fn new(nodes: Vec<NodeSpec>, connections: Vec<Connection>) -> Self {
        let node_states = nodes
            .iter()
            .map(|n| (n.id.clone(), NodeRunState::default()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            nodes,
            connections,
            status: WorkflowStatus::Queued,
            started_at: None,
            finished_at: None,
            node_states,
        }
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_state(&self, id: &str) -> Option<&NodeRunState> {
        self.node_states.get(id)
    }
}

/// A workflow as stored on disk or sent over the wire by the editor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}
