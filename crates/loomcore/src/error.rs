use crate::WorkflowId;
use thiserror::Error;

/// Structural graph defects, surfaced synchronously before execution
/// starts and before any resource is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow must contain between 1 and {max} nodes, got {count}")]
    InvalidBounds { count: usize, max: usize },

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("node {node_id} is malformed: {detail}")]
    MalformedNode { node_id: String, detail: String },

    #[error("no effective start node: {detail}")]
    MissingStartNode { detail: String },

    #[error("connection {connection_id} is dangling: {detail}")]
    DanglingConnection {
        connection_id: String,
        detail: String,
    },

    #[error("node {node_id} has unknown type {node_type:?}")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("cycle through node {node_id} does not pass through a loop node")]
    UnboundedCycle { node_id: String },
}

impl ValidationError {
    /// Stable discriminator for transport-layer error mapping
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBounds { .. } => "invalid_bounds",
            Self::DuplicateNodeId(_) => "duplicate_node_id",
            Self::MalformedNode { .. } => "malformed_node",
            Self::MissingStartNode { .. } => "missing_start_node",
            Self::DanglingConnection { .. } => "dangling_connection",
            Self::UnknownNodeType { .. } => "unknown_node_type",
            Self::UnboundedCycle { .. } => "unbounded_cycle",
        }
    }
}

/// Failures produced by a node adapter while executing
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("iteration limit of {limit} reached")]
    IterationLimit { limit: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Top-level engine error taxonomy. Every variant carries a stable
/// `kind` discriminator so the surrounding API layer can map it to
/// transport-specific responses.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("node {node_id} failed: {source}")]
    Adapter {
        node_id: String,
        #[source]
        source: AdapterError,
    },

    #[error("node {node_id} exceeded its {timeout_ms}ms execution bound")]
    Timeout { node_id: String, timeout_ms: u64 },

    #[error("concurrent workflow limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("workflow {workflow_id} was stopped")]
    Cancelled { workflow_id: WorkflowId },

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Adapter { .. } => "adapter_error",
            Self::Timeout { .. } => "timeout_error",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Cancelled { .. } => "cancellation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The node the error is attributable to, where one exists
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Adapter { node_id, .. } | Self::Timeout { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}
