//! Core types for the loomflow workflow engine
//!
//! This crate holds the data model shared by the runtime, the built-in
//! node adapters, and any embedding application: workflow definitions,
//! execution state, the error taxonomy, and the lifecycle event contract.

mod error;
mod events;
mod workflow;

pub use error::{AdapterError, EngineError, ValidationError};
pub use events::{
    BroadcastError, Broadcaster, ChannelBroadcaster, EngineEvent, EventPublisher, LogLevel,
    NodeEmitter, NullBroadcaster,
};
pub use workflow::{
    node_types, Connection, Endpoint, NodeRunState, NodeRunStatus, NodeSpec, Port, Position,
    WorkflowDefinition, WorkflowId, WorkflowRecord, WorkflowStatus,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
