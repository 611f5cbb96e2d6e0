//! Workflow execution runtime
//!
//! Validates node/connection graphs, schedules node dispatch respecting
//! dependencies and branching, bounds the number of simultaneously running
//! workflows, and guarantees temp-file and subprocess cleanup whether a
//! node settles in success or failure.

mod adapters;
mod engine;
mod registry;
mod resources;
mod scheduler;
mod validator;

pub use adapters::{AdapterContext, AdapterOutcome, AdapterRegistry, NodeAdapter, PortSchema};
pub use engine::{Engine, EngineConfig, ExecutionHandle, RunSummary};
pub use registry::WorkflowRegistry;
pub use resources::{ProcessHandle, ResourceHandle, ResourceKind, ResourceManager};
pub use validator::validate;
