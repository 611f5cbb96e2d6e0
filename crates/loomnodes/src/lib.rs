//! Built-in node adapters
//!
//! The standard node library: control flow (start/end/condition/loop),
//! timing, HTTP, file I/O, subprocess script execution, logging, and data
//! transforms. Plugin adapters register through the same
//! [`loomruntime::AdapterRegistry::register`] call these use.

mod control;
mod fs;
mod http;
mod logger;
mod script;
mod time;
mod transform;

pub use control::{ConditionAdapter, EndAdapter, LoopAdapter, StartAdapter};
pub use fs::{ReadFileAdapter, WriteFileAdapter};
pub use http::HttpRequestAdapter;
pub use logger::LoggerAdapter;
pub use script::ExecuteScriptAdapter;
pub use time::DelayAdapter;
pub use transform::DataTransformAdapter;

use loomruntime::AdapterRegistry;
use std::sync::Arc;

/// Register every built-in adapter with a registry
pub fn register_all(registry: &mut AdapterRegistry) {
    registry.register(Arc::new(StartAdapter));
    registry.register(Arc::new(EndAdapter));
    registry.register(Arc::new(ConditionAdapter));
    registry.register(Arc::new(LoopAdapter));
    registry.register(Arc::new(DelayAdapter));
    registry.register(Arc::new(HttpRequestAdapter::new()));
    registry.register(Arc::new(ReadFileAdapter));
    registry.register(Arc::new(WriteFileAdapter));
    registry.register(Arc::new(ExecuteScriptAdapter));
    registry.register(Arc::new(LoggerAdapter));
    registry.register(Arc::new(DataTransformAdapter));
}
