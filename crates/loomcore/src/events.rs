use crate::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Lifecycle notifications published by the engine.
///
/// Payloads are deliberately flat: ids, status strings, timestamps, counts.
/// The engine never hands its live execution-state container to observers,
/// so every variant here is safely serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        node_count: usize,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        completed_nodes: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        node_id: Option<String>,
        error: String,
        error_kind: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowStopped {
        workflow_id: WorkflowId,
        completed_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        workflow_id: WorkflowId,
        node_id: String,
        node_type: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        workflow_id: WorkflowId,
        node_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        workflow_id: WorkflowId,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Log {
        workflow_id: WorkflowId,
        node_id: Option<String>,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Error, Debug)]
#[error("broadcast rejected: {0}")]
pub struct BroadcastError(pub String);

/// Injected capability through which lifecycle events leave the engine.
///
/// Implementations deliver events to whatever transport the application
/// uses. A failing implementation must not be able to disturb execution;
/// the engine routes every emit through [`EventPublisher`], which logs and
/// swallows errors.
pub trait Broadcaster: Send + Sync {
    fn emit(&self, event: &EngineEvent) -> Result<(), BroadcastError>;
}

/// Broadcaster that drops every event, for tests and quiet embedding
#[derive(Debug, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn emit(&self, _event: &EngineEvent) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// In-process broadcaster over a tokio broadcast channel
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<EngineEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit(&self, event: &EngineEvent) -> Result<(), BroadcastError> {
        // No receivers is not a delivery failure
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Engine-side wrapper around the injected broadcaster. A throwing
/// observer is logged and swallowed, never aborting workflow execution.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<dyn Broadcaster>,
}

impl EventPublisher {
    pub fn new(inner: Arc<dyn Broadcaster>) -> Self {
        Self { inner }
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Err(err) = self.inner.emit(&event) {
            tracing::warn!("broadcaster rejected event: {err}");
        }
    }

    /// Emitter scoped to one node's execution, handed to adapters
    pub fn node_emitter(&self, workflow_id: WorkflowId, node_id: impl Into<String>) -> NodeEmitter {
        NodeEmitter {
            publisher: self.clone(),
            workflow_id,
            node_id: node_id.into(),
        }
    }
}

/// Lets an adapter publish log messages attributed to its node
#[derive(Clone)]
pub struct NodeEmitter {
    publisher: EventPublisher,
    workflow_id: WorkflowId,
    node_id: String,
}

impl NodeEmitter {
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(node_id = %self.node_id, "{message}");
        self.publisher.publish(EngineEvent::Log {
            workflow_id: self.workflow_id,
            node_id: Some(self.node_id.clone()),
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
