use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use serde_json::Value;
use std::path::PathBuf;

/// Read a UTF-8 file into the "content" output
pub struct ReadFileAdapter;

#[async_trait]
impl NodeAdapter for ReadFileAdapter {
    fn node_type(&self) -> &str {
        node_types::READ_FILE
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let path = ctx
            .config_str("path")
            .or_else(|| ctx.inputs.get("main").and_then(Value::as_str))
            .ok_or_else(|| AdapterError::Configuration("missing path".into()))?
            .to_string();

        let content = tokio::fs::read_to_string(&path).await?;
        ctx.events.info(format!("read {} bytes from {path}", content.len()));

        Ok(AdapterOutcome::new()
            .with_output("content", content)
            .with_output("path", path))
    }
}

/// Write content to a file. With `"temp": true` the target is a scratch
/// file acquired through the resource manager and removed when this node
/// settles; otherwise `"path"` names a caller-owned destination.
pub struct WriteFileAdapter;

#[async_trait]
impl NodeAdapter for WriteFileAdapter {
    fn node_type(&self) -> &str {
        node_types::WRITE_FILE
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let content = match ctx.inputs.get("main").or_else(|| ctx.config("content")) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => return Err(AdapterError::MissingInput("main".into())),
        };

        let path: PathBuf = if ctx.config_bool_or("temp", false) {
            let (_, path) = ctx
                .resources
                .create_temp_file(ctx.workflow_id, &ctx.node.id)?;
            path
        } else {
            ctx.require_config_str("path")?.into()
        };

        tokio::fs::write(&path, content.as_bytes()).await?;
        ctx.events
            .info(format!("wrote {} bytes to {}", content.len(), path.display()));

        Ok(AdapterOutcome::new()
            .with_output("path", path.display().to_string())
            .with_output("bytes_written", content.len()))
    }
}
