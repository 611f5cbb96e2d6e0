use async_trait::async_trait;
use loomcore::{node_types, AdapterError, LogLevel};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use serde_json::Value;

/// Publishes a log message through the broadcaster and passes its inputs
/// through unchanged
pub struct LoggerAdapter;

#[async_trait]
impl NodeAdapter for LoggerAdapter {
    fn node_type(&self) -> &str {
        node_types::LOGGER
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let message = ctx
            .config_str("message")
            .map(str::to_string)
            .or_else(|| ctx.inputs.get("main").map(render))
            .unwrap_or_else(|| "(no message)".to_string());

        let level = match ctx.config_str("level").unwrap_or("info") {
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        };
        ctx.events.log(level, message);

        Ok(AdapterOutcome::passthrough(&ctx.inputs))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
