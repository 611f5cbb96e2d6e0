use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter, PortSchema};
use serde_json::Value;

/// Entry point of every workflow. Emits the configured trigger payload on
/// its main output.
pub struct StartAdapter;

#[async_trait]
impl NodeAdapter for StartAdapter {
    fn node_type(&self) -> &str {
        node_types::START
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&[], &["main"])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let payload = ctx.config("payload").cloned().unwrap_or(Value::Null);
        Ok(AdapterOutcome::new().with_output("main", payload))
    }
}

/// Terminal node. Its inputs become the recorded result of the path.
pub struct EndAdapter;

#[async_trait]
impl NodeAdapter for EndAdapter {
    fn node_type(&self) -> &str {
        node_types::END
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&["main"], &[])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        Ok(AdapterOutcome::passthrough(&ctx.inputs))
    }
}

/// Branching node: evaluates its expression and routes down the "true" or
/// "false" output port. Untaken targets are never dispatched.
pub struct ConditionAdapter;

impl ConditionAdapter {
    fn evaluate(ctx: &AdapterContext) -> Result<bool, AdapterError> {
        match ctx.config("expression") {
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(s)) => match s.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                // Anything else names an input port to test for truthiness
                port => Ok(ctx.inputs.get(port).map(truthy).unwrap_or(false)),
            },
            Some(other) => Ok(truthy(other)),
            None => Ok(ctx.inputs.get("main").map(truthy).unwrap_or(false)),
        }
    }
}

#[async_trait]
impl NodeAdapter for ConditionAdapter {
    fn node_type(&self) -> &str {
        node_types::CONDITION
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&["main"], &["true", "false"])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let verdict = Self::evaluate(&ctx)?;
        let label = if verdict { "true" } else { "false" };
        ctx.events.info(format!("condition evaluated {label}"));

        let carried = ctx.inputs.get("main").cloned().unwrap_or(Value::Bool(verdict));
        Ok(AdapterOutcome::new()
            .with_output(label, carried)
            .with_branch(label))
    }
}

/// Bounded repetition: takes the "body" branch until the configured
/// iteration count is reached, then exits through "done". The scheduler's
/// global iteration cap backstops a misconfigured count.
pub struct LoopAdapter;

#[async_trait]
impl NodeAdapter for LoopAdapter {
    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&["main"], &["body", "done"])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let count = ctx.config_u64_or("iterations", 1) as u32;
        if ctx.iteration < count {
            ctx.events
                .info(format!("loop iteration {} of {count}", ctx.iteration + 1));
            Ok(AdapterOutcome::new()
                .with_output("body", ctx.iteration)
                .with_branch("body"))
        } else {
            Ok(AdapterOutcome::new()
                .with_output("done", count)
                .with_branch("done"))
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
