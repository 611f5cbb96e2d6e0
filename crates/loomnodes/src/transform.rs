use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use serde_json::Value;

/// Data transform node. The "operation" config key selects the transform:
/// "parse" (JSON text to value), "stringify" (value to pretty JSON text),
/// or "pick" (extract a dotted path from the input value).
pub struct DataTransformAdapter;

#[async_trait]
impl NodeAdapter for DataTransformAdapter {
    fn node_type(&self) -> &str {
        node_types::TRANSFORM
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let operation = ctx.config_str("operation").unwrap_or("parse");
        let input = ctx.require_input("main")?;

        let output = match operation {
            "parse" => {
                let text = input.as_str().ok_or_else(|| {
                    AdapterError::Configuration("parse expects a string input".into())
                })?;
                serde_json::from_str::<Value>(text)
                    .map_err(|e| AdapterError::ExecutionFailed(format!("json parse error: {e}")))?
            }
            "stringify" => {
                let text = serde_json::to_string_pretty(input).map_err(|e| {
                    AdapterError::ExecutionFailed(format!("json stringify error: {e}"))
                })?;
                Value::String(text)
            }
            "pick" => {
                let path = ctx.require_config_str("path")?;
                pick(input, path).cloned().unwrap_or(Value::Null)
            }
            other => {
                return Err(AdapterError::Configuration(format!(
                    "unknown operation: {other}"
                )))
            }
        };

        Ok(AdapterOutcome::new().with_output("main", output))
    }
}

/// Walk a dotted path through objects and array indices
fn pick<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pick_walks_objects_and_arrays() {
        let value = json!({"user": {"emails": ["a@x", "b@x"]}});
        assert_eq!(pick(&value, "user.emails.1"), Some(&json!("b@x")));
        assert_eq!(pick(&value, "user.missing"), None);
        assert_eq!(pick(&value, "user.emails.9"), None);
    }
}
