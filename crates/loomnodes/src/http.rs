use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use serde_json::{Map, Value};

/// HTTP request node backed by a shared reqwest client
pub struct HttpRequestAdapter {
    client: reqwest::Client,
}

impl HttpRequestAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeAdapter for HttpRequestAdapter {
    fn node_type(&self) -> &str {
        node_types::HTTP_REQUEST
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let url = ctx
            .config_str("url")
            .or_else(|| ctx.inputs.get("main").and_then(Value::as_str))
            .ok_or_else(|| AdapterError::Configuration("missing url".into()))?
            .to_string();
        let method = ctx.config_str("method").unwrap_or("GET").to_uppercase();

        ctx.events.info(format!("{method} {url}"));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            other => {
                return Err(AdapterError::Configuration(format!(
                    "unsupported method: {other}"
                )))
            }
        };

        if let Some(body) = ctx.inputs.get("body").or_else(|| ctx.config("body")) {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }
        if let Some(Value::Object(headers)) = ctx.config("headers") {
            for (key, value) in headers {
                if let Some(text) = value.as_str() {
                    request = request.header(key, text);
                }
            }
        }

        let response = tokio::select! {
            result = request.send() => result
                .map_err(|e| AdapterError::ExecutionFailed(format!("http request failed: {e}")))?,
            _ = ctx.cancellation.cancelled() => return Err(AdapterError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::ExecutionFailed(format!("failed to read response: {e}")))?;

        ctx.events.info(format!("response status {status}"));

        Ok(AdapterOutcome::new()
            .with_output("status", status)
            .with_output("body", body)
            .with_output("headers", Value::Object(headers)))
    }
}
