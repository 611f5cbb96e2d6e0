use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use tokio::time::{sleep, Duration};

/// Pause the path for a configured number of milliseconds, then pass
/// inputs through. Responds to a stop request immediately.
pub struct DelayAdapter;

#[async_trait]
impl NodeAdapter for DelayAdapter {
    fn node_type(&self) -> &str {
        node_types::DELAY
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let delay_ms = ctx.config_u64_or("delay_ms", 1000);
        ctx.events.info(format!("delaying {delay_ms}ms"));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {
                Ok(AdapterOutcome::passthrough(&ctx.inputs))
            }
            _ = ctx.cancellation.cancelled() => Err(AdapterError::Cancelled),
        }
    }
}
