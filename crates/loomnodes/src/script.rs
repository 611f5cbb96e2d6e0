use async_trait::async_trait;
use loomcore::{node_types, AdapterError};
use loomruntime::{AdapterContext, AdapterOutcome, NodeAdapter};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Run a subprocess: either a configured command with arguments, or an
/// inline script body written to a managed temp file and handed to an
/// interpreter.
///
/// The child process is tracked through the resource manager, so a node
/// that never reaches its wait (error, timeout) still gets the child
/// killed when it settles. A stop request terminates the child directly.
pub struct ExecuteScriptAdapter;

#[async_trait]
impl NodeAdapter for ExecuteScriptAdapter {
    fn node_type(&self) -> &str {
        node_types::EXECUTE_SCRIPT
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let (program, args) = resolve_command(&ctx).await?;

        ctx.events.info(format!("running {program} {}", args.join(" ")));
        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::ExecutionFailed(format!("failed to spawn {program}: {e}")))?;

        let handle = ctx
            .resources
            .track_process(ctx.workflow_id, &ctx.node.id, child);
        let mut child = handle
            .take()
            .ok_or_else(|| AdapterError::ExecutionFailed("child already reclaimed".into()))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let reap = async {
            let out = async {
                let mut buf = Vec::new();
                if let Some(pipe) = stdout_pipe.as_mut() {
                    pipe.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
            };
            let err = async {
                let mut buf = Vec::new();
                if let Some(pipe) = stderr_pipe.as_mut() {
                    pipe.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
            };
            let (out, err) = tokio::join!(out, err);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out?, err?))
        };

        let (status, stdout, stderr) = tokio::select! {
            result = reap => result?,
            _ = ctx.cancellation.cancelled() => {
                // kill_on_drop reaps the child when this scope unwinds
                return Err(AdapterError::Cancelled);
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        if !status.success() && !ctx.config_bool_or("allow_failure", false) {
            return Err(AdapterError::ExecutionFailed(format!(
                "script exited with code {exit_code}: {}",
                stderr.trim()
            )));
        }

        Ok(AdapterOutcome::new()
            .with_output("exit_code", exit_code)
            .with_output("stdout", stdout)
            .with_output("stderr", stderr))
    }
}

/// Work out what to spawn: an explicit command, or an interpreter plus a
/// scratch file holding the inline script body
async fn resolve_command(ctx: &AdapterContext) -> Result<(String, Vec<String>), AdapterError> {
    if let Some(command) = ctx.config_str("command") {
        let args = match ctx.config("args") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(_) => {
                return Err(AdapterError::Configuration("args must be an array".into()));
            }
            None => Vec::new(),
        };
        return Ok((command.to_string(), args));
    }

    let script = ctx
        .config_str("script")
        .ok_or_else(|| AdapterError::Configuration("missing command or script".into()))?;
    let interpreter = ctx.config_str("interpreter").unwrap_or("sh").to_string();

    let (_, path) = ctx
        .resources
        .create_temp_file(ctx.workflow_id, &ctx.node.id)?;
    tokio::fs::write(&path, script).await?;

    Ok((interpreter, vec![path.display().to_string()]))
}
