use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loomcore::{
    node_types, ChannelBroadcaster, Connection, EngineEvent, LogLevel, NodeSpec,
    WorkflowDefinition,
};
use loomruntime::{AdapterRegistry, Engine, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Workflow execution engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, verbose } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            run_workflow(file).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_definition(file: &PathBuf) -> Result<WorkflowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))
}

fn new_engine() -> (Engine, Arc<ChannelBroadcaster>) {
    let mut registry = AdapterRegistry::new();
    loomnodes::register_all(&mut registry);
    let bus = Arc::new(ChannelBroadcaster::new(256));
    let engine = Engine::new(EngineConfig::default(), registry, bus.clone());
    (engine, bus)
}

async fn run_workflow(file: PathBuf) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let definition = load_definition(&file)?;

    println!("📋 Workflow: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Connections: {}", definition.connections.len());
    println!();

    let (engine, bus) = new_engine();
    let mut events = bus.subscribe();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let handle = engine
        .execute(definition.nodes, definition.connections)
        .await?;
    let workflow_id = handle.workflow_id();

    // Ctrl-C requests a cooperative stop instead of tearing the process down
    let result = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("🛑 Stop requested, waiting for the running node to yield...");
            engine.stop(workflow_id);
            // The run task keeps going until the scheduler observes the stop
            while !engine
                .get_status(workflow_id)
                .map(|r| r.status.is_terminal())
                .unwrap_or(true)
            {
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(loomcore::EngineError::Cancelled { workflow_id })
        }
    };

    // Give the event printer a moment to drain
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();
    println!();

    match result {
        Ok(summary) => {
            println!("📊 Execution Summary:");
            println!("   Workflow ID: {}", summary.workflow_id);
            println!("   Completed: {} nodes", summary.completed_nodes.len());
            println!("   Duration: {}ms", summary.duration_ms);
            Ok(())
        }
        Err(err) => {
            println!("📊 Run did not complete ({}):", err.kind());
            println!("   {err}");
            Err(err.into())
        }
    }
}

fn print_event(event: EngineEvent) {
    match event {
        EngineEvent::WorkflowStarted { node_count, .. } => {
            println!("▶️  Workflow started ({node_count} nodes)");
        }
        EngineEvent::NodeStarted {
            node_id,
            node_type,
            iteration,
            ..
        } => {
            if iteration > 0 {
                println!("  ⚡ Starting node: {node_id} ({node_type}) [iteration {iteration}]");
            } else {
                println!("  ⚡ Starting node: {node_id} ({node_type})");
            }
        }
        EngineEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {node_id} completed in {duration_ms}ms");
        }
        EngineEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {node_id} failed: {error}");
        }
        EngineEvent::Log {
            node_id,
            level,
            message,
            ..
        } => {
            let icon = match level {
                LogLevel::Info => "ℹ️ ",
                LogLevel::Warn => "⚠️ ",
                LogLevel::Error => "❌",
            };
            let node_id = node_id.unwrap_or_default();
            println!("     {icon} [{node_id}] {message}");
        }
        EngineEvent::WorkflowCompleted {
            completed_nodes,
            duration_ms,
            ..
        } => {
            println!("✨ Workflow completed: {completed_nodes} nodes in {duration_ms}ms");
        }
        EngineEvent::WorkflowFailed {
            node_id,
            error,
            error_kind,
            ..
        } => {
            let at = node_id.unwrap_or_else(|| "-".into());
            println!("💥 Workflow failed at {at} ({error_kind}): {error}");
        }
        EngineEvent::WorkflowStopped {
            completed_nodes, ..
        } => {
            println!("🛑 Workflow stopped after {completed_nodes} nodes");
        }
    }
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let definition = load_definition(&file)?;

    let (engine, _) = new_engine();
    match engine.validate_graph(&definition.nodes, &definition.connections) {
        Ok(()) => {
            println!("✅ Workflow is valid:");
            println!("   Name: {}", definition.name);
            println!("   Nodes: {}", definition.nodes.len());
            println!("   Connections: {}", definition.connections.len());
            Ok(())
        }
        Err(err) => {
            println!("❌ Invalid workflow ({}): {err}", err.kind());
            Err(err.into())
        }
    }
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let (engine, _) = new_engine();
    for node_type in engine.node_types() {
        println!("  • {node_type}");
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let definition = WorkflowDefinition {
        name: "Example HTTP Workflow".into(),
        description: Some("Fetches data from an API and logs the result".into()),
        nodes: vec![
            NodeSpec::new("start", node_types::START).with_position(100.0, 100.0),
            NodeSpec::new("fetch", node_types::HTTP_REQUEST)
                .with_name("Fetch Data")
                .with_config("url", "https://api.github.com/zen")
                .with_config("method", "GET")
                .with_outputs(&["status", "body", "headers"])
                .with_position(300.0, 100.0),
            NodeSpec::new("log", node_types::LOGGER)
                .with_name("Log Response")
                .with_position(500.0, 100.0),
            NodeSpec::new("end", node_types::END).with_position(700.0, 100.0),
        ],
        connections: vec![
            Connection::main("start", "fetch"),
            Connection::new("fetch", 1, "log", 0),
            Connection::main("log", "end"),
        ],
    };

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  loom run --file {}", output.display());

    Ok(())
}
