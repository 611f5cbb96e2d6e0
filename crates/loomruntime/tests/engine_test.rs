//! Engine-level tests: scheduling, branching, joins, the concurrency
//! gate, cancellation, failure propagation, and resource cleanup.
//!
//! All node behavior here comes from scripted test adapters registered the
//! same way plugins are, so these tests double as coverage of the
//! plugin-registration path.

use async_trait::async_trait;
use loomcore::{
    node_types, AdapterError, BroadcastError, Broadcaster, Connection, EngineEvent, NodeRunStatus,
    NodeSpec, WorkflowStatus,
};
use loomruntime::{
    AdapterContext, AdapterOutcome, AdapterRegistry, Engine, EngineConfig, NodeAdapter, PortSchema,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Adapter that succeeds immediately and counts its executions
struct Probe {
    node_type: &'static str,
    executions: Arc<AtomicUsize>,
}

impl Probe {
    fn new(node_type: &'static str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let executions = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                node_type,
                executions: executions.clone(),
            }),
            executions,
        )
    }
}

#[async_trait]
impl NodeAdapter for Probe {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(AdapterOutcome::passthrough(&ctx.inputs).with_output("main", ctx.node.id.clone()))
    }
}

/// Adapter that always fails
struct Boom;

#[async_trait]
impl NodeAdapter for Boom {
    fn node_type(&self) -> &str {
        "boom"
    }

    async fn execute(&self, _ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        Err(AdapterError::ExecutionFailed("deliberate failure".into()))
    }
}

/// Adapter that parks until cancelled
struct Block;

#[async_trait]
impl NodeAdapter for Block {
    fn node_type(&self) -> &str {
        "block"
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(300)) => Ok(AdapterOutcome::new()),
            _ = ctx.cancellation.cancelled() => Err(AdapterError::Cancelled),
        }
    }
}

/// Adapter that ignores cancellation and overruns any sane timeout
struct Slow;

#[async_trait]
impl NodeAdapter for Slow {
    fn node_type(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        Ok(AdapterOutcome::new())
    }
}

/// Adapter that opens a temp file and spawns a child process through the
/// resource manager, then optionally fails
struct Scratch;

#[async_trait]
impl NodeAdapter for Scratch {
    fn node_type(&self) -> &str {
        "scratch"
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let (_, path) = ctx
            .resources
            .create_temp_file(ctx.workflow_id, &ctx.node.id)?;
        tokio::fs::write(&path, b"scratch data").await?;

        let child = tokio::process::Command::new("sleep").arg("300").spawn()?;
        ctx.resources.track_process(ctx.workflow_id, &ctx.node.id, child);

        if ctx.config_bool_or("fail", false) {
            return Err(AdapterError::ExecutionFailed("scratch node failed".into()));
        }
        Ok(AdapterOutcome::new().with_output("main", path.display().to_string()))
    }
}

/// Adapter that opens resources and then overruns any sane timeout
struct Linger;

#[async_trait]
impl NodeAdapter for Linger {
    fn node_type(&self) -> &str {
        "linger"
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let (_, path) = ctx
            .resources
            .create_temp_file(ctx.workflow_id, &ctx.node.id)?;
        tokio::fs::write(&path, b"linger data").await?;

        let child = tokio::process::Command::new("sleep").arg("300").spawn()?;
        ctx.resources.track_process(ctx.workflow_id, &ctx.node.id, child);

        tokio::time::sleep(Duration::from_secs(300)).await;
        Ok(AdapterOutcome::new())
    }
}

/// Condition stand-in branching on a config boolean
struct Branch;

#[async_trait]
impl NodeAdapter for Branch {
    fn node_type(&self) -> &str {
        node_types::CONDITION
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&["main"], &["true", "false"])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let verdict = ctx.config_bool_or("expression", false);
        Ok(AdapterOutcome::new()
            .with_output(verdict.to_string(), verdict)
            .with_branch(verdict.to_string()))
    }
}

/// Loop stand-in: takes the body branch `iterations` times, then done
struct Repeat;

#[async_trait]
impl NodeAdapter for Repeat {
    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    fn ports(&self) -> PortSchema {
        PortSchema::new(&["main"], &["body", "done"])
    }

    async fn execute(&self, ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
        let target = ctx.config_u64_or("iterations", 1) as u32;
        if ctx.iteration < target {
            Ok(AdapterOutcome::new()
                .with_output("body", ctx.iteration)
                .with_branch("body"))
        } else {
            Ok(AdapterOutcome::new()
                .with_output("done", ctx.iteration)
                .with_branch("done"))
        }
    }
}

struct Fixture {
    engine: Engine,
    start_count: Arc<AtomicUsize>,
    work_count: Arc<AtomicUsize>,
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let mut registry = AdapterRegistry::new();
    let (start, start_count) = Probe::new(node_types::START);
    let (work, work_count) = Probe::new("work");
    let (end, _) = Probe::new(node_types::END);
    registry.register(start);
    registry.register(work);
    registry.register(end);
    registry.register(Arc::new(Boom));
    registry.register(Arc::new(Block));
    registry.register(Arc::new(Slow));
    registry.register(Arc::new(Scratch));
    registry.register(Arc::new(Linger));
    registry.register(Arc::new(Branch));
    registry.register(Arc::new(Repeat));
    Fixture {
        engine: Engine::with_adapters_and_config(registry, config),
        start_count,
        work_count,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

fn start(id: &str) -> NodeSpec {
    NodeSpec::new(id, node_types::START)
}

fn end(id: &str) -> NodeSpec {
    NodeSpec::new(id, node_types::END)
}

fn node_status(engine: &Engine, workflow: loomcore::WorkflowId, node: &str) -> NodeRunStatus {
    engine
        .get_status(workflow)
        .unwrap()
        .node_state(node)
        .unwrap()
        .status
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_single_start_completes() {
    let fx = fixture();
    let handle = fx.engine.execute(vec![start("s1")], vec![]).await.unwrap();
    let id = handle.workflow_id();

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.status, WorkflowStatus::Completed);
    assert_eq!(summary.completed_nodes, vec!["s1".to_string()]);

    let record = fx.engine.get_status(id).unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(fx.engine.running_count(), 0);
}

#[tokio::test]
async fn scenario_b_condition_follows_true_branch_only() {
    let fx = fixture();
    let nodes = vec![
        start("s1"),
        NodeSpec::new("c1", node_types::CONDITION)
            .with_outputs(&["true", "false"])
            .with_config("expression", true),
        end("e_true"),
        end("e_false"),
    ];
    let connections = vec![
        Connection::main("s1", "c1"),
        Connection::new("c1", 0, "e_true", 0),
        Connection::new("c1", 1, "e_false", 0),
    ];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let summary = handle.wait().await.unwrap();

    assert_eq!(
        summary.completed_nodes,
        vec!["s1".to_string(), "c1".to_string(), "e_true".to_string()]
    );
    assert_eq!(node_status(&fx.engine, id, "e_false"), NodeRunStatus::Pending);
}

#[tokio::test]
async fn completed_path_length_matches_realized_path() {
    let fx = fixture();
    let nodes = vec![
        start("s1"),
        NodeSpec::new("w1", "work"),
        NodeSpec::new("w2", "work"),
        end("e1"),
    ];
    let connections = vec![
        Connection::main("s1", "w1"),
        Connection::main("w1", "w2"),
        Connection::main("w2", "e1"),
    ];

    let summary = fx.engine.execute(nodes, connections).await.unwrap().wait().await.unwrap();
    assert_eq!(summary.completed_nodes.len(), 4);
    assert_eq!(fx.work_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn get_status_after_completion_is_a_repeatable_read() {
    let fx = fixture();
    let handle = fx.engine.execute(vec![start("s1")], vec![]).await.unwrap();
    let id = handle.workflow_id();
    handle.wait().await.unwrap();

    let first = serde_json::to_value(fx.engine.get_status(id).unwrap()).unwrap();
    let second = serde_json::to_value(fx.engine.get_status(id).unwrap()).unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_unknown_type_rejects_before_any_dispatch() {
    let fx = fixture();
    let nodes = vec![start("s1"), NodeSpec::new("x1", "mystery.widget")];
    let connections = vec![Connection::main("s1", "x1")];

    let err = fx.engine.execute(nodes, connections).await.expect_err("must reject");
    assert_eq!(err.kind(), "validation_error");
    assert!(err.to_string().contains("mystery.widget"));

    // Start never dispatched, nothing admitted
    assert_eq!(fx.start_count.load(Ordering::SeqCst), 0);
    assert_eq!(fx.engine.running_count(), 0);
}

#[tokio::test]
async fn missing_start_rejects_with_zero_side_effects() {
    let fx = fixture();
    let err = fx
        .engine
        .execute(vec![NodeSpec::new("e1", node_types::END)], vec![])
        .await
        .expect_err("must reject");
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(fx.engine.running_count(), 0);
}

// ---------------------------------------------------------------------------
// Failure propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adapter_failure_rejects_the_run_future() {
    let fx = fixture();
    let nodes = vec![start("s1"), NodeSpec::new("b1", "boom"), end("e1")];
    let connections = vec![Connection::main("s1", "b1"), Connection::main("b1", "e1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let err = handle.wait().await.expect_err("failed run must reject");
    assert_eq!(err.kind(), "adapter_error");

    let record = fx.engine.get_status(id).unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.node_state("b1").unwrap().status, NodeRunStatus::Error);
    assert!(record.node_state("b1").unwrap().error.is_some());
    // Downstream dispatch halted
    assert_eq!(record.node_state("e1").unwrap().status, NodeRunStatus::Pending);
    assert_eq!(fx.engine.running_count(), 0);
}

#[tokio::test]
async fn node_timeout_is_always_fatal() {
    let fx = fixture_with(EngineConfig {
        node_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    });
    let nodes = vec![start("s1"), NodeSpec::new("sl1", "slow"), end("e1")];
    let connections = vec![Connection::main("s1", "sl1"), Connection::main("sl1", "e1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let err = handle.wait().await.expect_err("timeout must reject");
    assert_eq!(err.kind(), "timeout_error");

    let record = fx.engine.get_status(id).unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.node_state("sl1").unwrap().status, NodeRunStatus::Error);
}

#[tokio::test]
async fn timeout_releases_the_nodes_files_and_processes() {
    let fx = fixture_with(EngineConfig {
        node_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    });
    let nodes = vec![start("s1"), NodeSpec::new("lg1", "linger"), end("e1")];
    let connections = vec![Connection::main("s1", "lg1"), Connection::main("lg1", "e1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let err = handle.wait().await.expect_err("timeout must reject");
    assert_eq!(err.kind(), "timeout_error");

    assert_eq!(fx.engine.resources().open_files(id), 0);
    assert_eq!(fx.engine.resources().active_processes(id), 0);
}

#[tokio::test]
async fn run_failing_at_first_dispatch_still_frees_its_gate_slot() {
    // Regression for the historical leak: a workflow that dies right after
    // admission must still be removed from the running subset.
    let mut registry = AdapterRegistry::new();
    struct FailingStart;
    #[async_trait]
    impl NodeAdapter for FailingStart {
        fn node_type(&self) -> &str {
            node_types::START
        }
        async fn execute(&self, _ctx: AdapterContext) -> Result<AdapterOutcome, AdapterError> {
            Err(AdapterError::ExecutionFailed("setup failed".into()))
        }
    }
    registry.register(Arc::new(FailingStart));
    let engine = Engine::with_adapters(registry);

    let handle = engine.execute(vec![start("s1")], vec![]).await.unwrap();
    let id = handle.workflow_id();
    assert!(handle.wait().await.is_err());

    assert_eq!(engine.running_count(), 0);
    assert_eq!(engine.get_status(id).unwrap().status, WorkflowStatus::Failed);
}

// ---------------------------------------------------------------------------
// Concurrency gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gate_rejects_workflow_beyond_the_ceiling() {
    let fx = fixture_with(EngineConfig {
        max_concurrent_workflows: 2,
        ..EngineConfig::default()
    });
    let blocked = |sid: &str, bid: &str| {
        (
            vec![start(sid), NodeSpec::new(bid, "block")],
            vec![Connection::main(sid, bid)],
        )
    };

    let (n1, c1) = blocked("s1", "b1");
    let (n2, c2) = blocked("s2", "b2");
    let first = fx.engine.execute(n1, c1).await.unwrap();
    let second = fx.engine.execute(n2, c2).await.unwrap();

    // Let both runs reach their blocking node
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.engine.running_count(), 2);

    let (n3, c3) = blocked("s3", "b3");
    let err = fx.engine.execute(n3, c3).await.expect_err("gate is full");
    assert_eq!(err.kind(), "capacity_exceeded");
    assert_eq!(fx.engine.running_count(), 2);

    // Draining a slot re-opens the gate
    assert!(fx.engine.stop(first.workflow_id()));
    assert!(first.wait().await.is_err());
    let (n4, c4) = blocked("s4", "b4");
    let third = fx.engine.execute(n4, c4).await.unwrap();

    fx.engine.stop(second.workflow_id());
    fx.engine.stop(third.workflow_id());
    let _ = second.wait().await;
    let _ = third.wait().await;
    assert_eq!(fx.engine.running_count(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_transitions_to_stopped_and_leaves_later_nodes_pending() {
    let fx = fixture();
    let nodes = vec![start("s1"), NodeSpec::new("b1", "block"), NodeSpec::new("w1", "work")];
    let connections = vec![Connection::main("s1", "b1"), Connection::main("b1", "w1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(fx.engine.stop(id));
    let err = handle.wait().await.expect_err("stopped run must reject");
    assert_eq!(err.kind(), "cancellation_error");

    let record = fx.engine.get_status(id).unwrap();
    assert_eq!(record.status, WorkflowStatus::Stopped);
    assert_eq!(record.node_state("b1").unwrap().status, NodeRunStatus::Skipped);
    assert_eq!(record.node_state("w1").unwrap().status, NodeRunStatus::Pending);
    assert_eq!(fx.work_count.load(Ordering::SeqCst), 0);

    // Stopping a settled workflow is a no-op
    assert!(!fx.engine.stop(id));
}

// ---------------------------------------------------------------------------
// Resource cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resources_are_released_after_success() {
    let fx = fixture();
    let nodes = vec![start("s1"), NodeSpec::new("sc1", "scratch"), end("e1")];
    let connections = vec![Connection::main("s1", "sc1"), Connection::main("sc1", "e1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    handle.wait().await.unwrap();

    assert_eq!(fx.engine.resources().open_files(id), 0);
    assert_eq!(fx.engine.resources().active_processes(id), 0);
}

#[tokio::test]
async fn resources_are_released_after_failure() {
    let fx = fixture();
    let nodes = vec![
        start("s1"),
        NodeSpec::new("sc1", "scratch").with_config("fail", true),
        end("e1"),
    ];
    let connections = vec![Connection::main("s1", "sc1"), Connection::main("sc1", "e1")];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    assert!(handle.wait().await.is_err());

    assert_eq!(fx.engine.resources().open_files(id), 0);
    assert_eq!(fx.engine.resources().active_processes(id), 0);
}

// ---------------------------------------------------------------------------
// Joins and loops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multi_inbound_node_dispatches_on_first_arrival_only() {
    let (join_probe, join_count) = Probe::new("join");
    let mut registry = AdapterRegistry::new();
    let (start_probe, _) = Probe::new(node_types::START);
    let (work_probe, _) = Probe::new("work");
    registry.register(start_probe);
    registry.register(work_probe);
    registry.register(join_probe);
    let engine = Engine::with_adapters(registry);

    let nodes = vec![
        start("s1"),
        NodeSpec::new("p1", "work"),
        NodeSpec::new("p2", "work"),
        NodeSpec::new("j1", "join"),
    ];
    let connections = vec![
        Connection::main("s1", "p1"),
        Connection::main("s1", "p2"),
        Connection::main("p1", "j1"),
        Connection::main("p2", "j1"),
    ];

    let summary = engine.execute(nodes, connections).await.unwrap().wait().await.unwrap();
    assert_eq!(join_count.load(Ordering::SeqCst), 1);
    assert_eq!(summary.completed_nodes.len(), 4);
}

#[tokio::test]
async fn node_fed_by_loop_body_and_side_path_dispatches_once_per_wave() {
    // j1 is inside the loop body but also fed by a side path off the
    // start node. The side path enqueues j1 before the loop takes its
    // body branch; re-opening the body must not let the queued j1 run a
    // second time in the same wave.
    let mut registry = AdapterRegistry::new();
    let (start_probe, _) = Probe::new(node_types::START);
    let (side_probe, side_count) = Probe::new("side");
    let (join_probe, join_count) = Probe::new("join");
    registry.register(start_probe);
    registry.register(side_probe);
    registry.register(join_probe);
    registry.register(Arc::new(Repeat));
    let engine = Engine::with_adapters(registry);

    let nodes = vec![
        start("s1"),
        NodeSpec::new("p1", "side"),
        NodeSpec::new("l1", node_types::LOOP)
            .with_outputs(&["body", "done"])
            .with_config("iterations", 2),
        NodeSpec::new("j1", "join"),
    ];
    let connections = vec![
        Connection::main("s1", "p1"),
        Connection::main("s1", "l1"),
        Connection::main("p1", "j1"),
        Connection::new("l1", 0, "j1", 0),
        Connection::main("j1", "l1"),
    ];

    let handle = engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    handle.wait().await.unwrap();

    // One dispatch per loop iteration, none duplicated by the side path
    assert_eq!(join_count.load(Ordering::SeqCst), 2);
    assert_eq!(side_count.load(Ordering::SeqCst), 1);
    let record = engine.get_status(id).unwrap();
    assert_eq!(record.node_state("j1").unwrap().iterations, 2);
}

#[tokio::test]
async fn loop_reenters_its_body_then_exits_through_done() {
    let fx = fixture();
    let nodes = vec![
        start("s1"),
        NodeSpec::new("l1", node_types::LOOP)
            .with_outputs(&["body", "done"])
            .with_config("iterations", 3),
        NodeSpec::new("w1", "work"),
        end("e1"),
    ];
    let connections = vec![
        Connection::main("s1", "l1"),
        Connection::new("l1", 0, "w1", 0),
        Connection::main("w1", "l1"),
        Connection::new("l1", 1, "e1", 0),
    ];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let summary = handle.wait().await.unwrap();

    assert_eq!(fx.work_count.load(Ordering::SeqCst), 3);
    assert_eq!(summary.completed_nodes.last(), Some(&"e1".to_string()));
    let record = fx.engine.get_status(id).unwrap();
    assert_eq!(record.node_state("w1").unwrap().iterations, 3);
    assert_eq!(record.node_state("l1").unwrap().iterations, 4);
}

#[tokio::test]
async fn runaway_loop_hits_the_iteration_cap_and_fails() {
    let fx = fixture_with(EngineConfig {
        max_loop_iterations: 5,
        ..EngineConfig::default()
    });
    let nodes = vec![
        start("s1"),
        NodeSpec::new("l1", node_types::LOOP)
            .with_outputs(&["body", "done"])
            .with_config("iterations", 1000),
        NodeSpec::new("w1", "work"),
    ];
    let connections = vec![
        Connection::main("s1", "l1"),
        Connection::new("l1", 0, "w1", 0),
        Connection::main("w1", "l1"),
    ];

    let handle = fx.engine.execute(nodes, connections).await.unwrap();
    let id = handle.workflow_id();
    let err = handle.wait().await.expect_err("cap must fail the run");
    assert_eq!(err.kind(), "adapter_error");
    assert!(err.to_string().contains("iteration limit"));
    assert_eq!(fx.engine.get_status(id).unwrap().status, WorkflowStatus::Failed);
}

// ---------------------------------------------------------------------------
// Broadcaster contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn throwing_broadcaster_never_alters_execution() {
    struct Hostile;
    impl Broadcaster for Hostile {
        fn emit(&self, _event: &EngineEvent) -> Result<(), BroadcastError> {
            Err(BroadcastError("observer crashed".into()))
        }
    }

    let mut registry = AdapterRegistry::new();
    let (start_probe, _) = Probe::new(node_types::START);
    registry.register(start_probe);
    let engine = Engine::new(EngineConfig::default(), registry, Arc::new(Hostile));

    let summary = engine.execute(vec![start("s1")], vec![]).await.unwrap().wait().await.unwrap();
    assert_eq!(summary.status, WorkflowStatus::Completed);
}
