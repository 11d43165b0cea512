//! Engine behavior: stepping, routing, checkpoint round-trip, resume.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use steward::graphs::{EdgePredicate, GraphBuilder};
use steward::node::{Node, NodeContext, NodeError, NodePartial};
use steward::runtimes::{
    Checkpointer, InMemoryCheckpointer, RunnerError, RuntimeConfig, SessionInit, WorkflowRunner,
};
use steward::state::{StateSnapshot, VersionedState};
use steward::types::NodeKind;

/// Bumps a counter key each time it runs.
struct CountingNode {
    key: &'static str,
}

#[async_trait]
impl Node for CountingNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let current = snapshot.get_u64(self.key).unwrap_or(0);
        Ok(NodePartial::new().set(self.key, json!(current + 1)))
    }
}

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

/// Linear graph: Start -> a -> b -> End.
fn linear_app() -> steward::app::App {
    GraphBuilder::new()
        .add_node(custom("a"), CountingNode { key: "a_runs" })
        .add_node(custom("b"), CountingNode { key: "b_runs" })
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_edge(custom("b"), NodeKind::End)
        .compile()
        .unwrap()
}

#[tokio::test]
async fn linear_graph_runs_each_node_once() {
    let app = linear_app();
    let mut runner = WorkflowRunner::new(app).await;
    runner
        .create_session("t1".to_string(), VersionedState::default())
        .await
        .unwrap();
    let final_state = runner.run_until_complete("t1").await.unwrap();
    let snap = final_state.snapshot();
    assert_eq!(snap.get_u64("a_runs"), Some(1));
    assert_eq!(snap.get_u64("b_runs"), Some(1));
}

#[tokio::test]
async fn conditional_loop_respects_router_decisions() {
    // a loops on itself until its counter reaches 3, then routes to End.
    let route: EdgePredicate = Arc::new(|snapshot: StateSnapshot| {
        if snapshot.get_u64("a_runs").unwrap_or(0) >= 3 {
            "End".to_string()
        } else {
            "a".to_string()
        }
    });
    let app = GraphBuilder::new()
        .add_node(custom("a"), CountingNode { key: "a_runs" })
        .add_edge(NodeKind::Start, custom("a"))
        .add_conditional_edge(custom("a"), route)
        .compile()
        .unwrap();

    let mut runner = WorkflowRunner::new(app).await;
    runner
        .create_session("loop".to_string(), VersionedState::default())
        .await
        .unwrap();
    let final_state = runner.run_until_complete("loop").await.unwrap();
    assert_eq!(final_state.snapshot().get_u64("a_runs"), Some(3));
}

#[tokio::test]
async fn unknown_router_target_is_skipped_and_run_terminates() {
    let route: EdgePredicate = Arc::new(|_s: StateSnapshot| "ghost".to_string());
    let app = GraphBuilder::new()
        .add_node(custom("a"), CountingNode { key: "a_runs" })
        .add_edge(NodeKind::Start, custom("a"))
        .add_conditional_edge(custom("a"), route)
        .compile()
        .unwrap();

    let mut runner = WorkflowRunner::new(app).await;
    runner
        .create_session("ghost".to_string(), VersionedState::default())
        .await
        .unwrap();
    // Skipping the invalid target leaves an empty frontier: terminal.
    let final_state = runner.run_until_complete("ghost").await.unwrap();
    assert_eq!(final_state.snapshot().get_u64("a_runs"), Some(1));
}

#[tokio::test]
async fn runaway_loops_hit_the_step_budget() {
    let route: EdgePredicate = Arc::new(|_s: StateSnapshot| "a".to_string());
    let app = GraphBuilder::new()
        .add_node(custom("a"), CountingNode { key: "a_runs" })
        .add_edge(NodeKind::Start, custom("a"))
        .add_conditional_edge(custom("a"), route)
        .with_runtime_config(RuntimeConfig::default().with_max_steps(10))
        .compile()
        .unwrap();

    let mut runner = WorkflowRunner::new(app).await;
    runner
        .create_session("runaway".to_string(), VersionedState::default())
        .await
        .unwrap();
    let err = runner.run_until_complete("runaway").await.unwrap_err();
    assert!(matches!(err, RunnerError::MaxSteps { limit: 10 }));
}

#[tokio::test]
async fn checkpoint_round_trip_reproduces_state_at_each_step() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let app = linear_app();
    let mut runner = WorkflowRunner::with_checkpointer(app, checkpointer.clone());
    runner
        .create_session("rt".to_string(), VersionedState::default())
        .await
        .unwrap();

    let report = runner.run_step("rt").await.unwrap();
    assert_eq!(report.ran_nodes, vec![custom("a")]);

    // The checkpoint after step 1 matches the live session exactly.
    let cp = checkpointer.load_latest("rt").await.unwrap().unwrap();
    assert_eq!(cp.step, 1);
    assert_eq!(cp.frontier, vec![custom("b")]);
    assert_eq!(cp.state.snapshot().get_u64("a_runs"), Some(1));
    assert_eq!(cp.state.snapshot().get_u64("b_runs"), None);
}

#[tokio::test]
async fn resume_continues_the_interrupted_trajectory() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());

    // First runner: run exactly one step, then drop it (simulated
    // interrupt — the checkpoint survives, the session map does not).
    {
        let mut runner = WorkflowRunner::with_checkpointer(linear_app(), checkpointer.clone());
        runner
            .create_session("resume".to_string(), VersionedState::default())
            .await
            .unwrap();
        runner.run_step("resume").await.unwrap();
    }

    // Second runner resumes from the checkpoint and finishes the run.
    let mut runner = WorkflowRunner::with_checkpointer(linear_app(), checkpointer.clone());
    let init = runner
        .create_session("resume".to_string(), VersionedState::default())
        .await
        .unwrap();
    assert_eq!(init, SessionInit::Resumed { checkpoint_step: 1 });

    let final_state = runner.run_until_complete("resume").await.unwrap();
    let snap = final_state.snapshot();
    // Node a did not run a second time; node b ran exactly once.
    assert_eq!(snap.get_u64("a_runs"), Some(1));
    assert_eq!(snap.get_u64("b_runs"), Some(1));
}

#[tokio::test]
async fn fresh_session_without_checkpoint_starts_fresh() {
    let mut runner = WorkflowRunner::new(linear_app()).await;
    let init = runner
        .create_session("fresh".to_string(), VersionedState::default())
        .await
        .unwrap();
    assert_eq!(init, SessionInit::Fresh);
}

#[tokio::test]
async fn sqlite_checkpointer_round_trips_across_connections() {
    use chrono::Utc;
    use steward::runtimes::{Checkpoint, SqliteCheckpointer};

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("workflow.db");

    let mut state = VersionedState::default();
    state.add_extra("iteration_count", json!(4));

    {
        let store = SqliteCheckpointer::connect(&db_path).await.unwrap();
        for step in 1..=3u64 {
            store
                .save(Checkpoint {
                    thread_id: "lld-42".to_string(),
                    step,
                    state: state.clone(),
                    frontier: vec![custom("review")],
                    created_at: Utc::now(),
                    ran_nodes: vec![custom("generate_draft")],
                    updated_channels: vec!["extra".to_string()],
                })
                .await
                .unwrap();
        }
    }

    // A fresh connection sees the latest step and the full history.
    let store = SqliteCheckpointer::connect(&db_path).await.unwrap();
    let latest = store.load_latest("lld-42").await.unwrap().unwrap();
    assert_eq!(latest.step, 3);
    assert_eq!(latest.frontier, vec![custom("review")]);
    assert_eq!(
        latest.state.snapshot().get_u64("iteration_count"),
        Some(4)
    );

    let history = store.step_history("lld-42").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history.iter().map(|c| c.step).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    assert_eq!(store.list_threads().await.unwrap(), vec!["lld-42"]);
    assert!(store.load_latest("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn step_outputs_expose_the_node_partial_stream() {
    let app = linear_app();
    let mut runner = WorkflowRunner::new(app).await;
    runner
        .create_session("stream".to_string(), VersionedState::default())
        .await
        .unwrap();

    let mut seen: Vec<(NodeKind, bool)> = Vec::new();
    loop {
        let report = runner.run_step("stream").await.unwrap();
        for (kind, partial) in &report.outputs {
            seen.push((kind.clone(), partial.extra.is_some()));
        }
        if report.completed {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![(custom("a"), true), (custom("b"), true)]
    );
}
