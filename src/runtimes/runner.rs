//! Session runner: drives a compiled [`App`](crate::app::App) step by step.
//!
//! One session per workflow thread, keyed by thread id. Each step the
//! runner executes the frontier nodes in order, folds their partials at
//! the barrier, persists a checkpoint, and evaluates outgoing edges to
//! compute the next frontier. Governance graphs are totally ordered, so
//! frontiers are almost always a single node; the runner still handles
//! fan-out deterministically by declaration order.
//!
//! # Edge evaluation
//!
//! For every node that ran this step:
//! - if the node has a conditional edge, its router is evaluated against
//!   the *post-barrier* snapshot and the returned name is resolved against
//!   the node registry (`"End"` is always valid; unknown names are skipped
//!   with a warning);
//! - otherwise the node's unconditional edges are followed.
//!
//! Routers therefore see every key their node just wrote, which is what
//! makes `error_message`-based termination reliable.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::app::App;
use crate::channels::errors::{CausedError, ErrorEvent};
use crate::node::{NodeContext, NodeError, NodePartial};
use crate::reducers::ReducerError;
use crate::runtimes::{
    restore_session_state, Checkpoint, Checkpointer, CheckpointerError, CheckpointerType,
    InMemoryCheckpointer, SqliteCheckpointer,
};
use crate::state::VersionedState;
use crate::types::NodeKind;

/// Session state persisted across steps.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub state: VersionedState,
    pub step: u64,
    pub frontier: Vec<NodeKind>,
}

/// Result of one engine step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u64,
    pub ran_nodes: Vec<NodeKind>,
    /// Per-node partial updates, in execution order. This is the streaming
    /// surface: callers iterating step by step observe exactly the
    /// `{node_name: partial_state}` sequence the workflow produced.
    pub outputs: Vec<(NodeKind, NodePartial)>,
    pub updated_channels: Vec<String>,
    pub next_frontier: Vec<NodeKind>,
    pub completed: bool,
}

/// How a session came into being.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInit {
    Fresh,
    Resumed { checkpoint_step: u64 },
}

#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("session not found: {thread_id}")]
    #[diagnostic(code(steward::runner::session_not_found))]
    SessionNotFound { thread_id: String },

    #[error("no nodes to run from Start (empty frontier)")]
    #[diagnostic(
        code(steward::runner::no_start_nodes),
        help("Add edges from NodeKind::Start so the graph has an entry point.")
    )]
    NoStartNodes,

    #[error("node {kind} failed at step {step}: {source}")]
    #[diagnostic(code(steward::runner::node))]
    NodeRun {
        kind: String,
        step: u64,
        #[source]
        source: NodeError,
    },

    #[error("step budget exhausted after {limit} steps")]
    #[diagnostic(
        code(steward::runner::max_steps),
        help("A router is looping without steering to End; check iteration caps.")
    )]
    MaxSteps { limit: u64 },

    #[error(transparent)]
    #[diagnostic(code(steward::runner::checkpointer))]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(code(steward::runner::barrier))]
    Barrier(#[from] ReducerError),
}

/// Runtime execution engine with session management and checkpointing.
pub struct WorkflowRunner {
    app: Arc<App>,
    sessions: FxHashMap<String, SessionState>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    autosave: bool,
}

impl WorkflowRunner {
    /// Creates a runner using the app's configured checkpointer type.
    pub async fn new(app: App) -> Self {
        let checkpointer_type = app.runtime_config().checkpointer.clone();
        Self::with_options(app, checkpointer_type, true).await
    }

    /// Creates a runner with explicit checkpointer selection and autosave
    /// toggle.
    pub async fn with_options(
        app: App,
        checkpointer_type: Option<CheckpointerType>,
        autosave: bool,
    ) -> Self {
        let checkpointer = match checkpointer_type {
            None => None,
            Some(CheckpointerType::InMemory) => {
                Some(Arc::new(InMemoryCheckpointer::new()) as Arc<dyn Checkpointer>)
            }
            Some(CheckpointerType::Sqlite) => {
                let path = app.runtime_config().resolve_db_path("steward.db");
                match SqliteCheckpointer::connect(&path).await {
                    Ok(cp) => Some(Arc::new(cp) as Arc<dyn Checkpointer>),
                    Err(e) => {
                        tracing::error!(db = %path.display(), error = %e,
                            "sqlite checkpointer initialization failed; running without persistence");
                        None
                    }
                }
            }
        };
        Self {
            app: Arc::new(app),
            sessions: FxHashMap::default(),
            checkpointer,
            autosave,
        }
    }

    /// Creates a runner backed by a caller-supplied checkpointer (used by
    /// tests and by runners that share a store across workflows).
    pub fn with_checkpointer(app: App, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            app: Arc::new(app),
            sessions: FxHashMap::default(),
            checkpointer: Some(checkpointer),
            autosave: true,
        }
    }

    /// Initializes a session, resuming from the latest checkpoint when one
    /// exists for the thread id.
    #[instrument(skip(self, initial_state), err)]
    pub async fn create_session(
        &mut self,
        thread_id: String,
        initial_state: VersionedState,
    ) -> Result<SessionInit, RunnerError> {
        if let Some(cp) = &self.checkpointer {
            if let Some(stored) = cp.load_latest(&thread_id).await? {
                let restored = restore_session_state(&stored);
                self.sessions.insert(thread_id, restored);
                return Ok(SessionInit::Resumed {
                    checkpoint_step: stored.step,
                });
            }
        }

        let frontier = self
            .app
            .edges()
            .get(&NodeKind::Start)
            .cloned()
            .unwrap_or_default();
        if frontier.is_empty() {
            return Err(RunnerError::NoStartNodes);
        }
        let session = SessionState {
            state: initial_state,
            step: 0,
            frontier,
        };
        self.sessions.insert(thread_id.clone(), session.clone());
        if let Some(cp) = &self.checkpointer {
            cp.save(Checkpoint::from_session(&thread_id, &session))
                .await?;
        }
        Ok(SessionInit::Fresh)
    }

    /// Executes one step for the session: run frontier, merge, checkpoint,
    /// route.
    #[instrument(skip(self), err)]
    pub async fn run_step(&mut self, thread_id: &str) -> Result<StepReport, RunnerError> {
        let mut session = self
            .sessions
            .get(thread_id)
            .ok_or_else(|| RunnerError::SessionNotFound {
                thread_id: thread_id.to_string(),
            })?
            .clone();

        if Self::is_terminal(&session.frontier) {
            return Ok(StepReport {
                step: session.step,
                ran_nodes: vec![],
                outputs: vec![],
                updated_channels: vec![],
                next_frontier: vec![],
                completed: true,
            });
        }

        session.step += 1;
        let step = session.step;
        let snapshot = session.state.snapshot();

        // Run the frontier sequentially in declaration order.
        let mut ran_nodes: Vec<NodeKind> = Vec::new();
        let mut outputs: Vec<(NodeKind, NodePartial)> = Vec::new();
        for kind in session.frontier.clone() {
            if !kind.is_custom() {
                continue;
            }
            let node = match self.app.nodes().get(&kind) {
                Some(node) => Arc::clone(node),
                None => {
                    tracing::warn!(node = %kind, "frontier references unregistered node; skipping");
                    continue;
                }
            };
            let ctx = NodeContext {
                node_id: kind.to_string(),
                step,
                thread_id: thread_id.to_string(),
            };
            tracing::debug!(node = %kind, step, "running node");
            match node.run(snapshot.clone(), ctx).await {
                Ok(partial) => {
                    ran_nodes.push(kind.clone());
                    outputs.push((kind, partial));
                }
                Err(e) => {
                    // Record the failure in the errors channel before
                    // surfacing it, so the checkpointed state explains what
                    // happened.
                    let event = ErrorEvent::node(kind.encode(), step, CausedError::msg(e.to_string()));
                    let partial = NodePartial::new().with_errors(vec![event]);
                    let _ = self.app.apply_barrier(&mut session.state, vec![partial]);
                    self.sessions.insert(thread_id.to_string(), session.clone());
                    if self.autosave {
                        if let Some(cp) = &self.checkpointer {
                            let _ = cp.save(Checkpoint::from_session(thread_id, &session)).await;
                        }
                    }
                    return Err(RunnerError::NodeRun {
                        kind: kind.to_string(),
                        step,
                        source: e,
                    });
                }
            }
        }

        // Barrier: fold partials into the state.
        let partials: Vec<NodePartial> = outputs.iter().map(|(_, p)| p.clone()).collect();
        let updated = self.app.apply_barrier(&mut session.state, partials)?;
        let updated_channels: Vec<String> = updated.iter().map(|c| c.to_string()).collect();

        // Route on the post-barrier snapshot.
        let next_frontier = self.compute_next_frontier(&ran_nodes, &session.state);
        session.frontier = next_frontier.clone();

        self.sessions.insert(thread_id.to_string(), session.clone());
        if self.autosave {
            if let Some(cp) = &self.checkpointer {
                cp.save(Checkpoint::from_step(
                    thread_id,
                    &session,
                    ran_nodes.clone(),
                    updated_channels.clone(),
                ))
                .await?;
            }
        }

        let completed = Self::is_terminal(&next_frontier);
        Ok(StepReport {
            step,
            ran_nodes,
            outputs,
            updated_channels,
            next_frontier,
            completed,
        })
    }

    /// Runs until the frontier reaches `End` or empties.
    #[instrument(skip(self), err)]
    pub async fn run_until_complete(
        &mut self,
        thread_id: &str,
    ) -> Result<VersionedState, RunnerError> {
        let max_steps = self.app.runtime_config().max_steps;
        loop {
            let session =
                self.sessions
                    .get(thread_id)
                    .ok_or_else(|| RunnerError::SessionNotFound {
                        thread_id: thread_id.to_string(),
                    })?;
            if Self::is_terminal(&session.frontier) {
                tracing::info!(thread = %thread_id, step = session.step, "workflow complete");
                break;
            }
            if session.step >= max_steps {
                return Err(RunnerError::MaxSteps { limit: max_steps });
            }
            let report = self.run_step(thread_id).await?;
            if report.completed {
                break;
            }
        }

        let session = self
            .sessions
            .get(thread_id)
            .ok_or_else(|| RunnerError::SessionNotFound {
                thread_id: thread_id.to_string(),
            })?;
        Ok(session.state.clone())
    }

    /// Snapshot of a live session.
    #[must_use]
    pub fn get_session(&self, thread_id: &str) -> Option<&SessionState> {
        self.sessions.get(thread_id)
    }

    fn is_terminal(frontier: &[NodeKind]) -> bool {
        frontier.is_empty() || frontier.iter().all(|n| *n == NodeKind::End)
    }

    fn compute_next_frontier(
        &self,
        ran_nodes: &[NodeKind],
        state: &VersionedState,
    ) -> Vec<NodeKind> {
        let snapshot = state.snapshot();
        let mut next: Vec<NodeKind> = Vec::new();
        for id in ran_nodes {
            let routers: Vec<_> = self
                .app
                .conditional_edges()
                .iter()
                .filter(|ce| ce.from() == id)
                .collect();

            if routers.is_empty() {
                if let Some(dests) = self.app.edges().get(id) {
                    for d in dests {
                        if !next.contains(d) {
                            next.push(d.clone());
                        }
                    }
                }
                continue;
            }

            for ce in routers {
                let target_name = (ce.predicate())(snapshot.clone());
                let target = NodeKind::from(target_name.as_str());
                let valid = match &target {
                    NodeKind::End | NodeKind::Start => true,
                    NodeKind::Custom(_) => self.app.nodes().contains_key(&target),
                };
                if valid {
                    tracing::debug!(from = %id, to = %target, "conditional edge routed");
                    if !next.contains(&target) {
                        next.push(target);
                    }
                } else {
                    tracing::warn!(from = %id, target = %target_name,
                        "conditional edge target does not exist; skipping");
                }
            }
        }
        next
    }
}
