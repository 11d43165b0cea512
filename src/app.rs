//! Compiled workflow application: topology plus barrier mechanics.
//!
//! [`App`] is what a [`GraphBuilder`](crate::graphs::GraphBuilder) compiles
//! into: the node registry, the edge tables, and the reducer registry that
//! folds node output back into the state. Execution (sessions, stepping,
//! checkpointing, resume) lives in [`WorkflowRunner`](crate::runtimes::WorkflowRunner);
//! [`App::invoke`] is the convenience path that wires one up with the
//! configured checkpointer and runs to completion.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::channels::Channel;
use crate::graphs::ConditionalEdge;
use crate::node::{Node, NodePartial};
use crate::reducers::{ReducerError, ReducerRegistry};
use crate::runtimes::{RunnerError, RuntimeConfig, SessionInit, WorkflowRunner};
use crate::state::VersionedState;
use crate::types::{ChannelType, NodeKind};
use tracing::instrument;

/// An executable workflow graph.
#[derive(Clone)]
pub struct App {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    reducer_registry: ReducerRegistry,
    runtime_config: RuntimeConfig,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("conditional_edges", &self.conditional_edges)
            .field("runtime_config", &self.runtime_config)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Crate-internal factory used by graph compilation.
    pub(crate) fn from_parts(
        nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
        edges: FxHashMap<NodeKind, Vec<NodeKind>>,
        conditional_edges: Vec<ConditionalEdge>,
        runtime_config: RuntimeConfig,
        reducer_registry: ReducerRegistry,
    ) -> Self {
        App {
            nodes,
            edges,
            conditional_edges,
            reducer_registry,
            runtime_config,
        }
    }

    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    #[must_use]
    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }

    #[must_use]
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    /// Folds node partials into the state and bumps versions for every
    /// channel that actually changed.
    ///
    /// Partials are applied in node execution order, so when two nodes in
    /// one step write the same extras key, the later node wins — the same
    /// last-writer-wins rule as within a single partial.
    pub fn apply_barrier(
        &self,
        state: &mut VersionedState,
        partials: Vec<NodePartial>,
    ) -> Result<Vec<ChannelType>, ReducerError> {
        let mut touched: Vec<ChannelType> = Vec::new();
        for partial in &partials {
            for channel in self.reducer_registry.touched_channels(partial) {
                if !touched.contains(&channel) {
                    touched.push(channel);
                }
            }
            self.reducer_registry.apply_all(state, partial)?;
        }

        for channel in &touched {
            match channel {
                ChannelType::Message => state.messages.bump_version(),
                ChannelType::Extra => state.extra.bump_version(),
                ChannelType::Error => state.errors.bump_version(),
            }
        }
        Ok(touched)
    }

    /// Runs the workflow to completion with the configured checkpointer.
    ///
    /// Creates a [`WorkflowRunner`], initializes (or resumes) the session
    /// named by the runtime config's thread id, and drives it until the
    /// frontier reaches `End`.
    #[instrument(skip(self, initial_state), err)]
    pub async fn invoke(
        &self,
        initial_state: VersionedState,
    ) -> Result<VersionedState, RunnerError> {
        let mut runner = WorkflowRunner::new(self.clone()).await;
        let thread_id = self
            .runtime_config
            .thread_id
            .clone()
            .unwrap_or_else(|| "adhoc".to_string());

        let init = runner
            .create_session(thread_id.clone(), initial_state)
            .await?;
        if let SessionInit::Resumed { checkpoint_step } = init {
            tracing::info!(%thread_id, checkpoint_step, "resuming session from checkpoint");
        }
        runner.run_until_complete(&thread_id).await
    }
}
