//! GraphBuilder: fluent construction of workflow graphs.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::edges::{ConditionalEdge, EdgePredicate};
use crate::node::Node;
use crate::reducers::ReducerRegistry;
use crate::runtimes::RuntimeConfig;
use crate::types::{ChannelType, NodeKind};

/// Internal parts handed to compilation.
pub(super) type GraphParts = (
    FxHashMap<NodeKind, Arc<dyn Node>>,
    FxHashMap<NodeKind, Vec<NodeKind>>,
    Vec<ConditionalEdge>,
    RuntimeConfig,
    ReducerRegistry,
);

/// Builder for workflow graphs.
///
/// Every graph needs at least one node, an edge out of `NodeKind::Start`,
/// and a path to `NodeKind::End`. `Start`/`End` are virtual: registering a
/// node under either is ignored with a warning.
pub struct GraphBuilder {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    runtime_config: RuntimeConfig,
    reducer_registry: ReducerRegistry,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional_edges: Vec::new(),
            runtime_config: RuntimeConfig::default(),
            reducer_registry: ReducerRegistry::default(),
        }
    }

    /// Registers a node under its identifier.
    #[must_use]
    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        match id {
            NodeKind::Start | NodeKind::End => {
                tracing::warn!(?id, "ignoring registration of virtual node kind");
            }
            _ => {
                self.nodes.insert(id, Arc::new(node));
            }
        }
        self
    }

    /// Registers an already-shared node. Useful when the same implementation
    /// serves several graph positions.
    #[must_use]
    pub fn add_shared_node(mut self, id: NodeKind, node: Arc<dyn Node>) -> Self {
        match id {
            NodeKind::Start | NodeKind::End => {
                tracing::warn!(?id, "ignoring registration of virtual node kind");
            }
            _ => {
                self.nodes.insert(id, node);
            }
        }
        self
    }

    /// Adds an unconditional edge.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Adds a conditional edge whose predicate picks the successor by name.
    ///
    /// When a node has a conditional edge, the runner evaluates it *instead
    /// of* the node's unconditional edges — the router owns the decision.
    #[must_use]
    pub fn add_conditional_edge(mut self, from: NodeKind, predicate: EdgePredicate) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(from, predicate));
        self
    }

    /// Sets the runtime configuration for the compiled application.
    #[must_use]
    pub fn with_runtime_config(mut self, runtime_config: RuntimeConfig) -> Self {
        self.runtime_config = runtime_config;
        self
    }

    /// Registers a custom reducer for a channel.
    #[must_use]
    pub fn with_reducer(
        mut self,
        channel: ChannelType,
        reducer: Arc<dyn crate::reducers::Reducer>,
    ) -> Self {
        self.reducer_registry.register(channel, reducer);
        self
    }

    /// Number of registered (non-virtual) nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of unconditional edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub(super) fn into_parts(self) -> GraphParts {
        (
            self.nodes,
            self.edges,
            self.conditional_edges,
            self.runtime_config,
            self.reducer_registry,
        )
    }

    pub(super) fn nodes_ref(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    pub(super) fn edges_ref(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    pub(super) fn conditional_edges_ref(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }
}
