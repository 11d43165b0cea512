//! Graph compilation and structural validation.

use miette::Diagnostic;
use thiserror::Error;

use crate::app::App;
use crate::types::NodeKind;

/// Structural problems detected at compile time.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphCompileError {
    /// No edge leaves the virtual `Start` node, so nothing would run.
    #[error("no edges from Start: the graph has no entry point")]
    #[diagnostic(
        code(steward::graphs::no_entry),
        help("Add an edge from NodeKind::Start to the first workflow node.")
    )]
    NoEntryPoint,

    /// An edge references a node that was never registered.
    #[error("edge references unregistered node: {0}")]
    #[diagnostic(
        code(steward::graphs::unknown_node),
        help("Register `{0}` with add_node before wiring edges to it.")
    )]
    UnknownNode(String),

    /// A conditional edge hangs off a node that was never registered.
    #[error("conditional edge from unregistered node: {0}")]
    #[diagnostic(code(steward::graphs::unknown_router_source))]
    UnknownRouterSource(String),
}

impl super::builder::GraphBuilder {
    /// Validates the declared topology and produces an executable [`App`].
    ///
    /// Checks performed:
    /// - at least one edge leaves `Start`;
    /// - every edge endpoint is either virtual or a registered node;
    /// - every conditional edge hangs off a registered node (or `Start`).
    ///
    /// Conditional-edge *targets* are intentionally not checked here: they
    /// are strings produced at runtime and validated against the registry at
    /// evaluation time.
    pub fn compile(self) -> Result<App, GraphCompileError> {
        let start_targets = self.edges_ref().get(&NodeKind::Start);
        let has_start_edge = start_targets.map(|v| !v.is_empty()).unwrap_or(false)
            || self
                .conditional_edges_ref()
                .iter()
                .any(|ce| ce.from() == &NodeKind::Start);
        if !has_start_edge {
            return Err(GraphCompileError::NoEntryPoint);
        }

        for (from, targets) in self.edges_ref() {
            if from.is_custom() && !self.nodes_ref().contains_key(from) {
                return Err(GraphCompileError::UnknownNode(from.to_string()));
            }
            for to in targets {
                if to.is_custom() && !self.nodes_ref().contains_key(to) {
                    return Err(GraphCompileError::UnknownNode(to.to_string()));
                }
            }
        }

        for ce in self.conditional_edges_ref() {
            let from = ce.from();
            if from.is_custom() && !self.nodes_ref().contains_key(from) {
                return Err(GraphCompileError::UnknownRouterSource(from.to_string()));
            }
        }

        let (nodes, edges, conditional_edges, runtime_config, reducer_registry) =
            self.into_parts();
        Ok(App::from_parts(
            nodes,
            edges,
            conditional_edges,
            runtime_config,
            reducer_registry,
        ))
    }
}
