//! Workflow graph definition and compilation.
//!
//! Governance workflows are declared bottom-up: nodes are registered by
//! name, then edges (unconditional and conditional) are added between
//! names, then [`GraphBuilder::compile`] validates the topology and
//! produces an executable [`App`](crate::app::App). Routers never hold
//! node references — a conditional edge returns the *name* of the next
//! node and the runner resolves it at evaluation time, which is what lets
//! review loops point back at the drafter without cyclic ownership.
//!
//! ```
//! use steward::graphs::GraphBuilder;
//! use steward::types::NodeKind;
//! use steward::node::{Node, NodeContext, NodeError, NodePartial};
//! use steward::state::StateSnapshot;
//! use async_trait::async_trait;
//!
//! struct Draft;
//!
//! #[async_trait]
//! impl Node for Draft {
//!     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
//!         Ok(NodePartial::default())
//!     }
//! }
//!
//! let app = GraphBuilder::new()
//!     .add_node(NodeKind::Custom("draft".into()), Draft)
//!     .add_edge(NodeKind::Start, NodeKind::Custom("draft".into()))
//!     .add_edge(NodeKind::Custom("draft".into()), NodeKind::End)
//!     .compile()
//!     .unwrap();
//! # let _ = app;
//! ```

mod builder;
mod compilation;
mod edges;

pub use builder::GraphBuilder;
pub use compilation::GraphCompileError;
pub use edges::{ConditionalEdge, EdgePredicate, END_TARGET};
