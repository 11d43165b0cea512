//! Edge types and routing predicates.

use crate::types::NodeKind;
use std::sync::Arc;

/// Target name a router returns to terminate the workflow.
pub const END_TARGET: &str = "End";

/// Predicate for conditional routing.
///
/// Evaluated against a [`StateSnapshot`](crate::state::StateSnapshot) after
/// the source node ran; returns the *name* of the next node. `"End"` (or
/// [`END_TARGET`]) terminates the workflow branch. Unknown names are skipped
/// with a warning rather than failing the run.
///
/// ```
/// use steward::graphs::EdgePredicate;
/// use std::sync::Arc;
///
/// // Route to End on any governed error, otherwise continue to review.
/// let after_draft: EdgePredicate = Arc::new(|snapshot| {
///     if snapshot.error_message().is_some() {
///         "End".to_string()
///     } else {
///         "review".to_string()
///     }
/// });
/// ```
pub type EdgePredicate =
    Arc<dyn Fn(crate::state::StateSnapshot) -> String + Send + Sync + 'static>;

/// A conditional edge: a source node plus the router that picks its successor.
#[derive(Clone)]
pub struct ConditionalEdge {
    from: NodeKind,
    predicate: EdgePredicate,
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl ConditionalEdge {
    pub fn new(from: NodeKind, predicate: EdgePredicate) -> Self {
        Self { from, predicate }
    }

    pub fn from(&self) -> &NodeKind {
        &self.from
    }

    pub fn predicate(&self) -> &EdgePredicate {
        &self.predicate
    }
}
