//! Node execution framework.
//!
//! A workflow node is a unit of work: it receives the current
//! [`StateSnapshot`](crate::state::StateSnapshot) and an execution context,
//! does its job (read a file, call a provider, run a validator), and returns
//! a [`NodePartial`] describing the state it wants to change. The engine
//! merges partials at a barrier after every step.
//!
//! # Error discipline
//!
//! Two paths, deliberately distinct:
//!
//! 1. **Fatal**: return `Err(NodeError)` — the runner stops the workflow.
//! 2. **Governed**: write a non-empty `error_message` key into the partial
//!    and return `Ok` — the routers steer to `End` and the state (with the
//!    error) is checkpointed. Workflow-level failures (input not found, not
//!    approved, validation blocked, iteration budget, human abort) always
//!    take the governed path so they land in the audit trail.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::message::Message;
use crate::state::{keys, StateSnapshot};

/// Core trait for executable workflow nodes.
///
/// Implementations should be stateless between calls; anything a node needs
/// to remember belongs in the workflow state so it survives checkpointing.
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against the given snapshot.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError>;
}

/// Execution context handed to a node for one step.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Name of the node instance being executed.
    pub node_id: String,
    /// Current engine step number.
    pub step: u64,
    /// Thread id of the owning session (checkpoint key).
    pub thread_id: String,
}

impl NodeContext {
    /// Emit a scoped progress event for this node.
    pub fn emit(&self, scope: &str, message: impl AsRef<str>) {
        tracing::info!(
            node = %self.node_id,
            step = self.step,
            thread = %self.thread_id,
            scope,
            "{}",
            message.as_ref()
        );
    }
}

/// Partial state update returned by a node.
///
/// All fields are optional; a node only mentions the channels it touches.
/// Extras merge shallowly — a returned key overwrites the prior value.
#[derive(Clone, Debug, Default)]
pub struct NodePartial {
    /// Messages to append to the conversation channel.
    pub messages: Option<Vec<Message>>,
    /// Governance keys to merge into the extras channel.
    pub extra: Option<FxHashMap<String, Value>>,
    /// Error events to append to the errors channel.
    pub errors: Option<Vec<ErrorEvent>>,
}

impl NodePartial {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: FxHashMap<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Adds (or overwrites) a single governance key.
    #[must_use]
    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.extra
            .get_or_insert_with(FxHashMap::default)
            .insert(key.to_string(), value);
        self
    }

    /// Governed-failure partial: sets `error_message` so the next conditional
    /// edge routes to `End`.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        NodePartial::new().set(keys::ERROR_MESSAGE, json!(reason.into()))
    }

    /// Clears any prior `error_message` (the success-branch convention).
    #[must_use]
    pub fn clear_error(self) -> Self {
        self.set(keys::ERROR_MESSAGE, json!(""))
    }
}

/// Fatal node execution errors.
///
/// These halt the workflow. For failures the workflow should route on,
/// use [`NodePartial::fail`] instead.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(steward::node::missing_input),
        help("Check that the upstream node produced `{what}` before this node runs.")
    )]
    MissingInput { what: &'static str },

    /// External provider or subprocess failed in a way the node cannot govern.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(steward::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    #[diagnostic(code(steward::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Filesystem I/O failed.
    #[error("io error: {0}")]
    #[diagnostic(code(steward::node::io))]
    Io(#[from] std::io::Error),

    /// Node-level validation of its own inputs failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(steward::node::validation))]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_partial_sets_error_message() {
        let partial = NodePartial::fail("INPUT_NOT_FOUND: missing brief");
        let extra = partial.extra.unwrap();
        assert_eq!(
            extra.get(keys::ERROR_MESSAGE),
            Some(&json!("INPUT_NOT_FOUND: missing brief"))
        );
    }

    #[test]
    fn set_overwrites_previous_value() {
        let partial = NodePartial::new()
            .set(keys::LLD_STATUS, json!("DRAFTING"))
            .set(keys::LLD_STATUS, json!("BLOCKED"));
        assert_eq!(
            partial.extra.unwrap().get(keys::LLD_STATUS),
            Some(&json!("BLOCKED"))
        );
    }

    #[test]
    fn clear_error_writes_empty_string() {
        let partial = NodePartial::new().clear_error();
        assert_eq!(
            partial.extra.unwrap().get(keys::ERROR_MESSAGE),
            Some(&json!(""))
        );
    }
}
