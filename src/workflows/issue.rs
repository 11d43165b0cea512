//! The issue-creation workflow.
//!
//! ```text
//! Start -> load_input -> generate_draft -> human_gate_draft -> review
//!       -> human_gate_verdict -> finalize -> End
//!          ^          revisions       |
//!          +--------------------------+
//! ```
//!
//! The seed is a brief from `ideas/active/`; the terminal act files the
//! issue with the tracker and stages the brief into `ideas/done/`. The
//! iteration budget is deliberately generous (default 20): briefs are
//! cheap to iterate and the reviewer is strict.

use std::sync::Arc;

use crate::app::App;
use crate::graphs::{EdgePredicate, GraphBuilder, GraphCompileError};
use crate::runtimes::RuntimeConfig;
use crate::state::{keys, StateSnapshot};
use crate::types::NodeKind;

use super::context::WorkflowContext;
use super::nodes::{
    FinalizeKind, FinalizeNode, GenerateDraftNode, HumanGateNode, InputSource, LoadInputNode,
    ReviewNode,
};

const DRAFTER_PROMPT: &str = "You are drafting a tracker issue from a project brief. Produce \
markdown with a # title heading, a Summary section, a Requirements list, \
and checkbox Acceptance Criteria. Address revision feedback cumulatively.";

const REVIEWER_PROMPT: &str = "You are reviewing a drafted tracker issue for clarity and \
completeness. Render your verdict with explicit checkbox markers \
([x] **APPROVED** or [x] **BLOCKED**) and list mandatory fixes under a \
'Required Changes' heading.";

fn error_or(to: &'static str) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            "End".to_string()
        } else {
            to.to_string()
        }
    })
}

fn route_after_gate(default_target: &'static str) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        snapshot.next_node().unwrap_or(default_target).to_string()
    })
}

fn route_after_review(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        match snapshot.get_str(keys::REVIEW_VERDICT) {
            Some("APPROVED") => "human_gate_verdict".to_string(),
            _ if snapshot.iteration_count() < snapshot.max_iterations(cap) => {
                "generate_draft".to_string()
            }
            _ => "End".to_string(),
        }
    })
}

/// Builds the issue workflow graph (thread id convention: `issue-<n>`).
pub fn build_issue_workflow(
    ctx: Arc<WorkflowContext>,
    runtime: RuntimeConfig,
) -> Result<App, GraphCompileError> {
    let cap = ctx.config.issue_max_iterations;
    let node = |name: &str| NodeKind::Custom(name.to_string());

    GraphBuilder::new()
        .add_node(node("load_input"), LoadInputNode::new(ctx.clone(), InputSource::BriefFile))
        .add_node(node("generate_draft"), GenerateDraftNode::new(ctx.clone(), DRAFTER_PROMPT))
        .add_node(
            node("human_gate_draft"),
            HumanGateNode::new(ctx.clone(), "review", "generate_draft", "draft"),
        )
        .add_node(node("review"), ReviewNode::new(ctx.clone(), REVIEWER_PROMPT))
        .add_node(
            node("human_gate_verdict"),
            HumanGateNode::new(ctx.clone(), "finalize", "generate_draft", "verdict"),
        )
        .add_node(node("finalize"), FinalizeNode::new(ctx, FinalizeKind::Issue))
        .add_edge(NodeKind::Start, node("load_input"))
        .add_conditional_edge(node("load_input"), error_or("generate_draft"))
        .add_conditional_edge(node("generate_draft"), error_or("human_gate_draft"))
        .add_conditional_edge(node("human_gate_draft"), route_after_gate("review"))
        .add_conditional_edge(node("review"), route_after_review(cap))
        .add_conditional_edge(node("human_gate_verdict"), route_after_gate("finalize"))
        .add_edge(node("finalize"), NodeKind::End)
        .with_runtime_config(runtime)
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VersionedState;
    use serde_json::json;

    #[test]
    fn blocked_review_loops_until_the_cap() {
        let within = VersionedState::builder()
            .with_extra(keys::REVIEW_VERDICT, json!("BLOCKED"))
            .with_extra(keys::ITERATION_COUNT, json!(19))
            .build()
            .snapshot();
        assert_eq!((route_after_review(20))(within), "generate_draft");

        let at_cap = VersionedState::builder()
            .with_extra(keys::REVIEW_VERDICT, json!("BLOCKED"))
            .with_extra(keys::ITERATION_COUNT, json!(20))
            .build()
            .snapshot();
        assert_eq!((route_after_review(20))(at_cap), "End");
    }

    #[test]
    fn graph_compiles() {
        let config = crate::config::OrchestratorConfig::mock(std::path::PathBuf::from("/tmp/x"));
        let ctx = WorkflowContext::new(config).unwrap();
        let app = build_issue_workflow(ctx, RuntimeConfig::default()).unwrap();
        assert_eq!(app.nodes().len(), 6);
    }
}
