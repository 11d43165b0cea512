//! The implementation-spec workflow (LLD → implementation spec).
//!
//! ```text
//! Start -> load_input -> analyze_codebase -> generate_spec
//!       -> human_gate_spec -> review_spec -> finalize -> End
//!          ^          revisions      |
//!          +--------------------------+
//! ```
//!
//! Seeds from an approved LLD and produces the implementation spec a
//! coding agent executes against: exact file contents, current-state
//! snapshots, and pattern references. Revision prompts carry cumulative
//! feedback so fixed issues do not regress.

use std::sync::Arc;

use crate::app::App;
use crate::graphs::{EdgePredicate, GraphBuilder, GraphCompileError};
use crate::runtimes::RuntimeConfig;
use crate::state::{keys, StateSnapshot};
use crate::types::NodeKind;

use super::context::WorkflowContext;
use super::nodes::{
    AnalyzeCodebaseNode, FinalizeKind, FinalizeNode, GenerateDraftNode, HumanGateNode,
    InputSource, LoadInputNode, ReviewNode,
};

const SPEC_DRAFTER_PROMPT: &str = "You are drafting an implementation spec from an approved \
low-level design and current-state code excerpts. Produce markdown with \
exact per-file changes an implementer can execute without judgment calls: \
full signatures, data shapes, and ordering constraints. Address revision \
feedback cumulatively.";

const SPEC_REVIEWER_PROMPT: &str = "You are reviewing an implementation spec for execution \
readiness against its approved design. Render your verdict with explicit \
checkbox markers ([x] **APPROVED** or [x] **BLOCKED**) and list mandatory \
fixes under a 'Required Changes' heading.";

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
            Some("APPROVED") => "finalize".to_string(),
            _ if snapshot.iteration_count() < snapshot.max_iterations(cap) => {
                "generate_spec".to_string()
            }
            _ => "End".to_string(),
        }
    })
}

/// Builds the implementation-spec workflow graph (thread id convention:
/// `spec-<issue>`).
pub fn build_spec_workflow(
    ctx: Arc<WorkflowContext>,
    runtime: RuntimeConfig,
) -> Result<App, GraphCompileError> {
    let cap = ctx.config.lld_max_iterations;
    let node = |name: &str| NodeKind::Custom(name.to_string());

    GraphBuilder::new()
        .add_node(
            node("load_input"),
            LoadInputNode::new(ctx.clone(), InputSource::ApprovedLld).with_kind("spec"),
        )
        .add_node(node("analyze_codebase"), AnalyzeCodebaseNode::new(ctx.clone()))
        .add_node(
            node("generate_spec"),
            GenerateDraftNode::for_spec(ctx.clone(), SPEC_DRAFTER_PROMPT),
        )
        .add_node(
            node("human_gate_spec"),
            HumanGateNode::new(ctx.clone(), "review_spec", "generate_spec", "spec"),
        )
        .add_node(node("review_spec"), ReviewNode::new(ctx.clone(), SPEC_REVIEWER_PROMPT))
        .add_node(node("finalize"), FinalizeNode::new(ctx, FinalizeKind::Spec))
        .add_edge(NodeKind::Start, node("load_input"))
        .add_conditional_edge(node("load_input"), error_or("analyze_codebase"))
        .add_conditional_edge(node("analyze_codebase"), error_or("generate_spec"))
        .add_conditional_edge(node("generate_spec"), error_or("human_gate_spec"))
        .add_conditional_edge(node("human_gate_spec"), route_after_gate("review_spec"))
        .add_conditional_edge(node("review_spec"), route_after_review(cap))
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
    fn approved_spec_review_routes_to_finalize() {
        let snap = VersionedState::builder()
            .with_extra(keys::REVIEW_VERDICT, json!("APPROVED"))
            .build()
            .snapshot();
        assert_eq!((route_after_review(5))(snap), "finalize");
    }

    #[test]
    fn blocked_spec_review_loops_until_the_cap() {
        let snap = VersionedState::builder()
            .with_extra(keys::REVIEW_VERDICT, json!("BLOCKED"))
            .with_extra(keys::ITERATION_COUNT, json!(5))
            .build()
            .snapshot();
        assert_eq!((route_after_review(5))(snap), "End");
    }

    #[test]
    fn graph_compiles() {
        let config = crate::config::OrchestratorConfig::mock(std::path::PathBuf::from("/tmp/x"));
        let ctx = WorkflowContext::new(config).unwrap();
        let app = build_spec_workflow(ctx, RuntimeConfig::default()).unwrap();
        assert_eq!(app.nodes().len(), 6);
    }
}
