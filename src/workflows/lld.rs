//! The LLD governance workflow.
//!
//! ```text
//! Start -> load_input -> analyze_codebase -> generate_draft
//!       -> validate_mechanical -> validate_test_plan -> human_gate_draft
//!       -> review -> human_gate_verdict -> finalize -> End
//!          ^                   |                |
//!          +----- revisions ---+----------------+
//! ```
//!
//! Every router checks `error_message` first — a governed failure
//! anywhere routes straight to `End`. Revision loops (mechanical
//! validation, test-plan validation, reviewer BLOCKED, open questions)
//! all point back at the drafter, bounded by the workflow's iteration
//! cap; on breach the routers steer to `End`.

use std::sync::Arc;

use crate::app::App;
use crate::graphs::{EdgePredicate, GraphBuilder, GraphCompileError};
use crate::runtimes::RuntimeConfig;
use crate::state::{keys, StateSnapshot};
use crate::types::NodeKind;

use super::context::WorkflowContext;
use super::nodes::{
    AnalyzeCodebaseNode, FinalizeKind, FinalizeNode, GenerateDraftNode, HumanGateNode,
    InputSource, LoadInputNode, ReviewNode, ValidateMechanicalNode, ValidateTestPlanNode,
};

const DRAFTER_PROMPT: &str = "You are drafting a low-level design document. Produce a complete \
markdown LLD with numbered sections: 1 Context, 2 Files Changed (as a \
| path | change-type | description | table), 3 Requirements (REQ-N items), \
and 10 Test Plan (### test_* scenarios referencing requirement ids). \
Address every point of revision feedback without regressing earlier fixes.";

const REVIEWER_PROMPT: &str = "You are reviewing a low-level design document for implementation \
readiness. Render your verdict with explicit checkbox markers \
([x] **APPROVED** or [x] **BLOCKED**) and list mandatory fixes under a \
'Required Changes' heading.";

/// Routes to `End` when the governed error key is set; otherwise to `to`.
fn error_or(to: &'static str) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            "End".to_string()
        } else {
            to.to_string()
        }
    })
}

fn route_after_validate_mechanical(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        if snapshot.get_str(keys::LLD_STATUS) == Some("BLOCKED") {
            if snapshot.iteration_count() >= snapshot.max_iterations(cap) {
                return "End".to_string();
            }
            return "generate_draft".to_string();
        }
        "validate_test_plan".to_string()
    })
}

fn route_after_validate_test_plan(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        if snapshot.get_str(keys::TEST_PLAN_STATUS) == Some("BLOCKED") {
            if snapshot.iteration_count() >= snapshot.max_iterations(cap) {
                return "End".to_string();
            }
            return "generate_draft".to_string();
        }
        "human_gate_draft".to_string()
    })
}

fn route_after_gate(default_target: &'static str) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        snapshot
            .next_node()
            .unwrap_or(default_target)
            .to_string()
    })
}

fn route_after_review(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        let budget_left = snapshot.iteration_count() < snapshot.max_iterations(cap);
        match snapshot.get_str(keys::OPEN_QUESTIONS_STATUS) {
            Some("UNANSWERED") if budget_left => return "generate_draft".to_string(),
            Some("HUMAN_REQUIRED") => return "human_gate_verdict".to_string(),
            _ => {}
        }
        match snapshot.get_str(keys::REVIEW_VERDICT) {
            Some("APPROVED") => "human_gate_verdict".to_string(),
            _ if budget_left => "generate_draft".to_string(),
            _ => "End".to_string(),
        }
    })
}

/// Builds the LLD workflow graph for the given context and runtime
/// configuration (thread id convention: `lld-<issue>`).
pub fn build_lld_workflow(
    ctx: Arc<WorkflowContext>,
    runtime: RuntimeConfig,
) -> Result<App, GraphCompileError> {
    let cap = ctx.config.lld_max_iterations;
    let node = |name: &str| NodeKind::Custom(name.to_string());

    GraphBuilder::new()
        .add_node(node("load_input"), LoadInputNode::new(ctx.clone(), InputSource::TrackerIssue))
        .add_node(node("analyze_codebase"), AnalyzeCodebaseNode::new(ctx.clone()))
        .add_node(node("generate_draft"), GenerateDraftNode::new(ctx.clone(), DRAFTER_PROMPT))
        .add_node(node("validate_mechanical"), ValidateMechanicalNode::new(ctx.clone()))
        .add_node(node("validate_test_plan"), ValidateTestPlanNode::new(ctx.clone()))
        .add_node(
            node("human_gate_draft"),
            HumanGateNode::new(ctx.clone(), "review", "generate_draft", "draft"),
        )
        .add_node(node("review"), ReviewNode::new(ctx.clone(), REVIEWER_PROMPT))
        .add_node(
            node("human_gate_verdict"),
            HumanGateNode::new(ctx.clone(), "finalize", "generate_draft", "verdict"),
        )
        .add_node(node("finalize"), FinalizeNode::new(ctx, FinalizeKind::Lld))
        .add_edge(NodeKind::Start, node("load_input"))
        .add_conditional_edge(node("load_input"), error_or("analyze_codebase"))
        .add_conditional_edge(node("analyze_codebase"), error_or("generate_draft"))
        .add_conditional_edge(node("generate_draft"), error_or("validate_mechanical"))
        .add_conditional_edge(node("validate_mechanical"), route_after_validate_mechanical(cap))
        .add_conditional_edge(node("validate_test_plan"), route_after_validate_test_plan(cap))
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

    fn snapshot_with(pairs: &[(&str, serde_json::Value)]) -> StateSnapshot {
        let mut builder = VersionedState::builder();
        for (k, v) in pairs {
            builder = builder.with_extra(k, v.clone());
        }
        builder.build().snapshot()
    }

    #[test]
    fn error_routes_to_end_everywhere() {
        let snap = snapshot_with(&[(keys::ERROR_MESSAGE, json!("INPUT_NOT_FOUND: x"))]);
        assert_eq!((error_or("analyze_codebase"))(snap.clone()), "End");
        assert_eq!((route_after_review(5))(snap.clone()), "End");
        assert_eq!((route_after_validate_mechanical(5))(snap), "End");
    }

    #[test]
    fn blocked_validation_loops_to_drafter_within_budget() {
        let snap = snapshot_with(&[
            (keys::LLD_STATUS, json!("BLOCKED")),
            (keys::ITERATION_COUNT, json!(2)),
        ]);
        assert_eq!((route_after_validate_mechanical(5))(snap), "generate_draft");
    }

    #[test]
    fn blocked_validation_ends_at_the_cap() {
        let snap = snapshot_with(&[
            (keys::LLD_STATUS, json!("BLOCKED")),
            (keys::ITERATION_COUNT, json!(5)),
        ]);
        assert_eq!((route_after_validate_mechanical(5))(snap), "End");
    }

    #[test]
    fn approved_review_goes_to_the_verdict_gate() {
        let snap = snapshot_with(&[(keys::REVIEW_VERDICT, json!("APPROVED"))]);
        assert_eq!((route_after_review(5))(snap), "human_gate_verdict");
    }

    #[test]
    fn unanswered_questions_loop_back_while_budget_remains() {
        let snap = snapshot_with(&[
            (keys::REVIEW_VERDICT, json!("APPROVED")),
            (keys::OPEN_QUESTIONS_STATUS, json!("UNANSWERED")),
            (keys::ITERATION_COUNT, json!(1)),
        ]);
        assert_eq!((route_after_review(5))(snap), "generate_draft");
    }

    #[test]
    fn human_required_forces_the_gate() {
        let snap = snapshot_with(&[
            (keys::REVIEW_VERDICT, json!("BLOCKED")),
            (keys::OPEN_QUESTIONS_STATUS, json!("HUMAN_REQUIRED")),
        ]);
        assert_eq!((route_after_review(5))(snap), "human_gate_verdict");
    }

    #[test]
    fn gate_routing_reads_next_node() {
        let snap = snapshot_with(&[(keys::NEXT_NODE, json!("generate_draft"))]);
        assert_eq!((route_after_gate("review"))(snap), "generate_draft");
        let snap = snapshot_with(&[]);
        assert_eq!((route_after_gate("review"))(snap), "review");
    }

    #[test]
    fn graph_compiles() {
        let config = crate::config::OrchestratorConfig::mock(std::path::PathBuf::from("/tmp/x"));
        let ctx = WorkflowContext::new(config).unwrap();
        let app = build_lld_workflow(ctx, RuntimeConfig::default()).unwrap();
        assert_eq!(app.nodes().len(), 9);
    }
}
