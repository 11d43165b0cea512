//! The TDD testing workflow.
//!
//! ```text
//! Start -> load_input -> review_test_plan -> scaffold_tests -> verify_red
//!       -> implement_code -> completeness_gate -> verify_green
//!       -> e2e_validation -> finalize -> End
//!             ^                  |
//!             +---- BLOCK -------+   (cap: completeness iterations)
//! ```
//!
//! The completeness gate sits between implementation and green
//! verification: a BLOCK verdict routes back to the implementer, at most
//! `completeness_max_iterations` times (default 3), after which the
//! router steers to `End` without ever reaching verification.

use std::sync::Arc;

use crate::app::App;
use crate::graphs::{EdgePredicate, GraphBuilder, GraphCompileError};
use crate::runtimes::RuntimeConfig;
use crate::state::{keys, StateSnapshot};
use crate::types::NodeKind;

use super::context::WorkflowContext;
use super::nodes::{
    CompletenessGateNode, E2eValidationNode, FinalizeKind, FinalizeNode, ImplementCodeNode,
    InputSource, LoadInputNode, ReviewNode, ScaffoldTestsNode, VerifyNode, VerifyPhase,
};

const IMPLEMENTER_PROMPT: &str = "You are implementing an approved design against scaffolded \
tests. Respond with fenced code blocks whose first line names the \
destination as `// file: <path>` relative to the repository root. \
No stubs: every function must be fully implemented.";

const TEST_PLAN_REVIEWER_PROMPT: &str = "You are reviewing an approved design's test plan before \
implementation begins. Render your verdict with explicit checkbox markers \
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

/// Auto mode proceeds to scaffolding even on a BLOCKED test-plan verdict;
/// interactive runs stop so the operator can fix the plan first.
fn route_after_test_plan_review() -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        if snapshot.get_str(keys::REVIEW_VERDICT) == Some("BLOCKED") && !snapshot.auto_mode() {
            return "End".to_string();
        }
        "scaffold_tests".to_string()
    })
}

/// BLOCK loops back to the implementer under the completeness cap; at the
/// cap the route is `End` — verification never runs on a blocked tree.
fn route_after_completeness(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        match snapshot.get_str(keys::COMPLETENESS_VERDICT) {
            Some("BLOCK") => {
                let iterations = snapshot.get_u64(keys::COMPLETENESS_ITERATIONS).unwrap_or(0);
                if iterations >= cap {
                    "End".to_string()
                } else {
                    "implement_code".to_string()
                }
            }
            // PASS and WARN both proceed.
            _ => "verify_green".to_string(),
        }
    })
}

fn route_after_verify_green(cap: u64) -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        if snapshot.get_flag(keys::VERIFY_GREEN) {
            return "e2e_validation".to_string();
        }
        if snapshot.iteration_count() < snapshot.max_iterations(cap) {
            "implement_code".to_string()
        } else {
            "End".to_string()
        }
    })
}

fn route_after_e2e() -> EdgePredicate {
    Arc::new(move |snapshot: StateSnapshot| {
        if snapshot.error_message().is_some() {
            return "End".to_string();
        }
        snapshot.next_node().unwrap_or("finalize").to_string()
    })
}

/// Builds the testing workflow graph (thread id convention:
/// `testing-<issue>`).
pub fn build_testing_workflow(
    ctx: Arc<WorkflowContext>,
    runtime: RuntimeConfig,
) -> Result<App, GraphCompileError> {
    let completeness_cap = ctx.config.completeness_max_iterations;
    let green_cap = ctx.config.lld_max_iterations;
    let node = |name: &str| NodeKind::Custom(name.to_string());

    GraphBuilder::new()
        .add_node(node("load_input"), LoadInputNode::new(ctx.clone(), InputSource::ApprovedLld))
        .add_node(
            node("review_test_plan"),
            ReviewNode::new(ctx.clone(), TEST_PLAN_REVIEWER_PROMPT),
        )
        .add_node(node("scaffold_tests"), ScaffoldTestsNode::new(ctx.clone()))
        .add_node(node("verify_red"), VerifyNode::new(ctx.clone(), VerifyPhase::Red))
        .add_node(
            node("implement_code"),
            ImplementCodeNode::new(ctx.clone(), IMPLEMENTER_PROMPT),
        )
        .add_node(node("completeness_gate"), CompletenessGateNode::new(ctx.clone()))
        .add_node(node("verify_green"), VerifyNode::new(ctx.clone(), VerifyPhase::Green))
        .add_node(
            node("e2e_validation"),
            E2eValidationNode::new(ctx.clone(), "finalize", "implement_code"),
        )
        .add_node(node("finalize"), FinalizeNode::new(ctx, FinalizeKind::Testing))
        .add_edge(NodeKind::Start, node("load_input"))
        .add_conditional_edge(node("load_input"), error_or("review_test_plan"))
        .add_conditional_edge(node("review_test_plan"), route_after_test_plan_review())
        .add_conditional_edge(node("scaffold_tests"), error_or("verify_red"))
        .add_conditional_edge(node("verify_red"), error_or("implement_code"))
        .add_conditional_edge(node("implement_code"), error_or("completeness_gate"))
        .add_conditional_edge(node("completeness_gate"), route_after_completeness(completeness_cap))
        .add_conditional_edge(node("verify_green"), route_after_verify_green(green_cap))
        .add_conditional_edge(node("e2e_validation"), route_after_e2e())
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
    fn completeness_block_loops_then_ends_at_cap() {
        let route = route_after_completeness(3);
        for iterations in [1u64, 2] {
            let snap = snapshot_with(&[
                (keys::COMPLETENESS_VERDICT, json!("BLOCK")),
                (keys::COMPLETENESS_ITERATIONS, json!(iterations)),
            ]);
            assert_eq!(route(snap), "implement_code", "iteration {iterations}");
        }
        let snap = snapshot_with(&[
            (keys::COMPLETENESS_VERDICT, json!("BLOCK")),
            (keys::COMPLETENESS_ITERATIONS, json!(3)),
        ]);
        assert_eq!(route(snap), "End");
    }

    #[test]
    fn pass_and_warn_proceed_to_verification() {
        let route = route_after_completeness(3);
        for verdict in ["PASS", "WARN"] {
            let snap = snapshot_with(&[(keys::COMPLETENESS_VERDICT, json!(verdict))]);
            assert_eq!(route(snap), "verify_green", "verdict {verdict}");
        }
    }

    #[test]
    fn blocked_test_plan_stops_interactive_but_not_auto_runs() {
        let interactive = snapshot_with(&[(keys::REVIEW_VERDICT, json!("BLOCKED"))]);
        assert_eq!((route_after_test_plan_review())(interactive), "End");

        let auto = snapshot_with(&[
            (keys::REVIEW_VERDICT, json!("BLOCKED")),
            (keys::AUTO_MODE, json!(true)),
        ]);
        assert_eq!((route_after_test_plan_review())(auto), "scaffold_tests");
    }

    #[test]
    fn e2e_routes_on_next_node() {
        let snap = snapshot_with(&[(keys::NEXT_NODE, json!("implement_code"))]);
        assert_eq!((route_after_e2e())(snap), "implement_code");
        let snap = snapshot_with(&[]);
        assert_eq!((route_after_e2e())(snap), "finalize");
    }

    #[test]
    fn graph_compiles() {
        let config = crate::config::OrchestratorConfig::mock(std::path::PathBuf::from("/tmp/x"));
        let ctx = WorkflowContext::new(config).unwrap();
        let app = build_testing_workflow(ctx, RuntimeConfig::default()).unwrap();
        assert_eq!(app.nodes().len(), 9);
    }
}
