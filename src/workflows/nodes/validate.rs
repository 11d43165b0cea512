//! Validator nodes: mechanical gates between LLM stages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{next_file_number, save_audit_file};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};
use crate::validators::{analyze_files, validate_structure, validate_test_plan};

use super::super::context::WorkflowContext;

/// N1.5: structural validation of the drafted LLD.
///
/// Blocks on errors (routing back to the drafter with feedback), warns on
/// advisory findings but lets the draft through.
pub struct ValidateMechanicalNode {
    ctx: Arc<WorkflowContext>,
}

impl ValidateMechanicalNode {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node for ValidateMechanicalNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let Some(draft) = snapshot.current_draft() else {
            return Ok(NodePartial::fail(
                "VALIDATION_BLOCKED: no draft content for mechanical validation",
            ));
        };

        let result = validate_structure(draft, Some(&self.ctx.config.repo_root));
        ctx.emit(
            "validate_mechanical",
            format!(
                "{} violations ({} errors), {:.1}ms",
                result.violations.len(),
                result.errors().count(),
                result.execution_time_ms
            ),
        );

        if result.passed {
            return Ok(NodePartial::new()
                .set(keys::LLD_STATUS, json!("VALIDATED"))
                .clear_error());
        }

        Ok(NodePartial::new()
            .set(keys::LLD_STATUS, json!("BLOCKED"))
            .set(keys::USER_FEEDBACK, json!(result.feedback()))
            .set(keys::ITERATION_COUNT, json!(snapshot.iteration_count() + 1))
            .clear_error())
    }
}

/// N1b: test-plan validation with bounded attempts.
///
/// Past the attempt budget the node escalates to a terminal error instead
/// of looping the drafter forever.
pub struct ValidateTestPlanNode {
    ctx: Arc<WorkflowContext>,
}

impl ValidateTestPlanNode {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node for ValidateTestPlanNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let attempts = snapshot.get_u64(keys::VALIDATION_ATTEMPTS).unwrap_or(0);
        let budget = self.ctx.config.max_validation_attempts;
        if attempts >= budget {
            return Ok(NodePartial::fail(format!(
                "VALIDATION_BLOCKED: test plan validation failed after {budget} attempts"
            )));
        }

        let Some(draft) = snapshot.current_draft() else {
            return Ok(NodePartial::fail(
                "VALIDATION_BLOCKED: no draft content for test plan validation",
            ));
        };

        let result = validate_test_plan(draft);
        ctx.emit(
            "validate_test_plan",
            format!(
                "coverage {:.2}% ({}/{}), {} tests, {} violations — {}",
                result.coverage_percentage,
                result.mapped_count,
                result.requirements_count,
                result.tests_count,
                result.violations.len(),
                if result.passed { "PASSED" } else { "FAILED" }
            ),
        );

        let new_attempts = attempts + 1;
        if result.passed {
            return Ok(NodePartial::new()
                .set(keys::VALIDATION_ATTEMPTS, json!(new_attempts))
                .set(keys::TEST_PLAN_STATUS, json!("VALIDATED"))
                .clear_error());
        }

        Ok(NodePartial::new()
            .set(keys::VALIDATION_ATTEMPTS, json!(new_attempts))
            .set(keys::TEST_PLAN_STATUS, json!("BLOCKED"))
            .set(keys::LLD_STATUS, json!("BLOCKED"))
            .set(keys::USER_FEEDBACK, json!(result.feedback()))
            .set(keys::ITERATION_COUNT, json!(snapshot.iteration_count() + 1))
            .clear_error())
    }
}

/// N4b: implementation completeness gate (anti-stub detection).
///
/// Analyzes the files the implementation step produced. BLOCK routes the
/// testing workflow back to the implementer (bounded by the completeness
/// iteration cap); PASS/WARN proceed to verification. The per-file
/// findings are written to the audit trail as
/// `NNN-completeness-ast-analysis`.
pub struct CompletenessGateNode {
    ctx: Arc<WorkflowContext>,
}

impl CompletenessGateNode {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn render_report(result: &crate::validators::CompletenessResult) -> String {
        let mut lines = vec![
            format!("# Completeness analysis: {}", result.verdict),
            String::new(),
            format!("analysis_ms: {:.1}", result.analysis_ms),
            String::new(),
        ];
        for issue in &result.issues {
            lines.push(format!(
                "- [{}] {}:{} {:?}: {}",
                match issue.severity {
                    crate::validators::Severity::Error => "ERROR",
                    crate::validators::Severity::Warning => "WARNING",
                },
                issue.file,
                issue.line,
                issue.category,
                issue.description
            ));
        }
        if !result.summarized_files.is_empty() {
            lines.push(format!(
                "\nsummarized (over size cap): {}",
                result.summarized_files.join(", ")
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Node for CompletenessGateNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let files: Vec<String> = snapshot
            .extra
            .get(keys::IMPLEMENTATION_FILES)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut sources: Vec<(String, String)> = Vec::new();
        for rel in &files {
            let abs = self.ctx.config.repo_root.join(rel);
            match std::fs::read_to_string(&abs) {
                Ok(content) => sources.push((rel.clone(), content)),
                Err(e) => {
                    return Ok(NodePartial::fail(format!(
                        "INTERNAL: implementation file unreadable: {rel}: {e}"
                    )));
                }
            }
        }

        let result = analyze_files(&sources, self.ctx.config.completeness_file_cap_bytes);
        let verdict = result.verdict.to_string();
        ctx.emit(
            "completeness_gate",
            format!(
                "{verdict}: {} issues over {} files",
                result.issues.len(),
                sources.len()
            ),
        );

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            let _ = save_audit_file(
                dir,
                number,
                "completeness-ast-analysis",
                &Self::render_report(&result),
            );
            crate::audit::log_gate_decision(
                dir,
                &crate::audit::GateDecision::new(
                    &ctx.node_id,
                    &verdict,
                    snapshot.iteration_count(),
                    &format!("{} issues", result.issues.len()),
                ),
            );
        }

        let iterations = snapshot.get_u64(keys::COMPLETENESS_ITERATIONS).unwrap_or(0);
        let iterations = if verdict == "BLOCK" {
            iterations + 1
        } else {
            iterations
        };

        let feedback = if verdict == "BLOCK" {
            Self::render_report(&result)
        } else {
            String::new()
        };

        Ok(NodePartial::new()
            .set(keys::COMPLETENESS_VERDICT, json!(verdict))
            .set(keys::COMPLETENESS_ITERATIONS, json!(iterations))
            .set(keys::USER_FEEDBACK, json!(feedback))
            .clear_error())
    }
}
