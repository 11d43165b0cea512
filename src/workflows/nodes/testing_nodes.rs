//! Testing-workflow nodes: scaffold, verify, implement, e2e.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{next_file_number, save_audit_file};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};
use crate::validators::test_plan::extract_test_scenarios;

use super::super::context::WorkflowContext;
use super::run_command;

/// N2: scaffold failing tests from the LLD's Section 10 scenarios.
///
/// Each scenario becomes a test stub that fails until the implementation
/// lands, which is what lets verify-red prove the tests actually test
/// something.
pub struct ScaffoldTestsNode {
    ctx: Arc<WorkflowContext>,
}

impl ScaffoldTestsNode {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn render_test_file(lld: &str, issue_number: u64) -> Option<String> {
        let scenarios = extract_test_scenarios(lld);
        if scenarios.is_empty() {
            return None;
        }
        let mut out = vec![format!(
            "//! Scenarios scaffolded from the approved design for issue #{issue_number}."
        )];
        out.push(String::new());
        for scenario in &scenarios {
            let name: String = scenario
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            let description = scenario.body.trim().replace('\n', " ");
            out.push("#[test]".to_string());
            out.push(format!("fn {name}() {{"));
            if !description.is_empty() {
                out.push(format!("    // {description}"));
            }
            out.push("    unimplemented!(\"pending implementation\")".to_string());
            out.push("}".to_string());
            out.push(String::new());
        }
        Some(out.join("\n"))
    }
}

#[async_trait]
impl Node for ScaffoldTestsNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let Some(lld) = snapshot.get_str(keys::LLD_CONTENT) else {
            return Ok(NodePartial::fail("INTERNAL: no LLD content to scaffold from"));
        };
        let issue_number = snapshot.issue_number().unwrap_or(0);
        let Some(content) = Self::render_test_file(lld, issue_number) else {
            return Ok(NodePartial::fail(
                "VALIDATION_BLOCKED: LLD has no test scenarios to scaffold",
            ));
        };

        let rel = format!("tests/issue_{issue_number}.rs");
        let abs = self.ctx.config.repo_root.join(&rel);
        if let Some(parent) = abs.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Ok(NodePartial::fail(format!("INTERNAL: {e}")));
            }
        }
        if let Err(e) = std::fs::write(&abs, &content) {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: failed to write scaffold: {e}"
            )));
        }
        ctx.emit("scaffold", format!("wrote {rel}"));

        Ok(NodePartial::new()
            .set(keys::TEST_FILES, json!([rel]))
            .clear_error())
    }
}

/// Which verification pass this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPhase {
    /// Before implementation: the scaffolded tests must fail.
    Red,
    /// After implementation: the full suite must pass.
    Green,
}

/// N3/N5: run the test command and interpret the exit status for the
/// phase. Output lands in the audit trail as `NNN-test-report`.
pub struct VerifyNode {
    ctx: Arc<WorkflowContext>,
    phase: VerifyPhase,
}

impl VerifyNode {
    pub fn new(ctx: Arc<WorkflowContext>, phase: VerifyPhase) -> Self {
        Self { ctx, phase }
    }

    fn flag_key(&self) -> &'static str {
        match self.phase {
            VerifyPhase::Red => keys::VERIFY_RED,
            VerifyPhase::Green => keys::VERIFY_GREEN,
        }
    }
}

#[async_trait]
impl Node for VerifyNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        if self.ctx.config.mock_mode || snapshot.mock_mode() {
            ctx.emit("verify", format!("{:?} pass simulated (mock mode)", self.phase));
            return Ok(NodePartial::new().set(self.flag_key(), json!(true)).clear_error());
        }

        let command = &self.ctx.config.test_command;
        let Some((program, args)) = command.split_first() else {
            return Ok(NodePartial::fail("INTERNAL: empty test command"));
        };
        let output = match run_command(
            program,
            args,
            &self.ctx.config.repo_root,
            self.ctx.config.provider_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(e) => return Ok(NodePartial::fail(format!("INTERNAL: {e}"))),
        };

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            let report = format!(
                "# Verify {:?}: exit {}\n\n## stdout\n\n{}\n\n## stderr\n\n{}",
                self.phase, output.exit_code, output.stdout, output.stderr
            );
            let _ = save_audit_file(dir, number, "test-report", &report);
        }

        match (self.phase, output.exit_code) {
            (VerifyPhase::Red, 0) => Ok(NodePartial::fail(
                "VALIDATION_BLOCKED: scaffolded tests pass before any implementation",
            )),
            (VerifyPhase::Red, _) => {
                Ok(NodePartial::new().set(self.flag_key(), json!(true)).clear_error())
            }
            (VerifyPhase::Green, 0) => {
                Ok(NodePartial::new().set(self.flag_key(), json!(true)).clear_error())
            }
            (VerifyPhase::Green, code) => {
                let tail: String = output
                    .stdout
                    .lines()
                    .rev()
                    .take(30)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(NodePartial::new()
                    .set(self.flag_key(), json!(false))
                    .set(
                        keys::USER_FEEDBACK,
                        json!(format!("## Test failures (exit {code})\n\n```\n{tail}\n```")),
                    )
                    .set(keys::ITERATION_COUNT, json!(snapshot.iteration_count() + 1))
                    .clear_error())
            }
        }
    }
}

/// N4: implementation through the drafter provider.
///
/// The model's response is expected to carry fenced code blocks whose
/// first line names the destination, `// file: <path>`. The prompt
/// enumerates the paths the approved design declares, and every block is
/// checked against that allowlist before anything touches disk — the
/// implementer cannot go off-plan, and cannot edit the scaffolded tests
/// it is supposed to satisfy. Accepted blocks are written relative to
/// the repo root and the path list goes into state for the completeness
/// gate.
pub struct ImplementCodeNode {
    ctx: Arc<WorkflowContext>,
    system_prompt: String,
}

impl ImplementCodeNode {
    pub fn new(ctx: Arc<WorkflowContext>, system_prompt: impl Into<String>) -> Self {
        Self {
            ctx,
            system_prompt: system_prompt.into(),
        }
    }

    /// Extracts `(path, code)` pairs from `// file:`-annotated fences.
    pub(crate) fn parse_code_blocks(response: &str) -> Vec<(String, String)> {
        let mut blocks = Vec::new();
        let mut in_fence = false;
        let mut current_path: Option<String> = None;
        let mut current_body: Vec<&str> = Vec::new();

        for line in response.lines() {
            if line.trim_start().starts_with("```") {
                if in_fence {
                    if let Some(path) = current_path.take() {
                        blocks.push((path, current_body.join("\n")));
                    }
                    current_body.clear();
                    in_fence = false;
                } else {
                    in_fence = true;
                }
                continue;
            }
            if !in_fence {
                continue;
            }
            if current_body.is_empty() && current_path.is_none() {
                if let Some(path) = line.trim().strip_prefix("// file:") {
                    current_path = Some(path.trim().to_string());
                    continue;
                }
                // First line is not a file marker; this fence is prose.
                current_path = None;
                current_body.push(line);
            } else {
                current_body.push(line);
            }
        }
        blocks
    }
}

#[async_trait]
impl Node for ImplementCodeNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let lld = snapshot.get_str(keys::LLD_CONTENT).unwrap_or_default();
        let feedback = snapshot.get_str(keys::USER_FEEDBACK).unwrap_or_default();

        // The design's Files-Changed table is the write allowlist for this
        // run; scaffolded test files are declared but untouchable.
        let scaffolded: Vec<String> = snapshot
            .extra
            .get(keys::TEST_FILES)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let plan = crate::validators::LldWritePlan::from_lld(lld).with_scaffolded(&scaffolded);

        let mut content = format!("# Approved design\n\n{lld}");
        let paths_section = plan.prompt_section();
        if !paths_section.is_empty() {
            content.push_str("\n\n---\n\n");
            content.push_str(&paths_section);
        }
        if !feedback.is_empty() {
            content.push_str("\n\n---\n\n# Gate feedback\n\n");
            content.push_str(feedback);
        }

        let result = self
            .ctx
            .drafter
            .invoke(&self.system_prompt, &content, self.ctx.config.provider_timeout)
            .await;
        if !result.success {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: implementer failed: {}",
                result.error_message.as_deref().unwrap_or("unknown")
            )));
        }

        let response = result.response.as_deref().unwrap_or_default();
        let blocks = Self::parse_code_blocks(response);
        if blocks.is_empty() {
            return Ok(NodePartial::fail(
                "INTERNAL: implementer response contained no file-annotated code blocks",
            ));
        }

        let mut written: Vec<String> = Vec::new();
        for (rel, code) in &blocks {
            // The model names the paths; the write policy decides whether
            // they are acceptable.
            if let Err(e) = crate::validators::validate_file_write(rel, &plan) {
                return Ok(NodePartial::fail(format!("VALIDATION_BLOCKED: {e}")));
            }
            let abs = self.ctx.config.repo_root.join(rel);
            if let Some(parent) = abs.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Ok(NodePartial::fail(format!("INTERNAL: {e}")));
                }
            }
            if let Err(e) = std::fs::write(&abs, code) {
                return Ok(NodePartial::fail(format!(
                    "INTERNAL: failed to write {rel}: {e}"
                )));
            }
            written.push(rel.clone());
        }
        ctx.emit("implement", format!("wrote {} files", written.len()));

        Ok(NodePartial::new()
            .set(keys::IMPLEMENTATION_FILES, json!(written))
            .set(keys::USER_FEEDBACK, json!(""))
            .clear_error())
    }
}

/// N6: end-to-end validation via the project's test runner.
///
/// Exit-code policy: 0 proceeds; 5 ("no tests collected") also proceeds —
/// deliberately treated as forward progress; 1 and 2 loop back to the
/// implementer while the iteration budget lasts; anything else is an
/// internal failure.
pub struct E2eValidationNode {
    ctx: Arc<WorkflowContext>,
    finalize_target: String,
    implement_target: String,
}

impl E2eValidationNode {
    pub fn new(
        ctx: Arc<WorkflowContext>,
        finalize_target: impl Into<String>,
        implement_target: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            finalize_target: finalize_target.into(),
            implement_target: implement_target.into(),
        }
    }
}

#[async_trait]
impl Node for E2eValidationNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        if self.ctx.config.mock_mode
            || snapshot.mock_mode()
            || snapshot.get_flag(keys::SKIP_E2E)
        {
            ctx.emit("e2e", "skipped (mock mode or skip flag)");
            return Ok(NodePartial::new()
                .set(keys::NEXT_NODE, json!(self.finalize_target))
                .clear_error());
        }

        let command = &self.ctx.config.test_command;
        let Some((program, args)) = command.split_first() else {
            return Ok(NodePartial::fail("INTERNAL: empty test command"));
        };
        let output = match run_command(
            program,
            args,
            &self.ctx.config.repo_root,
            self.ctx.config.provider_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(e) => return Ok(NodePartial::fail(format!("INTERNAL: {e}"))),
        };

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            let report = format!(
                "# E2E validation: exit {}\n\n{}\n{}",
                output.exit_code, output.stdout, output.stderr
            );
            let _ = save_audit_file(dir, number, "test-report", &report);
        }

        match output.exit_code {
            0 => Ok(NodePartial::new()
                .set(keys::NEXT_NODE, json!(self.finalize_target))
                .clear_error()),
            // "No tests collected" is forward progress, not a failure.
            5 => {
                ctx.emit("e2e", "no tests collected; proceeding to finalize");
                Ok(NodePartial::new()
                    .set(keys::NEXT_NODE, json!(self.finalize_target))
                    .clear_error())
            }
            1 | 2 => {
                let iterations = snapshot.iteration_count() + 1;
                let budget = snapshot.max_iterations(self.ctx.config.lld_max_iterations);
                if iterations >= budget {
                    return Ok(NodePartial::fail(format!(
                        "MAX_ITERATIONS: e2e validation still failing after {iterations} iterations"
                    )));
                }
                Ok(NodePartial::new()
                    .set(keys::NEXT_NODE, json!(self.implement_target))
                    .set(keys::ITERATION_COUNT, json!(iterations))
                    .set(
                        keys::USER_FEEDBACK,
                        json!(format!(
                            "## E2E failures (exit {})\n\n```\n{}\n```",
                            output.exit_code,
                            output.stdout.lines().rev().take(30).collect::<Vec<_>>()
                                .into_iter().rev().collect::<Vec<_>>().join("\n")
                        )),
                    )
                    .clear_error())
            }
            code => Ok(NodePartial::fail(format!(
                "INTERNAL: test runner exited with {code}: {}",
                output.stderr.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::state::VersionedState;
    use serde_json::json;

    fn e2e_node_with_exit(repo: &std::path::Path, code: i32) -> E2eValidationNode {
        let mut config = OrchestratorConfig::new(repo.to_path_buf());
        config.test_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("exit {code}"),
        ];
        let ctx = crate::workflows::context::WorkflowContext::new(config).unwrap();
        E2eValidationNode::new(ctx, "finalize", "implement_code")
    }

    fn node_ctx() -> NodeContext {
        NodeContext {
            node_id: "e2e_validation".to_string(),
            step: 1,
            thread_id: "testing-42".to_string(),
        }
    }

    fn snapshot_with_iterations(n: u64) -> crate::state::StateSnapshot {
        VersionedState::builder()
            .with_extra(keys::ITERATION_COUNT, json!(n))
            .with_extra(keys::MAX_ITERATIONS, json!(10))
            .build()
            .snapshot()
    }

    #[tokio::test]
    async fn e2e_exit_zero_proceeds_to_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let node = e2e_node_with_exit(dir.path(), 0);
        let partial = node.run(snapshot_with_iterations(0), node_ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        assert_eq!(extra.get(keys::NEXT_NODE), Some(&json!("finalize")));
    }

    #[tokio::test]
    async fn e2e_exit_five_is_forward_progress() {
        // "No tests collected" proceeds to finalize rather than looping.
        let dir = tempfile::tempdir().unwrap();
        let node = e2e_node_with_exit(dir.path(), 5);
        let partial = node.run(snapshot_with_iterations(0), node_ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        assert_eq!(extra.get(keys::NEXT_NODE), Some(&json!("finalize")));
        assert_eq!(extra.get(keys::ERROR_MESSAGE), Some(&json!("")));
    }

    #[tokio::test]
    async fn e2e_exit_one_loops_back_to_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let node = e2e_node_with_exit(dir.path(), 1);
        let partial = node.run(snapshot_with_iterations(0), node_ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        assert_eq!(extra.get(keys::NEXT_NODE), Some(&json!("implement_code")));
        assert_eq!(extra.get(keys::ITERATION_COUNT), Some(&json!(1)));
    }

    #[tokio::test]
    async fn e2e_internal_error_exit_codes_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let node = e2e_node_with_exit(dir.path(), 3);
        let partial = node.run(snapshot_with_iterations(0), node_ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        let error = extra
            .get(keys::ERROR_MESSAGE)
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(error.starts_with("INTERNAL"), "{error}");
        assert!(!extra.contains_key(keys::NEXT_NODE));
    }

    #[test]
    fn code_blocks_require_file_markers() {
        let response = "\
Intro text.

```rust
// file: src/feature.rs
pub fn feature() -> u32 { 42 }
```

```text
not a file block
```

```rust
// file: src/other.rs
pub fn other() {}
```
";
        let blocks = ImplementCodeNode::parse_code_blocks(response);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, "src/feature.rs");
        assert!(blocks[0].1.contains("pub fn feature"));
        assert_eq!(blocks[1].0, "src/other.rs");
    }

    #[test]
    fn scaffold_renders_one_stub_per_scenario() {
        let lld = "\
## 3. Requirements

1. REQ-1: Sessions expire.

## 10. Test Plan

### test_session_expiry
Covers REQ-1.

### test_session_refresh
Covers REQ-1.
";
        let content = ScaffoldTestsNode::render_test_file(lld, 42).unwrap();
        assert!(content.contains("fn test_session_expiry()"));
        assert!(content.contains("fn test_session_refresh()"));
        assert_eq!(content.matches("#[test]").count(), 2);
        assert!(content.contains("unimplemented!"));
    }

    #[test]
    fn scaffold_with_no_scenarios_is_none() {
        assert!(ScaffoldTestsNode::render_test_file("# empty", 1).is_none());
    }
}
