//! Review: second-model verdict over the current draft.
//!
//! The reviewer's output is parsed, not interpreted: an explicit checked
//! `[x] **APPROVED**` / `[x] **BLOCKED**` marker wins, a bare verdict
//! word is accepted as a fallback, and anything ambiguous defaults to
//! BLOCKED. Blocking issues come out of the "Required Changes" section.
//! Every verdict lands in the governance JSONL log.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{next_file_number, save_audit_file, AuditEntry};
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};

use super::super::context::WorkflowContext;

/// Parses the verdict from a reviewer response.
///
/// Precedence: explicit checked markers, then bare verdict words, then
/// the BLOCKED default for anything unclear.
#[must_use]
pub fn parse_verdict(response: &str) -> &'static str {
    for line in response.lines() {
        let lower = line.to_ascii_lowercase();
        let checked = lower.contains("[x]");
        if checked && lower.contains("approved") {
            return "APPROVED";
        }
        if checked && (lower.contains("blocked") || lower.contains("revise")) {
            return "BLOCKED";
        }
    }
    let upper = response.to_ascii_uppercase();
    let has_approved = upper.contains("APPROVED");
    let has_blocked = upper.contains("BLOCKED");
    match (has_approved, has_blocked) {
        (true, false) => "APPROVED",
        _ => "BLOCKED",
    }
}

/// Extracts blocking issues from a "Required Changes" section: numbered
/// and bulleted items until the next heading. Falls back to a pointer at
/// the full verdict when the section is absent.
#[must_use]
pub fn extract_blocking_issues(response: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let mut in_section = false;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            in_section = trimmed.to_ascii_lowercase().contains("required changes");
            continue;
        }
        if !in_section || trimmed.is_empty() {
            continue;
        }
        let item = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| {
                trimmed
                    .split_once(". ")
                    .filter(|(head, _)| head.chars().all(|c| c.is_ascii_digit()))
                    .map(|(_, rest)| rest)
            });
        if let Some(item) = item {
            issues.push(item.trim().to_string());
        }
    }
    issues
}

/// N3: reviewer invocation, verdict parsing, audit logging.
pub struct ReviewNode {
    ctx: Arc<WorkflowContext>,
    system_prompt: String,
}

impl ReviewNode {
    pub fn new(ctx: Arc<WorkflowContext>, system_prompt: impl Into<String>) -> Self {
        Self {
            ctx,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl Node for ReviewNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        // LLD/issue flows review the live draft; the testing flow reviews
        // the approved LLD's test plan.
        let Some(draft) = snapshot
            .current_draft()
            .or_else(|| snapshot.get_str(keys::LLD_CONTENT))
        else {
            return Ok(NodePartial::fail("INTERNAL: no document to review"));
        };

        let result = self
            .ctx
            .reviewer
            .invoke(&self.system_prompt, draft, self.ctx.config.provider_timeout)
            .await;

        if !result.success {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: reviewer failed: {}",
                result.error_message.as_deref().unwrap_or("unknown")
            )));
        }

        let response = result.response.as_deref().unwrap_or_default().to_string();
        let verdict = parse_verdict(&response);
        let blocking = if verdict == "BLOCKED" {
            let issues = extract_blocking_issues(&response);
            if issues.is_empty() {
                vec!["See full verdict in the audit trail".to_string()]
            } else {
                issues
            }
        } else {
            Vec::new()
        };

        // Open-question and human-escalation markers drive routing.
        let open_questions = if response.contains("UNANSWERED") {
            "UNANSWERED"
        } else if response.contains("HUMAN_REQUIRED") {
            "HUMAN_REQUIRED"
        } else {
            "NONE"
        };

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            if let Err(e) = save_audit_file(dir, number, "verdict", &response) {
                return Ok(NodePartial::fail(format!(
                    "INTERNAL: failed to persist verdict: {e}"
                )));
            }
        }

        let entry = AuditEntry::new(
            &ctx.node_id,
            self.ctx.reviewer.model(),
            &result.model_used,
            snapshot.issue_number().unwrap_or(0),
            verdict,
            &response,
            blocking.clone(),
            result.raw_response.as_deref().unwrap_or_default(),
            result.duration_ms,
            &result.credential_used,
            result.rotation_occurred,
            result.attempts,
            snapshot.iteration_count(),
        );
        if let Err(e) = self.ctx.audit_log.log(&entry) {
            tracing::warn!(error = %e, "failed to append governance log entry");
        }

        ctx.emit("review", format!("verdict: {verdict}"));

        let feedback = if verdict == "BLOCKED" {
            format!(
                "## Reviewer verdict: BLOCKED\n\n{}",
                blocking
                    .iter()
                    .map(|i| format!("- {i}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        } else {
            String::new()
        };

        Ok(NodePartial::new()
            .with_messages(vec![Message::assistant(&response)])
            .set(keys::REVIEW_VERDICT, json!(verdict))
            .set(keys::BLOCKING_ISSUES, json!(blocking))
            .set(keys::OPEN_QUESTIONS_STATUS, json!(open_questions))
            .set(keys::VERDICT_COUNT, json!(snapshot.verdict_count() + 1))
            .set(keys::USER_FEEDBACK, json!(feedback))
            .set(
                keys::LLD_STATUS,
                json!(if verdict == "APPROVED" {
                    "APPROVED"
                } else {
                    "BLOCKED"
                }),
            )
            .clear_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_checked_approved_wins() {
        let response = "[x] **APPROVED** - Ready\n[ ] **BLOCKED** - Needs work";
        assert_eq!(parse_verdict(response), "APPROVED");
    }

    #[test]
    fn explicit_checked_blocked_wins() {
        let response = "[ ] **APPROVED**\n[X] **BLOCKED** - Needs revision";
        assert_eq!(parse_verdict(response), "BLOCKED");
    }

    #[test]
    fn implicit_verdict_words_are_accepted() {
        assert_eq!(parse_verdict("The plan is APPROVED for implementation."), "APPROVED");
        assert_eq!(parse_verdict("This remains BLOCKED."), "BLOCKED");
    }

    #[test]
    fn ambiguity_defaults_to_blocked() {
        assert_eq!(parse_verdict("Some unclear response"), "BLOCKED");
        assert_eq!(parse_verdict("APPROVED but also BLOCKED"), "BLOCKED");
    }

    #[test]
    fn blocking_issues_come_from_required_changes() {
        let response = "\
## Verdict
[x] **BLOCKED**

## Required Changes

1. Add coverage for REQ-3
- Tighten the rollout plan

## Notes
Other text.";
        let issues = extract_blocking_issues(response);
        assert_eq!(
            issues,
            vec![
                "Add coverage for REQ-3".to_string(),
                "Tighten the rollout plan".to_string()
            ]
        );
    }

    #[test]
    fn absent_section_yields_no_issues() {
        assert!(extract_blocking_issues("BLOCKED, fix things").is_empty());
    }
}
