//! Draft generation through the configured drafter provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{next_file_number, save_audit_file};
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};

use super::super::context::WorkflowContext;

/// N1: compose the prompt, invoke the drafter, persist the draft.
///
/// Revision cycles feed accumulated validator/reviewer feedback back into
/// the prompt so the model does not regress fixed issues. Any preamble
/// the model emits before the first `#` heading is stripped — drafts are
/// documents, not chat.
pub struct GenerateDraftNode {
    ctx: Arc<WorkflowContext>,
    system_prompt: String,
    audit_suffix: &'static str,
}

impl GenerateDraftNode {
    pub fn new(ctx: Arc<WorkflowContext>, system_prompt: impl Into<String>) -> Self {
        Self {
            ctx,
            system_prompt: system_prompt.into(),
            audit_suffix: "draft",
        }
    }

    /// Variant for the implementation-spec stage (different artifact name).
    pub fn for_spec(ctx: Arc<WorkflowContext>, system_prompt: impl Into<String>) -> Self {
        Self {
            ctx,
            system_prompt: system_prompt.into(),
            audit_suffix: "spec-draft",
        }
    }

    fn compose_content(&self, snapshot: &StateSnapshot) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(brief) = snapshot.get_str(keys::BRIEF_CONTENT) {
            parts.push(format!("# Seed brief\n\n{brief}"));
        }
        if let Some(issue) = snapshot.get_str(keys::ISSUE_BODY) {
            parts.push(format!("# Seed issue\n\n{issue}"));
        }
        if let Some(lld) = snapshot.get_str(keys::LLD_CONTENT) {
            parts.push(format!("# Approved LLD\n\n{lld}"));
        }
        if let Some(context) = snapshot.get_str(keys::CODEBASE_CONTEXT) {
            if !context.is_empty() {
                parts.push(format!("# Codebase context\n\n{context}"));
            }
        }
        for reference in self.context_file_sections(snapshot) {
            parts.push(reference);
        }
        if let Some(feedback) = snapshot.get_str(keys::USER_FEEDBACK) {
            if !feedback.is_empty() {
                parts.push(format!(
                    "# Revision feedback (address every point)\n\n{feedback}"
                ));
            }
        }
        if let Some(prior) = snapshot.current_draft() {
            if snapshot
                .get_str(keys::USER_FEEDBACK)
                .map(|f| !f.is_empty())
                .unwrap_or(false)
            {
                parts.push(format!("# Previous draft (revise, do not restart)\n\n{prior}"));
            }
        }
        parts.join("\n\n---\n\n")
    }

    /// Renders operator-supplied context files (`--context`, repeatable)
    /// as reference sections. Paths must stay inside the repository;
    /// anything else is skipped with a warning.
    fn context_file_sections(&self, snapshot: &StateSnapshot) -> Vec<String> {
        let Some(files) = snapshot.extra.get(keys::CONTEXT_FILES).and_then(|v| v.as_array())
        else {
            return Vec::new();
        };
        let repo_root = &self.ctx.config.repo_root;
        let mut sections = Vec::new();
        for value in files {
            let Some(rel) = value.as_str() else { continue };
            if rel.contains("..") || std::path::Path::new(rel).is_absolute() {
                tracing::warn!(path = rel, "skipping context file outside the repository");
                continue;
            }
            match std::fs::read_to_string(repo_root.join(rel)) {
                Ok(content) => {
                    sections.push(format!("# Reference: {rel}\n\n```\n{content}\n```"));
                }
                Err(e) => {
                    tracing::warn!(path = rel, error = %e, "skipping unreadable context file");
                }
            }
        }
        sections
    }

    /// Drops anything before the first markdown heading.
    fn strip_preamble(response: &str) -> &str {
        match response.find("\n#") {
            _ if response.starts_with('#') => response,
            Some(idx) => &response[idx + 1..],
            None => response,
        }
    }
}

#[async_trait]
impl Node for GenerateDraftNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let content = self.compose_content(&snapshot);
        let result = self
            .ctx
            .drafter
            .invoke(&self.system_prompt, &content, self.ctx.config.provider_timeout)
            .await;

        if !result.success {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: drafter failed: {}",
                result.error_message.as_deref().unwrap_or("unknown")
            )));
        }
        let response = result.response.as_deref().unwrap_or_default();
        let draft = Self::strip_preamble(response).trim().to_string();
        if draft.is_empty() {
            return Ok(NodePartial::fail("INTERNAL: drafter returned empty draft"));
        }

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            if let Err(e) = save_audit_file(dir, number, self.audit_suffix, &draft) {
                return Ok(NodePartial::fail(format!(
                    "INTERNAL: failed to persist draft: {e}"
                )));
            }
        }

        ctx.emit(
            "generate",
            format!(
                "draft #{} via {} ({} chars)",
                snapshot.draft_count() + 1,
                result.provider,
                draft.len()
            ),
        );

        Ok(NodePartial::new()
            .with_messages(vec![Message::assistant(&draft)])
            .set(keys::CURRENT_DRAFT, json!(draft))
            .set(keys::DRAFT_COUNT, json!(snapshot.draft_count() + 1))
            .set(keys::ITERATION_COUNT, json!(snapshot.iteration_count() + 1))
            .set(keys::USER_FEEDBACK, json!(""))
            .set(keys::LLD_STATUS, json!("DRAFTED"))
            .clear_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_is_stripped_before_first_heading() {
        let response = "Sure, here is the design you asked for:\n\n# LLD-042\n\nBody.";
        assert_eq!(
            GenerateDraftNode::strip_preamble(response),
            "# LLD-042\n\nBody."
        );
    }

    #[test]
    fn heading_first_responses_pass_through() {
        let response = "# LLD-042\n\nBody.";
        assert_eq!(GenerateDraftNode::strip_preamble(response), response);
    }

    #[test]
    fn headingless_responses_pass_through() {
        let response = "no headings at all";
        assert_eq!(GenerateDraftNode::strip_preamble(response), response);
    }
}
