//! Codebase analysis: current-state excerpts for the drafter.
//!
//! Reads every file the LLD's change table touches. Modify/Delete entries
//! get a budgeted excerpt (Rust files summarized to signatures, others
//! truncated at a line boundary); Add entries get a parent-directory
//! check. A bounded set of sibling files is collected as pattern
//! references so the drafter imitates the component's neighbors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};
use crate::validators::structure::parse_file_changes;
use crate::validators::summarize_source;

use super::super::context::WorkflowContext;

/// Plain-file excerpt budget.
const MAX_EXCERPT_LINES: usize = 80;
/// Pattern references collected per change entry.
const MAX_PATTERN_REFS: usize = 5;

/// N0b: build the codebase context block for the drafter prompt.
pub struct AnalyzeCodebaseNode {
    ctx: Arc<WorkflowContext>,
}

impl AnalyzeCodebaseNode {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn excerpt(path: &std::path::Path, content: &str) -> String {
        if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            let summary = summarize_source(content);
            if !summary.is_empty() {
                return summary;
            }
        }
        content
            .lines()
            .take(MAX_EXCERPT_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn pattern_references(&self, rel_path: &std::path::Path) -> Vec<String> {
        let Some(parent) = rel_path.parent() else {
            return Vec::new();
        };
        let abs_parent = self.ctx.config.repo_root.join(parent);
        let Ok(entries) = std::fs::read_dir(&abs_parent) else {
            return Vec::new();
        };
        let own_name = rel_path.file_name().map(|n| n.to_os_string());
        let extension = rel_path.extension().map(|e| e.to_os_string());
        let mut refs: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter(|e| Some(e.file_name()) != own_name)
            .filter(|e| e.path().extension().map(|x| x.to_os_string()) == extension)
            .map(|e| parent.join(e.file_name()).display().to_string())
            .collect();
        refs.sort();
        refs.truncate(MAX_PATTERN_REFS);
        refs
    }
}

#[async_trait]
impl Node for AnalyzeCodebaseNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let seed = snapshot
            .get_str(keys::LLD_CONTENT)
            .or_else(|| snapshot.get_str(keys::ISSUE_BODY))
            .unwrap_or_default();

        let changes = parse_file_changes(seed);
        let mut sections: Vec<String> = Vec::new();
        let mut all_refs: Vec<String> = Vec::new();

        for change in &changes {
            let rel = std::path::Path::new(&change.path);
            let abs = self.ctx.config.repo_root.join(rel);
            match change.change_type.as_str() {
                "Modify" | "Delete" => match std::fs::read_to_string(&abs) {
                    Ok(content) => {
                        sections.push(format!(
                            "## Current: {} ({})\n\n```\n{}\n```",
                            change.path,
                            change.change_type,
                            Self::excerpt(rel, &content)
                        ));
                    }
                    Err(_) => {
                        sections.push(format!(
                            "## Current: {} ({}) — file missing on disk",
                            change.path, change.change_type
                        ));
                    }
                },
                _ => {
                    let parent_ok = rel
                        .parent()
                        .map(|p| self.ctx.config.repo_root.join(p).is_dir())
                        .unwrap_or(true);
                    if !parent_ok {
                        sections.push(format!(
                            "## New: {} — parent directory does not exist yet",
                            change.path
                        ));
                    }
                }
            }
            for r in self.pattern_references(rel) {
                if !all_refs.contains(&r) {
                    all_refs.push(r);
                }
            }
        }

        if !all_refs.is_empty() {
            all_refs.truncate(MAX_PATTERN_REFS * 2);
            sections.push(format!(
                "## Pattern references (neighboring components)\n\n{}",
                all_refs
                    .iter()
                    .map(|r| format!("- {r}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        ctx.emit(
            "analyze",
            format!(
                "{} change entries, {} pattern references",
                changes.len(),
                all_refs.len()
            ),
        );

        Ok(NodePartial::new()
            .set(keys::CODEBASE_CONTEXT, json!(sections.join("\n\n")))
            .clear_error())
    }
}
