//! Finalization: commit the approved artifact and archive the trail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::audit::{
    archive_audit_dir, next_file_number, save_audit_file, ApprovedMetadata, FiledMetadata,
};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};

use super::super::context::WorkflowContext;
use super::run_command;

/// What finalization means for each workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeKind {
    /// Write `docs/lld/active/LLD-<NNN>.md`, emit `approved.json`, archive.
    Lld,
    /// File the issue with the tracker, emit `filed.json`, move the brief
    /// to `ideas/done/`, archive.
    Issue,
    /// Write `docs/specs/active/SPEC-<NNN>.md`, emit `approved.json`,
    /// archive.
    Spec,
    /// Emit the closing test report metadata and archive.
    Testing,
}

/// N5/N7: the terminal success node.
pub struct FinalizeNode {
    ctx: Arc<WorkflowContext>,
    kind: FinalizeKind,
}

impl FinalizeNode {
    pub fn new(ctx: Arc<WorkflowContext>, kind: FinalizeKind) -> Self {
        Self { ctx, kind }
    }

    fn audit_root(&self) -> &std::path::Path {
        match self.kind {
            FinalizeKind::Issue => &self.ctx.config.lineage_root,
            FinalizeKind::Lld | FinalizeKind::Spec | FinalizeKind::Testing => {
                &self.ctx.config.legacy_audit_root
            }
        }
    }

    fn archive(&self, snapshot: &StateSnapshot) -> Result<(), String> {
        let Some(slug) = snapshot.get_str(keys::SLUG) else {
            return Err("no slug in state".to_string());
        };
        let issue = snapshot.issue_number().unwrap_or(0);
        archive_audit_dir(self.audit_root(), slug, issue).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn finalize_lld(&self, snapshot: &StateSnapshot) -> Result<String, String> {
        let dir = self.ctx.config.lld_active_dir.clone();
        self.finalize_document(snapshot, &dir, "LLD")
    }

    fn finalize_spec(&self, snapshot: &StateSnapshot) -> Result<String, String> {
        let dir = self.ctx.config.specs_active_dir.clone();
        self.finalize_document(snapshot, &dir, "SPEC")
    }

    /// Writes the approved document to `<dir>/<prefix>-<NNN>.md` and emits
    /// the approval metadata artifact.
    fn finalize_document(
        &self,
        snapshot: &StateSnapshot,
        dir: &std::path::Path,
        prefix: &str,
    ) -> Result<String, String> {
        let Some(draft) = snapshot.current_draft() else {
            return Err("INTERNAL: no approved draft to finalize".to_string());
        };
        let issue = snapshot.issue_number().unwrap_or(0);
        std::fs::create_dir_all(dir).map_err(|e| format!("INTERNAL: {e}"))?;
        let path = dir.join(format!("{prefix}-{issue:03}.md"));
        std::fs::write(&path, draft).map_err(|e| format!("INTERNAL: {e}"))?;

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let metadata = ApprovedMetadata {
                issue_number: issue,
                issue_title: snapshot
                    .get_str(keys::ISSUE_TITLE)
                    .unwrap_or_default()
                    .to_string(),
                approved_at: Utc::now().to_rfc3339(),
                final_path: path.display().to_string(),
                total_iterations: snapshot.iteration_count(),
                draft_count: snapshot.draft_count(),
                verdict_count: snapshot.verdict_count(),
            };
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            save_audit_file(
                dir,
                number,
                "approved.json",
                &serde_json::to_string_pretty(&metadata).expect("metadata serializes"),
            )
            .map_err(|e| format!("INTERNAL: {e}"))?;
        }
        Ok(path.display().to_string())
    }

    async fn finalize_issue(&self, snapshot: &StateSnapshot) -> Result<String, String> {
        let Some(draft) = snapshot.current_draft() else {
            return Err("INTERNAL: no approved draft to file".to_string());
        };
        let title = snapshot
            .get_str(keys::ISSUE_TITLE)
            .unwrap_or("Untitled")
            .to_string();

        let (issue_number, issue_url) = if self.ctx.config.mock_mode || snapshot.mock_mode() {
            let n = snapshot.issue_number().unwrap_or(1);
            (n, format!("mock://issues/{n}"))
        } else {
            let args = vec![
                "issue".to_string(),
                "create".to_string(),
                "--title".to_string(),
                title.clone(),
                "--body".to_string(),
                draft.to_string(),
            ];
            let output = run_command(
                "gh",
                &args,
                &self.ctx.config.repo_root,
                self.ctx.config.subprocess_timeout,
            )
            .await
            .map_err(|e| format!("INTERNAL: {e}"))?;
            if output.exit_code != 0 {
                return Err(format!(
                    "INTERNAL: tracker rejected the issue: {}",
                    output.stderr.trim()
                ));
            }
            let url = output.stdout.trim().to_string();
            let number = url
                .rsplit('/')
                .next()
                .and_then(|tail| tail.parse::<u64>().ok())
                .unwrap_or(0);
            (number, url)
        };

        // Stage the brief into done/ under its issue number.
        let brief_file = snapshot.get_str(keys::BRIEF_FILE).unwrap_or_default();
        if !brief_file.is_empty() {
            let src = self.ctx.config.repo_root.join(brief_file);
            if src.exists() {
                let name = src
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let done = &self.ctx.config.ideas_done_dir;
                std::fs::create_dir_all(done).map_err(|e| format!("INTERNAL: {e}"))?;
                let dest = done.join(format!("{issue_number}-{name}"));
                std::fs::rename(&src, &dest).map_err(|e| format!("INTERNAL: {e}"))?;
            }
        }

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let metadata = FiledMetadata {
                issue_number,
                issue_url: issue_url.clone(),
                title,
                filed_at: Utc::now().to_rfc3339(),
                brief_file: brief_file.to_string(),
                total_iterations: snapshot.iteration_count(),
                draft_count: snapshot.draft_count(),
                verdict_count: snapshot.verdict_count(),
            };
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            save_audit_file(
                dir,
                number,
                "filed.json",
                &serde_json::to_string_pretty(&metadata).expect("metadata serializes"),
            )
            .map_err(|e| format!("INTERNAL: {e}"))?;
        }
        Ok(issue_url)
    }

    fn finalize_testing(&self, snapshot: &StateSnapshot) -> Result<String, String> {
        let test_files: Vec<String> = snapshot
            .extra
            .get(keys::TEST_FILES)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            let summary = format!(
                "# Testing workflow complete\n\niterations: {}\ntest files:\n{}",
                snapshot.iteration_count(),
                test_files
                    .iter()
                    .map(|f| format!("- {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            let dir = std::path::Path::new(audit_dir);
            let number = next_file_number(dir);
            save_audit_file(dir, number, "test-report", &summary)
                .map_err(|e| format!("INTERNAL: {e}"))?;
        }
        Ok(test_files.first().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Node for FinalizeNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let final_path = match self.kind {
            FinalizeKind::Lld => self.finalize_lld(&snapshot),
            FinalizeKind::Issue => self.finalize_issue(&snapshot).await,
            FinalizeKind::Spec => self.finalize_spec(&snapshot),
            FinalizeKind::Testing => self.finalize_testing(&snapshot),
        };
        let final_path = match final_path {
            Ok(path) => path,
            Err(reason) => return Ok(NodePartial::fail(reason)),
        };

        if let Err(e) = self.archive(&snapshot) {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: failed to archive audit trail: {e}"
            )));
        }

        // Stage the archived trail and the final artifact for one commit.
        // Best-effort: a missing VCS or non-repo workspace is not fatal.
        if !self.ctx.config.mock_mode && !snapshot.mock_mode() {
            let mut args = vec![
                "add".to_string(),
                "--all".to_string(),
                self.audit_root().display().to_string(),
            ];
            if std::path::Path::new(&final_path).exists() {
                args.push(final_path.clone());
            }
            if let Err(e) = run_command(
                "git",
                &args,
                &self.ctx.config.repo_root,
                self.ctx.config.subprocess_timeout,
            )
            .await
            {
                tracing::warn!(error = %e, "failed to stage audit artifacts");
            }
        }
        ctx.emit("finalize", format!("final artifact: {final_path}"));

        Ok(NodePartial::new()
            .set(keys::FINAL_PATH, json!(final_path))
            .clear_error())
    }
}
