//! Input loading: brief files, tracker issues, approved LLDs.
//!
//! The first real node of every workflow. Besides fetching the seed it
//! allocates the run's audit directory and writes the seed as artifact
//! `001-<suffix>`, so even a run that dies immediately leaves a trail.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{create_audit_dir, generate_slug, next_file_number, save_audit_file};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};

use super::super::context::WorkflowContext;
use super::run_command;

/// Where the workflow's seed comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// A markdown brief from `ideas/active/` (issue workflow).
    BriefFile,
    /// A tracker issue fetched via the tracker CLI (LLD workflow).
    TrackerIssue,
    /// An approved LLD from `docs/lld/` (testing workflow). Must carry an
    /// approval marker or the workflow refuses to start.
    ApprovedLld,
}

/// N0: fetch the seed, allocate the audit dir, write artifact 001.
pub struct LoadInputNode {
    ctx: Arc<WorkflowContext>,
    source: InputSource,
    /// Workflow label for the legacy audit directory (`<issue>-<kind>`).
    kind_override: Option<&'static str>,
}

impl LoadInputNode {
    pub fn new(ctx: Arc<WorkflowContext>, source: InputSource) -> Self {
        Self {
            ctx,
            source,
            kind_override: None,
        }
    }

    /// Overrides the audit-directory label (the spec workflow loads an
    /// approved LLD but trails under `<issue>-spec`).
    #[must_use]
    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind_override = Some(kind);
        self
    }

    fn allocate_audit_dir(
        &self,
        snapshot: &StateSnapshot,
        kind: &str,
    ) -> Result<(String, std::path::PathBuf), String> {
        let config = &self.ctx.config;
        match self.source {
            InputSource::BriefFile => {
                let slug = generate_slug(&config.repo_root, &config.lineage_root)
                    .map_err(|e| e.to_string())?;
                let dir = create_audit_dir(&config.lineage_root, &slug)
                    .map_err(|e| e.to_string())?;
                Ok((slug, dir))
            }
            // LLD and testing workflows keep the legacy layout:
            // docs/audit/active/<issue>-<kind>/ (may already exist on resume).
            InputSource::TrackerIssue | InputSource::ApprovedLld => {
                let issue = snapshot.issue_number().unwrap_or(0);
                let slug = format!("{issue}-{kind}");
                let dir = config.legacy_audit_root.join("active").join(&slug);
                std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
                Ok((slug, dir))
            }
        }
    }

    fn load_brief(&self, snapshot: &StateSnapshot) -> Result<(String, String), String> {
        let Some(brief_file) = snapshot.get_str(keys::BRIEF_FILE) else {
            return Err("INPUT_NOT_FOUND: no brief file in state".to_string());
        };
        let path = self.ctx.config.repo_root.join(brief_file);
        if !path.exists() {
            return Err(format!("INPUT_NOT_FOUND: brief not found: {brief_file}"));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("INTERNAL: failed to read brief: {e}"))?;
        let title = content
            .lines()
            .find(|l| l.starts_with('#'))
            .map(|l| l.trim_start_matches('#').trim().to_string())
            .unwrap_or_else(|| brief_file.to_string());
        Ok((title, content))
    }

    async fn fetch_issue(&self, issue_number: u64) -> Result<(String, String), String> {
        if self.ctx.config.mock_mode {
            return Ok((
                format!("Mock issue #{issue_number}"),
                format!("# Mock issue #{issue_number}\n\nFixture body for workflow tests."),
            ));
        }
        let args = vec![
            "issue".to_string(),
            "view".to_string(),
            issue_number.to_string(),
            "--json".to_string(),
            "title,body".to_string(),
        ];
        let output = run_command(
            "gh",
            &args,
            &self.ctx.config.repo_root,
            self.ctx.config.subprocess_timeout,
        )
        .await
        .map_err(|e| format!("INPUT_NOT_FOUND: {e}"))?;

        if output.exit_code != 0 {
            return Err(format!(
                "INPUT_NOT_FOUND: tracker returned {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        let parsed: serde_json::Value = serde_json::from_str(&output.stdout)
            .map_err(|e| format!("INTERNAL: malformed tracker payload: {e}"))?;
        let title = parsed
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let body = parsed
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((title.clone(), format!("# {title}\n\n{body}")))
    }

    fn load_approved_lld(&self, issue_number: u64) -> Result<String, String> {
        let config = &self.ctx.config;
        let padded = format!("LLD-{issue_number:03}.md");
        let unpadded = format!("LLD-{issue_number}.md");
        let mut found = None;
        for dir in [&config.lld_active_dir, &config.lld_done_dir] {
            for name in [&padded, &unpadded] {
                let candidate = dir.join(name);
                if candidate.exists() {
                    found = Some(candidate);
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }
        let Some(path) = found else {
            return Err(format!(
                "INPUT_NOT_FOUND: no LLD for issue #{issue_number} in docs/lld"
            ));
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("INTERNAL: failed to read LLD: {e}"))?;

        // Acting on a finished artifact requires the approval marker.
        let approved = content.lines().any(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("status") && lower.contains("approved")
        });
        if !approved {
            return Err(format!(
                "INPUT_NOT_APPROVED: {} lacks an approval marker",
                path.display()
            ));
        }
        Ok(content)
    }
}

#[async_trait]
impl Node for LoadInputNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let issue_number = snapshot.issue_number().unwrap_or(0);

        let (default_kind, artifact_suffix) = match self.source {
            InputSource::BriefFile => ("issue", "brief"),
            InputSource::TrackerIssue => ("lld", "issue"),
            InputSource::ApprovedLld => ("testing", "issue"),
        };
        let kind = self.kind_override.unwrap_or(default_kind);

        // On resume the audit dir is already in state; do not reallocate.
        let (slug, audit_dir) = match snapshot.get_str(keys::AUDIT_DIR) {
            Some(existing) => (
                snapshot.get_str(keys::SLUG).unwrap_or(kind).to_string(),
                std::path::PathBuf::from(existing),
            ),
            None => match self.allocate_audit_dir(&snapshot, kind) {
                Ok(pair) => pair,
                Err(reason) => return Ok(NodePartial::fail(reason)),
            },
        };

        let loaded = match self.source {
            InputSource::BriefFile => self.load_brief(&snapshot),
            InputSource::TrackerIssue => self.fetch_issue(issue_number).await,
            InputSource::ApprovedLld => self
                .load_approved_lld(issue_number)
                .map(|content| (format!("LLD for issue #{issue_number}"), content)),
        };
        let (title, content) = match loaded {
            Ok(pair) => pair,
            Err(reason) => return Ok(NodePartial::fail(reason)),
        };

        let number = next_file_number(&audit_dir);
        if let Err(e) = save_audit_file(&audit_dir, number, artifact_suffix, &content) {
            return Ok(NodePartial::fail(format!(
                "INTERNAL: failed to write audit artifact: {e}"
            )));
        }
        ctx.emit("load_input", format!("loaded seed '{title}'"));

        let content_key = match self.source {
            InputSource::BriefFile => keys::BRIEF_CONTENT,
            InputSource::TrackerIssue => keys::ISSUE_BODY,
            InputSource::ApprovedLld => keys::LLD_CONTENT,
        };

        Ok(NodePartial::new()
            .set(keys::ISSUE_TITLE, json!(title))
            .set(content_key, json!(content))
            .set(keys::SLUG, json!(slug))
            .set(keys::AUDIT_DIR, json!(audit_dir.display().to_string()))
            .clear_error())
    }
}
