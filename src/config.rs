//! Orchestrator configuration.
//!
//! One struct carries everything the workflows need to know about their
//! environment: repository layout, audit roots, provider specs, gate
//! toggles, and per-workflow iteration caps. Defaults mirror the
//! documented filesystem contract; tests point `repo_root` at a tempdir
//! and everything else follows.

use std::path::PathBuf;
use std::time::Duration;

use crate::llm::ProviderSettings;

/// Full orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Repository the workflows operate on.
    pub repo_root: PathBuf,
    /// Lineage audit root (`<repo>/docs/lineage`): issue-workflow trails
    /// and the cross-workflow JSONL log.
    pub lineage_root: PathBuf,
    /// Legacy audit root (`<repo>/docs/audit`): LLD and testing workflow
    /// trails. Both roots coexist deliberately.
    pub legacy_audit_root: PathBuf,
    /// Approved LLDs (`<repo>/docs/lld/active`).
    pub lld_active_dir: PathBuf,
    /// Archived LLDs (`<repo>/docs/lld/done`).
    pub lld_done_dir: PathBuf,
    /// Approved implementation specs (`<repo>/docs/specs/active`).
    pub specs_active_dir: PathBuf,
    /// Brief staging (`<repo>/ideas/active`, `<repo>/ideas/done`).
    pub ideas_active_dir: PathBuf,
    pub ideas_done_dir: PathBuf,
    /// Cross-workflow governance log.
    pub audit_log_path: PathBuf,

    /// Drafter provider spec, e.g. `cli-provider:opus`.
    pub drafter_spec: String,
    /// Reviewer provider spec, e.g. `rotating-http:pro`.
    pub reviewer_spec: String,
    /// Provider-layer settings (credential paths, rotator tunables).
    pub provider: ProviderSettings,

    /// Whether interactive human gates are enabled.
    pub human_gates_enabled: bool,
    /// Auto mode skips gates even when they are enabled.
    pub auto_mode: bool,
    /// Mock mode replaces providers and subprocesses with fixtures.
    pub mock_mode: bool,

    /// Iteration caps. Deliberately per-workflow: the LLD loop converges
    /// (or fails) fast, the issue loop is allowed to grind, and the
    /// completeness loop is kept tight.
    pub lld_max_iterations: u64,
    pub issue_max_iterations: u64,
    pub completeness_max_iterations: u64,
    /// Mechanical-validation attempts before escalation.
    pub max_validation_attempts: u64,

    /// Files larger than this are summarized, not AST-analyzed.
    pub completeness_file_cap_bytes: usize,
    /// Per-call provider timeout.
    pub provider_timeout: Duration,
    /// Timeout for tracker/VCS subprocess calls.
    pub subprocess_timeout: Duration,
    /// Test runner invocation for the testing workflow.
    pub test_command: Vec<String>,
}

impl OrchestratorConfig {
    /// Defaults rooted at `repo_root`.
    #[must_use]
    pub fn new(repo_root: PathBuf) -> Self {
        let lineage_root = repo_root.join("docs").join("lineage");
        Self {
            legacy_audit_root: repo_root.join("docs").join("audit"),
            lld_active_dir: repo_root.join("docs").join("lld").join("active"),
            lld_done_dir: repo_root.join("docs").join("lld").join("done"),
            specs_active_dir: repo_root.join("docs").join("specs").join("active"),
            ideas_active_dir: repo_root.join("ideas").join("active"),
            ideas_done_dir: repo_root.join("ideas").join("done"),
            audit_log_path: lineage_root.join("workflow-audit.jsonl"),
            drafter_spec: "cli-provider:opus".to_string(),
            reviewer_spec: "rotating-http:pro".to_string(),
            provider: ProviderSettings::with_repo_root(repo_root.clone()),
            human_gates_enabled: false,
            auto_mode: false,
            mock_mode: false,
            lld_max_iterations: 5,
            issue_max_iterations: 20,
            completeness_max_iterations: 3,
            max_validation_attempts: 3,
            completeness_file_cap_bytes: 256 * 1024,
            provider_timeout: Duration::from_secs(300),
            subprocess_timeout: Duration::from_secs(30),
            test_command: vec!["cargo".to_string(), "test".to_string()],
            lineage_root,
            repo_root,
        }
    }

    /// Mock-mode configuration for tests: fixture providers, no gates.
    #[must_use]
    pub fn mock(repo_root: PathBuf) -> Self {
        let mut config = Self::new(repo_root);
        config.mock_mode = true;
        config.auto_mode = true;
        config.drafter_spec = "mock:draft".to_string();
        config.reviewer_spec = "mock:review".to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_follows_the_repo_root() {
        let config = OrchestratorConfig::new(PathBuf::from("/work/repo"));
        assert_eq!(
            config.lineage_root,
            PathBuf::from("/work/repo/docs/lineage")
        );
        assert_eq!(
            config.audit_log_path,
            PathBuf::from("/work/repo/docs/lineage/workflow-audit.jsonl")
        );
        assert_eq!(
            config.lld_active_dir,
            PathBuf::from("/work/repo/docs/lld/active")
        );
        assert_eq!(config.lld_max_iterations, 5);
        assert_eq!(config.issue_max_iterations, 20);
        assert_eq!(config.completeness_max_iterations, 3);
    }

    #[test]
    fn mock_config_forces_mock_providers() {
        let config = OrchestratorConfig::mock(PathBuf::from("/tmp/x"));
        assert!(config.mock_mode);
        assert!(config.auto_mode);
        assert_eq!(config.drafter_spec, "mock:draft");
        assert_eq!(config.reviewer_spec, "mock:review");
    }
}
