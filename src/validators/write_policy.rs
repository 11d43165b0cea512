//! Write-path enforcement for model-produced files.
//!
//! The implementer node writes whatever paths the model names; this is
//! the deterministic gate in front of that. Two layers:
//!
//! 1. A static policy: writes must be repository-relative,
//!    traversal-free, and out of the governance-owned directories — a
//!    model must never be able to rewrite an approved LLD or its own
//!    audit trail.
//! 2. A per-run allowlist ([`LldWritePlan`]) extracted from the approved
//!    LLD's Files-Changed table: the implementer may only touch paths
//!    the design declares. Scaffolded test files are additionally
//!    protected ("do not modify"), and a rejected path comes back with
//!    the closest declared path as a suggestion, because the usual
//!    failure mode is a near-miss, not sabotage.

use std::collections::BTreeSet;

use miette::Diagnostic;
use thiserror::Error;

use super::structure::parse_file_changes;

/// Directories the orchestrator owns; model writes are refused here.
const PROTECTED_PREFIXES: &[&str] = &[
    "docs/lld",
    "docs/lineage",
    "docs/audit",
    "ideas",
    ".steward",
    ".git",
];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "conf"];

/// Suggestions below this similarity ratio are noise, not help.
const SUGGESTION_THRESHOLD: f64 = 0.4;

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum WritePolicyError {
    #[error("absolute path refused: {path}")]
    #[diagnostic(
        code(steward::write_policy::absolute),
        help("Model-produced files must use repository-relative paths.")
    )]
    Absolute { path: String },

    #[error("path escapes the repository: {path}")]
    #[diagnostic(code(steward::write_policy::traversal))]
    Traversal { path: String },

    #[error("path is governance-owned and not writable by the implementer: {path}")]
    #[diagnostic(
        code(steward::write_policy::protected),
        help("Approved designs and audit trails are written by the orchestrator only.")
    )]
    Protected { path: String },

    #[error("path not declared in the approved design: {path}{suggestion}")]
    #[diagnostic(
        code(steward::write_policy::off_plan),
        help("Writes must target a path from the design's Files-Changed table.")
    )]
    OffPlan {
        path: String,
        /// Empty, or ` Did you mean '<closest declared path>'?`.
        suggestion: String,
    },

    #[error("scaffolded test file is not writable by the implementer: {path}")]
    #[diagnostic(
        code(steward::write_policy::scaffolded_test),
        help("The red tests define the contract; the implementation must satisfy them, not edit them.")
    )]
    ScaffoldedTest { path: String },

    #[error("empty path refused")]
    #[diagnostic(code(steward::write_policy::empty))]
    Empty,
}

/// Validates a repository-relative write target against the static
/// policy only (layer 1). [`validate_file_write`] adds the per-run
/// allowlist on top.
pub fn validate_write_path(rel_path: &str) -> Result<(), WritePolicyError> {
    let trimmed = rel_path.trim();
    if trimmed.is_empty() {
        return Err(WritePolicyError::Empty);
    }
    let path = std::path::Path::new(trimmed);
    if path.is_absolute() || trimmed.starts_with('~') {
        return Err(WritePolicyError::Absolute {
            path: trimmed.to_string(),
        });
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(WritePolicyError::Traversal {
            path: trimmed.to_string(),
        });
    }
    let normalized = normalize_path(trimmed);
    for prefix in PROTECTED_PREFIXES {
        if normalized == *prefix || normalized.starts_with(&format!("{prefix}/")) {
            return Err(WritePolicyError::Protected {
                path: trimmed.to_string(),
            });
        }
    }
    Ok(())
}

/// The approved design's declared write targets, categorized.
///
/// Built from the LLD's Files-Changed table; an empty plan means the
/// design declares nothing writable and every implementer write is
/// rejected.
#[derive(Debug, Clone, Default)]
pub struct LldWritePlan {
    pub implementation_files: Vec<String>,
    pub test_files: Vec<String>,
    pub config_files: Vec<String>,
    allowed: BTreeSet<String>,
    scaffolded: BTreeSet<String>,
}

impl LldWritePlan {
    /// Extracts the declared paths from the LLD's Files-Changed table.
    #[must_use]
    pub fn from_lld(lld: &str) -> Self {
        let mut plan = Self::default();
        for change in parse_file_changes(lld) {
            let normalized = normalize_path(&change.path);
            if normalized.is_empty() || !plan.allowed.insert(normalized.clone()) {
                continue;
            }
            if is_test_path(&normalized) {
                plan.test_files.push(normalized);
            } else if is_config_path(&normalized) {
                plan.config_files.push(normalized);
            } else {
                plan.implementation_files.push(normalized);
            }
        }
        plan
    }

    /// Marks already-scaffolded test files as protected: declared in the
    /// design, but not writable by the implementer.
    #[must_use]
    pub fn with_scaffolded<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for file in files {
            self.scaffolded.insert(normalize_path(file.as_ref()));
        }
        self
    }

    /// Whether the design declares no writable paths at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Whether the (normalized) path is declared by the design.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        self.allowed.contains(&normalize_path(path))
    }

    /// All declared paths, sorted.
    pub fn declared_paths(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Prompt section enumerating the allowed paths, with scaffolded
    /// tests flagged. Empty when the plan is empty.
    #[must_use]
    pub fn prompt_section(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "## Required file paths (from the approved design — do not deviate)".to_string(),
            String::new(),
            "Write ONLY to these paths:".to_string(),
            String::new(),
        ];
        for path in self.declared_paths() {
            if self.scaffolded.contains(path) {
                lines.push(format!("- `{path}` — DO NOT MODIFY (already scaffolded)"));
            } else {
                lines.push(format!("- `{path}`"));
            }
        }
        lines.push(String::new());
        lines.push("Files written to any other path will be rejected.".to_string());
        lines.join("\n")
    }
}

/// Validates an implementer write: the static policy first, then the
/// scaffolded-test protection, then allowlist membership. Off-plan
/// rejections carry a `Did you mean` suggestion when a declared path is
/// close enough.
pub fn validate_file_write(
    rel_path: &str,
    plan: &LldWritePlan,
) -> Result<(), WritePolicyError> {
    validate_write_path(rel_path)?;

    let normalized = normalize_path(rel_path);
    if plan.scaffolded.contains(&normalized) {
        return Err(WritePolicyError::ScaffoldedTest {
            path: rel_path.trim().to_string(),
        });
    }
    if plan.allows(&normalized) {
        return Ok(());
    }

    let suggestion = find_closest_path(&normalized, plan.declared_paths())
        .map(|closest| format!(" Did you mean '{closest}'?"))
        .unwrap_or_default();
    Err(WritePolicyError::OffPlan {
        path: rel_path.trim().to_string(),
        suggestion,
    })
}

/// The most similar declared path, if any is similar enough to be a
/// plausible near-miss.
pub fn find_closest_path<'a>(
    requested: &str,
    declared: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in declared {
        let ratio = similarity(requested, candidate);
        if best.map(|(_, r)| ratio > r).unwrap_or(true) {
            best = Some((candidate, ratio));
        }
    }
    best.filter(|(_, ratio)| *ratio > SUGGESTION_THRESHOLD)
        .map(|(path, _)| path)
}

/// Similarity ratio in `[0, 1]`: twice the longest-common-subsequence
/// length over the combined lengths. Paths are short, so the quadratic
/// table is fine.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    2.0 * prev[b.len()] as f64 / (a.len() + b.len()) as f64
}

/// Strips a leading `./` and normalizes separators for comparison.
fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

fn is_test_path(path: &str) -> bool {
    let components: Vec<&str> = path.split('/').collect();
    if components
        .iter()
        .any(|c| *c == "tests" || *c == "test")
    {
        return true;
    }
    components
        .last()
        .map(|name| name.starts_with("test_"))
        .unwrap_or(false)
}

fn is_config_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLD: &str = "\
## 2. Files Changed

| File | Change Type | Description |
|------|-------------|-------------|
| `src/auth/session.rs` | Add | Session store |
| `./src/auth/mod.rs` | Modify | Wire session store |
| `tests/session_test.rs` | Add | Scenario tests |
| `config/auth.toml` | Add | Timeout settings |
";

    fn plan() -> LldWritePlan {
        LldWritePlan::from_lld(LLD)
    }

    #[test]
    fn static_policy_allows_ordinary_source_paths() {
        assert_eq!(validate_write_path("src/feature.rs"), Ok(()));
        assert_eq!(validate_write_path("tests/issue_42.rs"), Ok(()));
        assert_eq!(validate_write_path("docs/guide.md"), Ok(()));
    }

    #[test]
    fn absolute_paths_are_refused() {
        assert!(matches!(
            validate_write_path("/etc/passwd"),
            Err(WritePolicyError::Absolute { .. })
        ));
        assert!(matches!(
            validate_write_path("~/own-goal.rs"),
            Err(WritePolicyError::Absolute { .. })
        ));
    }

    #[test]
    fn traversal_is_refused() {
        assert!(matches!(
            validate_write_path("../outside.rs"),
            Err(WritePolicyError::Traversal { .. })
        ));
        assert!(matches!(
            validate_write_path("src/../../outside.rs"),
            Err(WritePolicyError::Traversal { .. })
        ));
    }

    #[test]
    fn governance_directories_are_protected() {
        for path in [
            "docs/lld/active/LLD-001.md",
            "docs/lineage/workflow-audit.jsonl",
            "docs/audit/active/7-lld/001-issue",
            "ideas/active/brief.md",
            ".steward/credentials.json",
            ".git/config",
        ] {
            assert!(
                matches!(
                    validate_write_path(path),
                    Err(WritePolicyError::Protected { .. })
                ),
                "{path} should be protected"
            );
        }
    }

    #[test]
    fn prefix_match_is_component_wise() {
        // `docs/lld-notes.md` is not under `docs/lld/`.
        assert_eq!(validate_write_path("docs/lld-notes.md"), Ok(()));
        assert_eq!(validate_write_path("ideas-backlog.md"), Ok(()));
    }

    #[test]
    fn empty_paths_are_refused() {
        assert_eq!(validate_write_path("  "), Err(WritePolicyError::Empty));
    }

    #[test]
    fn plan_extracts_and_categorizes_table_paths() {
        let plan = plan();
        assert_eq!(
            plan.implementation_files,
            vec!["src/auth/session.rs", "src/auth/mod.rs"]
        );
        assert_eq!(plan.test_files, vec!["tests/session_test.rs"]);
        assert_eq!(plan.config_files, vec!["config/auth.toml"]);
        assert!(!plan.is_empty());
    }

    #[test]
    fn allows_normalizes_leading_dot_slash() {
        let plan = plan();
        // Declared as `./src/auth/mod.rs`, requested plain.
        assert!(plan.allows("src/auth/mod.rs"));
        assert!(plan.allows("./src/auth/session.rs"));
        assert!(!plan.allows("src/auth/token.rs"));
    }

    #[test]
    fn declared_paths_pass_the_full_check() {
        let plan = plan();
        assert_eq!(validate_file_write("src/auth/session.rs", &plan), Ok(()));
        assert_eq!(validate_file_write("config/auth.toml", &plan), Ok(()));
    }

    #[test]
    fn off_plan_writes_are_rejected_with_a_suggestion() {
        let plan = plan();
        let err = validate_file_write("src/auth/sessions.rs", &plan).unwrap_err();
        match err {
            WritePolicyError::OffPlan { path, suggestion } => {
                assert_eq!(path, "src/auth/sessions.rs");
                assert!(
                    suggestion.contains("src/auth/session.rs"),
                    "suggestion: {suggestion}"
                );
            }
            other => panic!("expected OffPlan, got {other:?}"),
        }
    }

    #[test]
    fn distant_paths_get_no_suggestion() {
        let plan = plan();
        let err = validate_file_write("z/q.c", &plan).unwrap_err();
        match err {
            WritePolicyError::OffPlan { suggestion, .. } => {
                assert!(suggestion.is_empty(), "suggestion: {suggestion}");
            }
            other => panic!("expected OffPlan, got {other:?}"),
        }
    }

    #[test]
    fn scaffolded_tests_are_not_writable() {
        let plan = plan().with_scaffolded(["tests/session_test.rs"]);
        assert!(matches!(
            validate_file_write("tests/session_test.rs", &plan),
            Err(WritePolicyError::ScaffoldedTest { .. })
        ));
        // Other declared paths stay writable.
        assert_eq!(validate_file_write("src/auth/session.rs", &plan), Ok(()));
    }

    #[test]
    fn empty_plan_rejects_every_write() {
        let plan = LldWritePlan::from_lld("# No table here");
        assert!(plan.is_empty());
        assert!(matches!(
            validate_file_write("src/anything.rs", &plan),
            Err(WritePolicyError::OffPlan { .. })
        ));
    }

    #[test]
    fn static_layer_still_wins_over_the_allowlist() {
        // Even a declared path is refused if it lands in governance space.
        let lld = "\
## 2. Files Changed

| File | Change Type | Description |
|------|-------------|-------------|
| `docs/lld/active/LLD-001.md` | Modify | Sneaky |
";
        let plan = LldWritePlan::from_lld(lld);
        assert!(matches!(
            validate_file_write("docs/lld/active/LLD-001.md", &plan),
            Err(WritePolicyError::Protected { .. })
        ));
    }

    #[test]
    fn prompt_section_lists_paths_and_flags_scaffolded_tests() {
        let plan = plan().with_scaffolded(["tests/session_test.rs"]);
        let section = plan.prompt_section();
        assert!(section.contains("`src/auth/session.rs`"));
        assert!(section.contains("`tests/session_test.rs` — DO NOT MODIFY"));
        assert!(section.contains("rejected"));
        assert!(LldWritePlan::default().prompt_section().is_empty());
    }

    #[test]
    fn similarity_is_symmetric_enough_for_suggestions() {
        assert!(similarity("src/auth/session.rs", "src/auth/sessions.rs") > 0.9);
        assert!(similarity("z/q.c", "src/auth/session.rs") < 0.4);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("a", ""), 0.0);
    }
}
