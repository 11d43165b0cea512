//! Mechanical validators: deterministic quality gates between LLM stages.
//!
//! Everything here is non-LLM and pure: the same document or source tree
//! always produces the same verdict. Validators gate what the models
//! produced — requirement/test coverage, LLD structure, test-plan
//! hygiene, and AST-level implementation completeness — and their output
//! drives routing (pass → next stage, fail → back to the drafter with
//! structured feedback).

pub mod completeness;
pub mod coverage;
pub mod structure;
pub mod test_plan;
pub mod write_policy;

pub use completeness::{
    analyze_files, summarize_source, CompletenessIssue, CompletenessResult, CompletenessVerdict,
    IssueCategory,
};
pub use coverage::{check_requirement_coverage, extract_covered_ids, extract_requirements};
pub use structure::validate_structure;
pub use test_plan::{validate_test_plan, MAX_VALIDATION_ATTEMPTS};
pub use write_policy::{
    validate_file_write, validate_write_path, LldWritePlan, WritePolicyError,
};

use serde::{Deserialize, Serialize};

/// Violation severity. Errors are mandatory fixes; warnings are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Which check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    RequirementCoverage,
    SectionStructure,
    FileTable,
    PathPolicy,
    MissingRequirementRef,
    VagueAssertion,
    HumanDelegation,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RequirementCoverage => "requirement_coverage",
            Self::SectionStructure => "section_structure",
            Self::FileTable => "file_table",
            Self::PathPolicy => "path_policy",
            Self::MissingRequirementRef => "missing_requirement_ref",
            Self::VagueAssertion => "vague_assertion",
            Self::HumanDelegation => "human_delegation",
        };
        f.write_str(s)
    }
}

/// A single validator finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub severity: Severity,
    pub check: CheckKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

/// Aggregate result of a validator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub violations: Vec<ValidationViolation>,
    /// covered / total × 100, rounded to two decimals.
    pub coverage_percentage: f64,
    pub requirements_count: usize,
    pub mapped_count: usize,
    pub tests_count: usize,
    pub execution_time_ms: f64,
    /// Requirement ids with no covering test, sorted.
    #[serde(default)]
    pub missing: Vec<String>,
}

impl ValidationResult {
    /// Errors only (the mandatory fixes).
    #[must_use]
    pub fn errors(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
    }

    /// Markdown feedback block for the drafter, naming every violation and
    /// every missing requirement id.
    #[must_use]
    pub fn feedback(&self) -> String {
        let mut lines = vec![
            "## Mechanical Validation Failed".to_string(),
            String::new(),
            format!(
                "**Coverage:** {:.2}% ({}/{} requirements mapped)",
                self.coverage_percentage, self.mapped_count, self.requirements_count
            ),
            String::new(),
        ];
        if !self.missing.is_empty() {
            lines.push(format!("**Missing coverage:** {}", self.missing.join(", ")));
            lines.push(String::new());
        }
        let errors: Vec<_> = self
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .collect();
        let warnings: Vec<_> = self
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
            .collect();
        if !errors.is_empty() {
            lines.push("### Errors (must fix)".to_string());
            lines.push(String::new());
            for v in errors {
                lines.push(format!("- **{}**: {}", v.check, v.message));
            }
            lines.push(String::new());
        }
        if !warnings.is_empty() {
            lines.push("### Warnings (consider fixing)".to_string());
            lines.push(String::new());
            for v in warnings {
                lines.push(format!("- **{}**: {}", v.check, v.message));
            }
            lines.push(String::new());
        }
        lines.push("Please revise the document to address the errors above.".to_string());
        lines.join("\n")
    }
}
