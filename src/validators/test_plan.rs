//! Test-plan validation.
//!
//! The requirement-coverage check plus the hygiene heuristics: every test
//! scenario must reference a requirement, assertions must not be vague,
//! and no scenario may delegate its pass/fail decision to a human.
//! Attempts are bounded: past [`MAX_VALIDATION_ATTEMPTS`] the workflow
//! escalates to a terminal error instead of looping the drafter forever.

use std::time::Instant;

use super::coverage::{check_requirement_coverage, section_body};
use super::{CheckKind, Severity, ValidationResult, ValidationViolation};

/// Validation attempts allowed before the workflow escalates.
pub const MAX_VALIDATION_ATTEMPTS: u64 = 3;

/// Assertions that assert nothing.
const VAGUE_PATTERNS: &[&str] = &[
    "works correctly",
    "works as expected",
    "works as intended",
    "behaves as expected",
    "behaves correctly",
    "functions properly",
    "operates correctly",
    "should work",
    "everything works",
];

/// Phrases that delegate the verdict to a person.
const HUMAN_DELEGATION_PATTERNS: &[&str] = &[
    "manually verify",
    "manually check",
    "manual verification",
    "manual check",
    "human review",
    "visually inspect",
    "visual inspection",
    "by hand",
    "ask the user",
];

/// A test scenario extracted from Section 10.
#[derive(Debug, Clone)]
pub struct TestScenario {
    /// Scenario heading, e.g. `test_session_expiry`.
    pub name: String,
    /// Scenario body text.
    pub body: String,
}

/// Splits Section 10 into scenarios at `###` headings whose title looks
/// like a test name.
#[must_use]
pub fn extract_test_scenarios(lld: &str) -> Vec<TestScenario> {
    let Some(body) = section_body(lld, 10) else {
        return Vec::new();
    };

    let mut scenarios: Vec<TestScenario> = Vec::new();
    let mut current: Option<TestScenario> = None;
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix("###") {
            if let Some(done) = current.take() {
                scenarios.push(done);
            }
            let name = title.trim().trim_matches('`').to_string();
            current = Some(TestScenario {
                name,
                body: String::new(),
            });
        } else if let Some(scenario) = current.as_mut() {
            scenario.body.push_str(line);
            scenario.body.push('\n');
        }
    }
    if let Some(done) = current.take() {
        scenarios.push(done);
    }
    scenarios
}

fn contains_req_reference(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    upper
        .find("REQ-")
        .map(|idx| {
            upper[idx + 4..]
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Runs the full test-plan validation over an LLD.
#[must_use]
pub fn validate_test_plan(lld: &str) -> ValidationResult {
    let started = Instant::now();
    let mut result = check_requirement_coverage(lld);
    let scenarios = extract_test_scenarios(lld);
    result.tests_count = scenarios.len();

    for scenario in &scenarios {
        let haystack = format!("{}\n{}", scenario.name, scenario.body).to_ascii_lowercase();

        if !contains_req_reference(&scenario.body) && !contains_req_reference(&scenario.name) {
            result.violations.push(ValidationViolation {
                severity: Severity::Error,
                check: CheckKind::MissingRequirementRef,
                message: format!("scenario '{}' does not reference a requirement", scenario.name),
                requirement_id: None,
                test_id: Some(scenario.name.clone()),
            });
        }

        for pattern in VAGUE_PATTERNS {
            if haystack.contains(pattern) {
                result.violations.push(ValidationViolation {
                    severity: Severity::Error,
                    check: CheckKind::VagueAssertion,
                    message: format!(
                        "scenario '{}' uses the vague assertion \"{pattern}\"",
                        scenario.name
                    ),
                    requirement_id: None,
                    test_id: Some(scenario.name.clone()),
                });
            }
        }

        for pattern in HUMAN_DELEGATION_PATTERNS {
            if haystack.contains(pattern) {
                result.violations.push(ValidationViolation {
                    severity: Severity::Error,
                    check: CheckKind::HumanDelegation,
                    message: format!(
                        "scenario '{}' delegates pass/fail to a human (\"{pattern}\")",
                        scenario.name
                    ),
                    requirement_id: None,
                    test_id: Some(scenario.name.clone()),
                });
            }
        }
    }

    result.passed = !result
        .violations
        .iter()
        .any(|v| v.severity == Severity::Error);
    result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "\
## 3. Requirements

1. REQ-1: Sessions expire.

## 10. Test Plan

### test_session_expiry
Covers REQ-1. Asserts the session store returns None after the idle
timeout elapses.
";

    #[test]
    fn clean_plan_passes() {
        let result = validate_test_plan(CLEAN);
        assert!(result.passed, "violations: {:?}", result.violations);
        assert_eq!(result.tests_count, 1);
    }

    #[test]
    fn scenario_without_requirement_ref_fails() {
        let lld = "\
## 3. Requirements

1. REQ-1: Sessions expire.

## 10. Test Plan

Scenario coverage note mentions REQ-1 here.

### test_mystery
Asserts something about sessions without naming any requirement.
";
        let result = validate_test_plan(lld);
        assert!(!result.passed);
        assert!(result
            .violations
            .iter()
            .any(|v| v.check == CheckKind::MissingRequirementRef));
    }

    #[test]
    fn vague_assertions_fail() {
        let lld = CLEAN.replace(
            "Asserts the session store returns None after the idle\ntimeout elapses.",
            "Checks that the session store works correctly.",
        );
        let result = validate_test_plan(&lld);
        assert!(!result.passed);
        assert!(result
            .violations
            .iter()
            .any(|v| v.check == CheckKind::VagueAssertion));
    }

    #[test]
    fn human_delegation_fails() {
        let lld = CLEAN.replace(
            "Asserts the session store returns None",
            "Manually verify the session store returns None",
        );
        let result = validate_test_plan(&lld);
        assert!(!result.passed);
        assert!(result
            .violations
            .iter()
            .any(|v| v.check == CheckKind::HumanDelegation));
    }

    #[test]
    fn scenarios_split_on_headings() {
        let scenarios = extract_test_scenarios(CLEAN);
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].name, "test_session_expiry");
        assert!(scenarios[0].body.contains("REQ-1"));
    }
}
