//! Requirement-to-test coverage checking.
//!
//! Requirements come out of the LLD's Section 3 (numbered list items and
//! explicit `REQ-N` / `REQ-N.M` identifiers); covered identifiers come out
//! of Section 10's test scenarios. Coverage passes iff every requirement
//! id appears in the covered set and the requirement set is non-empty.

use std::collections::BTreeSet;
use std::time::Instant;

use super::{CheckKind, Severity, ValidationResult, ValidationViolation};

/// A requirement extracted from Section 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized id, e.g. `REQ-1` or `REQ-2.3`.
    pub id: String,
    /// The requirement line, trimmed.
    pub text: String,
}

/// Extracts the body of a numbered markdown section.
///
/// A section starts at a header whose text begins with `<number>.` or
/// `<number>:`, or just `## <number>` followed by a title, and runs until
/// the next header of the same or shallower depth.
pub(crate) fn section_body<'a>(document: &'a str, number: u32) -> Option<&'a str> {
    let mut start = None;
    let mut start_level = 0usize;
    let mut offset = 0usize;
    for line in document.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let level = 1 + rest.chars().take_while(|c| *c == '#').count();
            let title = trimmed.trim_start_matches('#').trim();
            if let Some(s) = start {
                if level <= start_level {
                    return Some(&document[s..offset]);
                }
            } else if title_matches_number(title, number) {
                start = Some(offset + line.len());
                start_level = level;
            }
        }
        offset += line.len();
    }
    start.map(|s| &document[s..])
}

fn title_matches_number(title: &str, number: u32) -> bool {
    let prefix = number.to_string();
    let Some(rest) = title.strip_prefix(&prefix) else {
        return false;
    };
    matches!(rest.chars().next(), Some('.') | Some(':') | Some(' ') | None)
}

/// Finds explicit `REQ-N` / `REQ-N.M` identifiers in a chunk of text,
/// normalized to upper case.
fn explicit_req_ids(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let upper = text.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut i = 0;
    while let Some(pos) = upper[i..].find("REQ-") {
        let start = i + pos;
        let mut end = start + 4;
        let mut saw_digit = false;
        let mut saw_dot = false;
        while end < bytes.len() {
            let c = bytes[end] as char;
            if c.is_ascii_digit() {
                saw_digit = true;
                end += 1;
            } else if c == '.' && saw_digit && !saw_dot {
                // Only a dot followed by another digit extends the id.
                if end + 1 < bytes.len() && (bytes[end + 1] as char).is_ascii_digit() {
                    saw_dot = true;
                    end += 1;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        if saw_digit {
            ids.push(upper[start..end].to_string());
        }
        i = end.max(start + 4);
    }
    ids
}

/// Extracts the requirement set from the LLD's Section 3.
///
/// Numbered list items yield ordinal ids (`REQ-1`, `REQ-2`, …) unless the
/// item carries an explicit identifier, which then wins.
#[must_use]
pub fn extract_requirements(lld: &str) -> Vec<Requirement> {
    let Some(body) = section_body(lld, 3) else {
        return Vec::new();
    };

    let mut requirements = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut ordinal = 0u32;

    for line in body.lines() {
        let trimmed = line.trim();
        let is_numbered = trimmed
            .split_once('.')
            .map(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        let is_bullet = trimmed.starts_with("- ") || trimmed.starts_with("* ");
        if !is_numbered && !is_bullet {
            continue;
        }
        ordinal += 1;

        let explicit = explicit_req_ids(trimmed);
        let id = explicit
            .first()
            .cloned()
            .unwrap_or_else(|| format!("REQ-{ordinal}"));
        if seen.insert(id.clone()) {
            requirements.push(Requirement {
                id,
                text: trimmed.to_string(),
            });
        }
    }
    requirements
}

/// Extracts the covered requirement ids referenced by Section 10's test
/// scenarios, case-normalized.
#[must_use]
pub fn extract_covered_ids(lld: &str) -> BTreeSet<String> {
    let Some(body) = section_body(lld, 10) else {
        return BTreeSet::new();
    };
    explicit_req_ids(body).into_iter().collect()
}

/// Runs the coverage check.
///
/// `passed ⇔ covered ⊇ required ∧ required ≠ ∅`; the missing list drives
/// drafter feedback.
#[must_use]
pub fn check_requirement_coverage(lld: &str) -> ValidationResult {
    let started = Instant::now();
    let requirements = extract_requirements(lld);
    let covered = extract_covered_ids(lld);

    let required_ids: BTreeSet<String> = requirements.iter().map(|r| r.id.clone()).collect();
    let missing: Vec<String> = required_ids.difference(&covered).cloned().collect();
    let mapped_count = required_ids.len() - missing.len();

    let coverage_percentage = if required_ids.is_empty() {
        0.0
    } else {
        round2(mapped_count as f64 / required_ids.len() as f64 * 100.0)
    };

    let mut violations = Vec::new();
    if required_ids.is_empty() {
        violations.push(ValidationViolation {
            severity: Severity::Error,
            check: CheckKind::RequirementCoverage,
            message: "Section 3 contains no extractable requirements".to_string(),
            requirement_id: None,
            test_id: None,
        });
    }
    for id in &missing {
        violations.push(ValidationViolation {
            severity: Severity::Error,
            check: CheckKind::RequirementCoverage,
            message: format!("{id} has no covering test scenario in Section 10"),
            requirement_id: Some(id.clone()),
            test_id: None,
        });
    }

    let passed = !required_ids.is_empty() && missing.is_empty();
    ValidationResult {
        passed,
        violations,
        coverage_percentage,
        requirements_count: required_ids.len(),
        mapped_count,
        tests_count: covered.len(),
        execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        missing,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLD: &str = "\
# LLD-042: Example

## 1. Context

Some context.

## 3. Requirements

1. REQ-1: User login
2. REQ-2: Input validation
3. REQ-3: Session expiry

## 10. Test Plan

### test_login
Covers REQ-1.

### test_validation
Covers req-2.
";

    #[test]
    fn extracts_explicit_ids_from_section_three() {
        let reqs = extract_requirements(LLD);
        let ids: Vec<&str> = reqs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["REQ-1", "REQ-2", "REQ-3"]);
    }

    #[test]
    fn covered_ids_are_case_normalized() {
        let covered = extract_covered_ids(LLD);
        assert!(covered.contains("REQ-1"));
        assert!(covered.contains("REQ-2"));
        assert!(!covered.contains("REQ-3"));
    }

    #[test]
    fn missing_requirement_fails_with_two_thirds_coverage() {
        let result = check_requirement_coverage(LLD);
        assert!(!result.passed);
        assert_eq!(result.missing, vec!["REQ-3".to_string()]);
        assert!((result.coverage_percentage - 66.67).abs() < 1e-9);
        assert!(result.feedback().contains("REQ-3"));
    }

    #[test]
    fn full_coverage_passes() {
        let lld = LLD.replace("Covers req-2.", "Covers req-2 and REQ-3.");
        let result = check_requirement_coverage(&lld);
        assert!(result.passed);
        assert_eq!(result.coverage_percentage, 100.0);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn empty_requirement_set_never_passes() {
        let result = check_requirement_coverage("# Doc\n\n## 10. Test Plan\n\nCovers REQ-1.\n");
        assert!(!result.passed);
        assert_eq!(result.requirements_count, 0);
        assert_eq!(result.coverage_percentage, 0.0);
    }

    #[test]
    fn ordinal_ids_are_assigned_without_explicit_markers() {
        let lld = "\
## 3. Requirements

1. Login works
2. Sessions expire

## 10. Test Plan

REQ-1 REQ-2 covered.
";
        let reqs = extract_requirements(lld);
        assert_eq!(reqs[0].id, "REQ-1");
        assert_eq!(reqs[1].id, "REQ-2");
        assert!(check_requirement_coverage(lld).passed);
    }

    #[test]
    fn subrequirement_ids_parse() {
        let lld = "\
## 3. Requirements

- REQ-1.1: first
- REQ-1.2: second

## 10. Test Plan

Scenario covers REQ-1.1 and REQ-1.2.
";
        let result = check_requirement_coverage(lld);
        assert!(result.passed, "missing: {:?}", result.missing);
    }
}
