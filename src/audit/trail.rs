//! Per-workflow audit trail: slugs, numbered artifacts, archival.
//!
//! Every workflow run owns a directory under the audit root's `active/`
//! subdirectory, named by a slug derived from a stable repository id plus
//! a sequence scoped to that repository. Files inside it carry a
//! three-digit `NNN-` prefix reflecting write order, which is what makes
//! the trail replayable. On completion the directory moves to
//! `done/<issue>-<slug>/`. Nothing is ever overwritten: a name collision
//! gets a timestamp suffix instead.

use std::path::{Path, PathBuf};

use chrono::Utc;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata emitted alongside an approved artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovedMetadata {
    pub issue_number: u64,
    pub issue_title: String,
    /// ISO-8601.
    pub approved_at: String,
    pub final_path: String,
    pub total_iterations: u64,
    pub draft_count: u64,
    pub verdict_count: u64,
}

/// Metadata emitted when an issue is filed with the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FiledMetadata {
    pub issue_number: u64,
    pub issue_url: String,
    pub title: String,
    /// ISO-8601.
    pub filed_at: String,
    pub brief_file: String,
    pub total_iterations: u64,
    pub draft_count: u64,
    pub verdict_count: u64,
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuditTrailError {
    #[error("audit directory already exists: {path}")]
    #[diagnostic(
        code(steward::trail::exists),
        help("Each workflow run gets a fresh slug; a collision means the slug counter is stale.")
    )]
    DirExists { path: String },

    #[error("repository id '{raw}' is empty after sanitization")]
    #[diagnostic(code(steward::trail::bad_repo_id))]
    BadRepoId { raw: String },

    #[error("io error on {path}: {source}")]
    #[diagnostic(code(steward::trail::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> AuditTrailError {
    AuditTrailError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Derives the stable 7-character repository id: alphanumeric only,
/// truncated, first character uppercased.
///
/// An explicit id in `<repo>/.steward/config.json` (`repo_id` field) wins;
/// otherwise the repository directory name is sanitized.
pub fn repo_short_id(repo_root: &Path) -> Result<String, AuditTrailError> {
    let config_path = repo_root.join(".steward").join("config.json");
    if config_path.exists() {
        if let Ok(text) = std::fs::read_to_string(&config_path) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if let Some(raw) = value.get("repo_id").and_then(|v| v.as_str()) {
                    return sanitize_repo_id(raw);
                }
            }
        }
    }
    let name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    sanitize_repo_id(&name)
}

fn sanitize_repo_id(raw: &str) -> Result<String, AuditTrailError> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() {
        return Err(AuditTrailError::BadRepoId {
            raw: raw.to_string(),
        });
    }
    let truncated: String = cleaned.chars().take(7).collect();
    let mut chars = truncated.chars();
    let first = chars.next().unwrap().to_ascii_uppercase();
    Ok(std::iter::once(first).chain(chars).collect())
}

/// Generates the next workflow slug `{RepoId}-{NNNN}`, scanning both
/// `active/` and `done/` under the audit root so numbers never collide
/// with archived runs.
pub fn generate_slug(repo_root: &Path, audit_root: &Path) -> Result<String, AuditTrailError> {
    let repo_id = repo_short_id(repo_root)?;
    let mut max_num: u32 = 0;
    for sub in ["active", "done"] {
        let dir = audit_root.join(sub);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Accept both `{RepoId}-{NNNN}` and archived `{issue}-{RepoId}-{NNNN}`.
            if let Some(idx) = name.find(&repo_id) {
                let tail = &name[idx + repo_id.len()..];
                if let Some(num) = tail.strip_prefix('-') {
                    if num.len() == 4 && num.chars().all(|c| c.is_ascii_digit()) {
                        max_num = max_num.max(num.parse().unwrap_or(0));
                    }
                }
            }
        }
    }
    Ok(format!("{repo_id}-{:04}", max_num + 1))
}

/// Creates `audit_root/active/<slug>/`. Fails if it already exists.
pub fn create_audit_dir(audit_root: &Path, slug: &str) -> Result<PathBuf, AuditTrailError> {
    let dir = audit_root.join("active").join(slug);
    if dir.exists() {
        return Err(AuditTrailError::DirExists {
            path: dir.display().to_string(),
        });
    }
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    Ok(dir)
}

/// Next sequential artifact number: 1 + the max existing `NNN-` prefix.
#[must_use]
pub fn next_file_number(audit_dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(audit_dir) else {
        return 1;
    };
    let mut max_num = 0u32;
    for entry in entries.flatten() {
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.len() >= 4 && name.as_bytes()[3] == b'-' {
            if let Ok(num) = name[..3].parse::<u32>() {
                max_num = max_num.max(num);
            }
        }
    }
    max_num + 1
}

/// Writes `NNN-<suffix>` into the audit directory.
///
/// If the destination already exists the new file gains a timestamp
/// suffix — originals are never overwritten.
pub fn save_audit_file(
    audit_dir: &Path,
    number: u32,
    suffix: &str,
    content: &str,
) -> Result<PathBuf, AuditTrailError> {
    std::fs::create_dir_all(audit_dir).map_err(|e| io_err(audit_dir, e))?;
    let mut path = audit_dir.join(format!("{number:03}-{suffix}"));
    if path.exists() {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        path = audit_dir.join(format!("{number:03}-{stamp}-{suffix}"));
    }
    std::fs::write(&path, content).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Moves `active/<slug>` to `done/<issue>-<slug>/`. A pre-existing
/// destination gets a timestamp suffix rather than being touched.
pub fn archive_audit_dir(
    audit_root: &Path,
    slug: &str,
    issue_number: u64,
) -> Result<PathBuf, AuditTrailError> {
    let active = audit_root.join("active").join(slug);
    let done_root = audit_root.join("done");
    std::fs::create_dir_all(&done_root).map_err(|e| io_err(&done_root, e))?;

    // Legacy trails already carry the issue prefix in their directory name.
    let dest_name = if slug.starts_with(&format!("{issue_number}-")) {
        slug.to_string()
    } else {
        format!("{issue_number}-{slug}")
    };
    let mut dest = done_root.join(dest_name.clone());
    if dest.exists() {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        dest = done_root.join(format!("{dest_name}-{stamp}"));
    }
    std::fs::rename(&active, &dest).map_err(|e| io_err(&active, e))?;
    Ok(dest)
}
