//! Governance JSONL log.
//!
//! One complete JSON object per line, appended and flushed under a mutex
//! so concurrent workflow threads in the same process serialize cleanly.
//! Entries are immutable once written. Readers skip malformed lines and
//! never erase them — a half-written line from a crashed process must not
//! take the rest of the log with it.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single governance decision record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Unique id (UUID v4).
    pub id: String,
    /// Sequence id, from the workflow's iteration count.
    pub sequence_id: u64,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Node that produced the record (e.g. `review`).
    pub node: String,
    /// Model requested.
    pub model: String,
    /// Model the provider verified it actually ran.
    pub model_verified: String,
    /// Artifact under governance (issue number).
    pub artifact_id: u64,
    /// `APPROVED` or `BLOCKED`.
    pub verdict: String,
    /// Reviewer critique text.
    pub critique: String,
    /// Blocking issues found (empty when approved).
    pub blocking_issues: Vec<String>,
    /// Full provider payload.
    pub raw_response: String,
    /// Call duration including retries, milliseconds.
    pub duration_ms: u64,
    /// Credential that succeeded.
    pub credential_used: String,
    /// Whether rotation happened during the call.
    pub rotation_occurred: bool,
    /// Total provider attempts.
    pub attempts: u32,
}

impl AuditEntry {
    /// Builds an entry stamped with a fresh id and the current time.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        node: &str,
        model: &str,
        model_verified: &str,
        artifact_id: u64,
        verdict: &str,
        critique: &str,
        blocking_issues: Vec<String>,
        raw_response: &str,
        duration_ms: u64,
        credential_used: &str,
        rotation_occurred: bool,
        attempts: u32,
        sequence_id: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence_id,
            timestamp: Utc::now().to_rfc3339(),
            node: node.to_string(),
            model: model.to_string(),
            model_verified: model_verified.to_string(),
            artifact_id,
            verdict: verdict.to_string(),
            critique: critique.to_string(),
            blocking_issues,
            raw_response: raw_response.to_string(),
            duration_ms,
            credential_used: credential_used.to_string(),
            rotation_occurred,
            attempts,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuditLogError {
    #[error("failed to append to audit log {path}: {source}")]
    #[diagnostic(code(steward::audit::append))]
    Append {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read audit log {path}: {source}")]
    #[diagnostic(code(steward::audit::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only JSONL log for governance decisions.
pub struct GovernanceAuditLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl GovernanceAuditLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single line, creating parent directories as
    /// needed. The append is atomic per line from this process's
    /// perspective: writers serialize through the mutex and the line is
    /// flushed before the lock drops.
    pub fn log(&self, entry: &AuditEntry) -> Result<(), AuditLogError> {
        let json = serde_json::to_string(entry).expect("audit entry serializes");
        let _guard = self.append_lock.lock().expect("audit lock poisoned");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditLogError::Append {
                path: self.path.display().to_string(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditLogError::Append {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{json}").map_err(|source| AuditLogError::Append {
            path: self.path.display().to_string(),
            source,
        })?;
        file.flush().map_err(|source| AuditLogError::Append {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// All entries in write order. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AuditLogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path).map_err(|source| AuditLogError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| AuditLogError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    tracing::warn!(path = %self.path.display(), "skipping malformed audit line");
                }
            }
        }
        Ok(entries)
    }

    /// Last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditEntry>, AuditLogError> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    /// Total entry count.
    pub fn count(&self) -> Result<usize, AuditLogError> {
        Ok(self.read_all()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node: &str, seq: u64) -> AuditEntry {
        AuditEntry::new(
            node,
            "rotating-http:pro",
            "pro-verified",
            42,
            "APPROVED",
            "Looks solid.",
            vec![],
            "raw",
            1200,
            "primary",
            false,
            1,
            seq,
        )
    }

    #[test]
    fn append_then_read_back_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = GovernanceAuditLog::new(dir.path().join("lineage").join("audit.jsonl"));

        for i in 0..5 {
            log.log(&entry("review", i)).unwrap();
        }

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 5);
        let seqs: Vec<u64> = entries.iter().map(|e| e.sequence_id).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn malformed_lines_are_skipped_not_erased() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = GovernanceAuditLog::new(&path);

        log.log(&entry("review", 1)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{{not json"))
            .unwrap();
        log.log(&entry("review", 2)).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        // The malformed line is still physically present.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("{not json"));
    }

    #[test]
    fn tail_returns_newest_entries_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = GovernanceAuditLog::new(dir.path().join("audit.jsonl"));
        for i in 0..10 {
            log.log(&entry("review", i)).unwrap();
        }
        let tail = log.tail(3).unwrap();
        let seqs: Vec<u64> = tail.iter().map(|e| e.sequence_id).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = GovernanceAuditLog::new(dir.path().join("never-written.jsonl"));
        assert_eq!(log.count().unwrap(), 0);
    }
}
