//! Gate decision log.
//!
//! Every gate crossing — human gates and mechanical gates alike — is
//! recorded as one JSONL line in the workflow's audit directory, so the
//! archived trail answers "who let this through, and on what grounds"
//! without replaying checkpoints.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// File name inside the workflow's audit directory.
pub const GATE_LOG_FILE: &str = "gate-log.jsonl";

/// One gate decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateDecision {
    /// ISO-8601.
    pub timestamp: String,
    /// Gate name, e.g. `human_gate_draft` or `completeness_gate`.
    pub gate: String,
    /// The decision: `send`, `revise`, `exit`, `auto-forward`, `PASS`,
    /// `WARN`, `BLOCK`.
    pub decision: String,
    /// Iteration count at decision time.
    pub iteration: u64,
    /// Free-form detail (feedback summary, issue counts).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl GateDecision {
    #[must_use]
    pub fn new(gate: &str, decision: &str, iteration: u64, detail: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            gate: gate.to_string(),
            decision: decision.to_string(),
            iteration,
            detail: detail.to_string(),
        }
    }
}

/// Appends a decision to the gate log in `audit_dir`. Best-effort by
/// design: a failed append must never fail the gate itself.
pub fn log_gate_decision(audit_dir: &Path, decision: &GateDecision) {
    let path = audit_dir.join(GATE_LOG_FILE);
    let json = match serde_json::to_string(decision) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "gate decision failed to serialize");
            return;
        }
    };
    let result = std::fs::create_dir_all(audit_dir).and_then(|()| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{json}"))
    });
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to append gate decision");
    }
}

/// Reads all decisions back, skipping malformed lines.
#[must_use]
pub fn read_gate_log(audit_dir: &Path) -> Vec<GateDecision> {
    let path = audit_dir.join(GATE_LOG_FILE);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
