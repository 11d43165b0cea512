//! Rotation state persistence.
//!
//! The rotator tracks which credentials are quota-exhausted and until when.
//! That map survives across runs in a small JSON file so a workflow started
//! an hour after quota exhaustion does not burn retries rediscovering it.
//!
//! Single-process use is the supported case; the file is read-modify-write
//! without an advisory lock (see the shared-resource policy in the design
//! notes).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted rotation state: exhausted credentials with reset times, plus
/// the last credential that succeeded.
///
/// Invariant maintained by [`RotationStore::load`]: a credential appears in
/// `exhausted` iff its reset time lies in the future.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationState {
    #[serde(default)]
    pub exhausted: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<DateTime<Utc>>,
}

impl RotationState {
    /// Whether `name` is currently exhausted.
    #[must_use]
    pub fn is_exhausted(&self, name: &str) -> bool {
        self.exhausted
            .get(name)
            .map(|reset| *reset > Utc::now())
            .unwrap_or(false)
    }

    /// Marks `name` exhausted for `reset_hours` from now.
    pub fn mark_exhausted(&mut self, name: &str, reset_hours: f64) {
        let seconds = (reset_hours * 3600.0).round() as i64;
        self.exhausted
            .insert(name.to_string(), Utc::now() + Duration::seconds(seconds));
    }

    /// Records a successful call on `name` and clears any stale exhaustion
    /// entry for it.
    pub fn record_success(&mut self, name: &str) {
        self.exhausted.remove(name);
        self.last_success = Some(name.to_string());
        self.last_success_time = Some(Utc::now());
    }

    /// Drops entries whose reset time has passed. Returns true when
    /// anything was removed.
    pub fn expire(&mut self) -> bool {
        let now = Utc::now();
        let before = self.exhausted.len();
        self.exhausted.retain(|_, reset| *reset > now);
        self.exhausted.len() != before
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum RotationStoreError {
    #[error("failed to read rotation state {path}: {source}")]
    #[diagnostic(code(steward::rotation::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write rotation state {path}: {source}")]
    #[diagnostic(code(steward::rotation::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// File-backed store for [`RotationState`].
#[derive(Debug, Clone)]
pub struct RotationStore {
    path: PathBuf,
}

impl RotationStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state, expiring stale entries. If expiry removed anything
    /// the cleaned state is persisted immediately so disk reflects reality.
    ///
    /// A missing file is an empty state; a corrupt file is treated the same
    /// way (and overwritten on the next save) rather than failing the run.
    pub fn load(&self) -> Result<RotationState, RotationStoreError> {
        let mut state = if self.path.exists() {
            let text =
                std::fs::read_to_string(&self.path).map_err(|source| RotationStoreError::Read {
                    path: self.path.display().to_string(),
                    source,
                })?;
            serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e,
                    "rotation state unreadable; starting fresh");
                RotationState::default()
            })
        } else {
            RotationState::default()
        };

        if state.expire() {
            self.save(&state)?;
        }
        Ok(state)
    }

    /// Persists the state, creating parent directories as needed.
    pub fn save(&self, state: &RotationState) -> Result<(), RotationStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RotationStoreError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(state).expect("rotation state serializes");
        std::fs::write(&self.path, json).map_err(|source| RotationStoreError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_check_exhaustion() {
        let mut state = RotationState::default();
        state.mark_exhausted("primary", 24.0);
        assert!(state.is_exhausted("primary"));
        assert!(!state.is_exhausted("spare"));
    }

    #[test]
    fn success_clears_exhaustion() {
        let mut state = RotationState::default();
        state.mark_exhausted("primary", 24.0);
        state.record_success("primary");
        assert!(!state.is_exhausted("primary"));
        assert_eq!(state.last_success.as_deref(), Some("primary"));
        assert!(state.last_success_time.is_some());
    }

    #[test]
    fn expire_removes_past_entries() {
        let mut state = RotationState::default();
        state
            .exhausted
            .insert("stale".into(), Utc::now() - Duration::hours(1));
        state.mark_exhausted("fresh", 24.0);
        assert!(state.expire());
        assert!(!state.exhausted.contains_key("stale"));
        assert!(state.exhausted.contains_key("fresh"));
    }

    #[test]
    fn load_expires_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path().join("rotation_state.json"));

        let mut state = RotationState::default();
        state
            .exhausted
            .insert("stale".into(), Utc::now() - Duration::minutes(5));
        state.mark_exhausted("live", 2.0);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.exhausted.contains_key("stale"));
        assert!(loaded.exhausted.contains_key("live"));

        // The expiry was written back: a raw reload agrees.
        let reloaded = store.load().unwrap();
        assert_eq!(loaded, reloaded);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path().join("rotation_state.json"));
        let state = store.load().unwrap();
        assert!(state.exhausted.is_empty());
        assert!(state.last_success.is_none());
    }
}
