//! Checkpointer trait and in-memory backend.
//!
//! A checkpoint is the durable snapshot of a session at a step boundary:
//! the versioned state, the frontier that will run next, and bookkeeping.
//! Saving is idempotent per (thread, step); loading returns the latest
//! step for a thread so a resumed run continues exactly where the
//! interrupted one stopped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::RwLock;

use crate::{state::VersionedState, types::NodeKind};

use super::runner::SessionState;

/// A durable snapshot of session execution state at a step boundary.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step: u64,
    pub state: VersionedState,
    pub frontier: Vec<NodeKind>,
    pub created_at: DateTime<Utc>,
    /// Nodes that executed in this step (empty for step 0).
    pub ran_nodes: Vec<NodeKind>,
    /// Channels updated in this step (empty for step 0).
    pub updated_channels: Vec<String>,
}

impl Checkpoint {
    /// Snapshot the current session state.
    #[must_use]
    pub fn from_session(thread_id: &str, session: &SessionState) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            step: session.step,
            state: session.state.clone(),
            frontier: session.frontier.clone(),
            created_at: Utc::now(),
            ran_nodes: vec![],
            updated_channels: vec![],
        }
    }

    /// Snapshot the session state together with step execution metadata.
    #[must_use]
    pub fn from_step(
        thread_id: &str,
        session: &SessionState,
        ran_nodes: Vec<NodeKind>,
        updated_channels: Vec<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            step: session.step,
            state: session.state.clone(),
            frontier: session.frontier.clone(),
            created_at: Utc::now(),
            ran_nodes,
            updated_channels,
        }
    }
}

/// Errors from checkpointer operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CheckpointerError {
    #[error("thread not found: {thread_id}")]
    #[diagnostic(code(steward::checkpointer::not_found))]
    NotFound { thread_id: String },

    #[error("backend error: {message}")]
    #[diagnostic(
        code(steward::checkpointer::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    #[error("checkpointer error: {message}")]
    #[diagnostic(code(steward::checkpointer::other))]
    Other { message: String },
}

/// Selects the backing implementation of the [`Checkpointer`] trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointerType {
    /// Process-local, non-durable. For tests and throwaway runs.
    InMemory,
    /// SQLite-backed durable storage keyed by thread id.
    Sqlite,
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Persistent storage for workflow execution state.
///
/// Implementations must be `Send + Sync`; `save` replaces the entry for
/// (thread, step) and `load_latest` is consistent with the most recent
/// `save` for the thread.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Load the most recent checkpoint for a thread, or `None` if the
    /// thread has never been checkpointed.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// All thread ids known to this checkpointer.
    async fn list_threads(&self) -> Result<Vec<String>>;
}

/// In-memory checkpointer storing only the latest checkpoint per thread.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: RwLock<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        map.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let map = self.inner.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.get(thread_id).cloned())
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let map = self.inner.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.keys().cloned().collect())
    }
}

/// Rebuild an in-memory session from a persisted checkpoint.
#[must_use = "restored session state should be used to continue execution"]
pub fn restore_session_state(cp: &Checkpoint) -> SessionState {
    SessionState {
        state: cp.state.clone(),
        step: cp.step,
        frontier: cp.frontier.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = InMemoryCheckpointer::new();
        let session = SessionState {
            state: VersionedState::new_with_user_message("hi"),
            step: 3,
            frontier: vec![NodeKind::Custom("review".into())],
        };
        store
            .save(Checkpoint::from_session("lld-7", &session))
            .await
            .unwrap();

        let loaded = store.load_latest("lld-7").await.unwrap().unwrap();
        assert_eq!(loaded.step, 3);
        assert_eq!(loaded.frontier, vec![NodeKind::Custom("review".into())]);

        let restored = restore_session_state(&loaded);
        assert_eq!(restored.step, 3);
        assert_eq!(restored.state.snapshot().messages.len(), 1);
    }

    #[tokio::test]
    async fn missing_thread_loads_none() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load_latest("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_threads_reports_all() {
        let store = InMemoryCheckpointer::new();
        let session = SessionState {
            state: VersionedState::default(),
            step: 0,
            frontier: vec![NodeKind::Start],
        };
        store
            .save(Checkpoint::from_session("a", &session))
            .await
            .unwrap();
        store
            .save(Checkpoint::from_session("b", &session))
            .await
            .unwrap();
        let mut threads = store.list_threads().await.unwrap();
        threads.sort();
        assert_eq!(threads, vec!["a", "b"]);
    }
}
