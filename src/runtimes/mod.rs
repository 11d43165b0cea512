//! Runtime execution: sessions, stepping, checkpointing, resume.
//!
//! The split mirrors the graph/runtime distinction: an
//! [`App`](crate::app::App) is topology, a [`WorkflowRunner`] is the live
//! execution environment for one or more sessions keyed by thread id.
//! Checkpointers persist session state between steps so an interrupted
//! workflow resumes exactly where it stopped.

mod checkpointer;
mod checkpointer_sqlite;
mod persistence;
mod runner;
mod runtime_config;

pub use checkpointer::{
    restore_session_state, Checkpoint, Checkpointer, CheckpointerError, CheckpointerType,
    InMemoryCheckpointer,
};
pub use checkpointer_sqlite::SqliteCheckpointer;
pub use persistence::{PersistedCheckpoint, PersistedState};
pub use runner::{
    RunnerError, SessionInit, SessionState, StepReport, WorkflowRunner,
};
pub use runtime_config::RuntimeConfig;
