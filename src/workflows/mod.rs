//! Concrete governance workflows.
//!
//! Four graphs over the same node library:
//!
//! - [`issue`] — brief → draft → review → file with the tracker.
//! - [`lld`] — tracker issue → codebase analysis → LLD draft → mechanical
//!   validation → test-plan validation → review → approved LLD on disk.
//! - [`spec`] — approved LLD → codebase analysis → implementation spec →
//!   review → approved spec on disk.
//! - [`testing`] — approved LLD → test-plan review → scaffold → red →
//!   implement → completeness gate → green → e2e → finalize.
//!
//! Thread-id conventions for checkpointing: `issue-<n>`, `lld-<n>`,
//! `spec-<n>`, `testing-<n>`.

pub mod context;
pub mod issue;
pub mod lld;
pub mod nodes;
pub mod spec;
pub mod testing;

pub use context::WorkflowContext;
pub use issue::build_issue_workflow;
pub use lld::build_lld_workflow;
pub use spec::build_spec_workflow;
pub use testing::build_testing_workflow;

use serde_json::json;

use crate::state::{keys, VersionedState};

/// Seeds the initial state every workflow starts from.
#[must_use]
pub fn initial_state(issue_number: u64, auto_mode: bool, mock_mode: bool) -> VersionedState {
    VersionedState::builder()
        .with_extra(keys::ISSUE_NUMBER, json!(issue_number))
        .with_extra(keys::AUTO_MODE, json!(auto_mode))
        .with_extra(keys::MOCK_MODE, json!(mock_mode))
        .with_extra(keys::ITERATION_COUNT, json!(0))
        .with_extra(keys::DRAFT_COUNT, json!(0))
        .with_extra(keys::VERDICT_COUNT, json!(0))
        .with_extra(keys::ERROR_MESSAGE, json!(""))
        .build()
}
