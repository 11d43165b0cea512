//! Workflow state: versioned channels plus the governance key vocabulary.
//!
//! The shared state a workflow thread carries is heterogeneous — counters,
//! draft text, verdicts, routing hints — and extended by each node. It lives
//! on the extras channel as a string-keyed map of JSON values; nodes consume
//! an immutable [`StateSnapshot`] and return partial updates that the barrier
//! merges shallowly (last writer wins per key).
//!
//! The typed accessors on [`StateSnapshot`] and the [`keys`] module keep the
//! well-known governance keys in one place so nodes and routers never
//! disagree on spelling or type.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::{
    channels::{errors::ErrorEvent, Channel, ErrorsChannel, ExtrasChannel, MessagesChannel},
    message::Message,
};

/// Well-known extras keys shared across workflows.
///
/// Invariants the engine relies on:
/// - [`ITERATION_COUNT`](keys::ITERATION_COUNT) is monotonically non-decreasing.
/// - A non-empty [`ERROR_MESSAGE`](keys::ERROR_MESSAGE) routes to `End` at the
///   next conditional edge.
/// - [`NEXT_NODE`](keys::NEXT_NODE) is only interpreted by the router hanging
///   off a human-gate node.
pub mod keys {
    pub const ITERATION_COUNT: &str = "iteration_count";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const NEXT_NODE: &str = "next_node";
    pub const DRAFT_COUNT: &str = "draft_count";
    pub const VERDICT_COUNT: &str = "verdict_count";
    pub const CURRENT_DRAFT: &str = "current_draft";
    pub const LLD_STATUS: &str = "lld_status";
    pub const OPEN_QUESTIONS_STATUS: &str = "open_questions_status";
    pub const COMPLETENESS_VERDICT: &str = "completeness_verdict";
    pub const COMPLETENESS_ITERATIONS: &str = "completeness_iterations";
    pub const USER_FEEDBACK: &str = "user_feedback";
    pub const ISSUE_NUMBER: &str = "issue_number";
    pub const ISSUE_TITLE: &str = "issue_title";
    pub const ISSUE_BODY: &str = "issue_body";
    pub const BRIEF_FILE: &str = "brief_file";
    pub const AUDIT_DIR: &str = "audit_dir";
    pub const FINAL_PATH: &str = "final_path";
    pub const AUTO_MODE: &str = "auto_mode";
    pub const MOCK_MODE: &str = "mock_mode";
    pub const VALIDATION_ATTEMPTS: &str = "validation_attempts";
    pub const TEST_PLAN_STATUS: &str = "test_plan_status";
    pub const CONTEXT_FILES: &str = "context_files";
    pub const CODEBASE_CONTEXT: &str = "codebase_context";
    pub const REVIEW_VERDICT: &str = "review_verdict";
    pub const BLOCKING_ISSUES: &str = "blocking_issues";
    pub const MAX_ITERATIONS: &str = "max_iterations";
    pub const BRIEF_CONTENT: &str = "brief_content";
    pub const LLD_CONTENT: &str = "lld_content";
    pub const SLUG: &str = "slug";
    pub const IMPLEMENTATION_FILES: &str = "implementation_files";
    pub const TEST_FILES: &str = "test_files";
    pub const VERIFY_RED: &str = "verify_red_passed";
    pub const VERIFY_GREEN: &str = "verify_green_passed";
    pub const SKIP_E2E: &str = "skip_e2e";
}

/// The state container for one workflow thread.
///
/// Three versioned channels: the provider conversation, the governance
/// key/value map, and accumulated error events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedState {
    pub messages: MessagesChannel,
    pub extra: ExtrasChannel,
    pub errors: ErrorsChannel,
}

/// Immutable view of the state at a point in time.
///
/// Snapshots are handed to nodes and routers; they are cloned data, so the
/// underlying state can keep evolving without invalidating them.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    pub messages: Vec<Message>,
    pub messages_version: u32,
    pub extra: FxHashMap<String, Value>,
    pub extra_version: u32,
    pub errors: Vec<ErrorEvent>,
    pub errors_version: u32,
}

impl VersionedState {
    /// State seeded with a single user message.
    pub fn new_with_user_message(user_text: &str) -> Self {
        Self {
            messages: MessagesChannel::new(vec![Message::user(user_text)], 1),
            extra: ExtrasChannel::default(),
            errors: ErrorsChannel::default(),
        }
    }

    /// Builder for states with initial governance keys.
    ///
    /// ```
    /// use steward::state::{keys, VersionedState};
    /// use serde_json::json;
    ///
    /// let state = VersionedState::builder()
    ///     .with_extra(keys::ISSUE_NUMBER, json!(42))
    ///     .with_extra(keys::ITERATION_COUNT, json!(0))
    ///     .build();
    /// assert_eq!(state.snapshot().issue_number(), Some(42));
    /// ```
    pub fn builder() -> VersionedStateBuilder {
        VersionedStateBuilder::default()
    }

    /// Appends a message without bumping the channel version (the barrier
    /// owns version bumps).
    pub fn add_message(&mut self, role: &str, content: &str) -> &mut Self {
        self.messages.get_mut().push(Message::new(role, content));
        self
    }

    /// Inserts a governance key without bumping the channel version.
    pub fn add_extra(&mut self, key: &str, value: Value) -> &mut Self {
        self.extra.get_mut().insert(key.to_string(), value);
        self
    }

    /// Clones the current channel contents into an immutable snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            messages: self.messages.snapshot(),
            messages_version: self.messages.version(),
            extra: self.extra.snapshot(),
            extra_version: self.extra.version(),
            errors: self.errors.snapshot(),
            errors_version: self.errors.version(),
        }
    }
}

impl Default for VersionedState {
    fn default() -> Self {
        Self {
            messages: MessagesChannel::default(),
            extra: ExtrasChannel::default(),
            errors: ErrorsChannel::default(),
        }
    }
}

impl StateSnapshot {
    /// Returns a string-valued key, treating absent and non-string as `None`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Returns an integer-valued key.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    /// Returns a boolean-valued key, defaulting to `false` when absent.
    #[must_use]
    pub fn get_flag(&self, key: &str) -> bool {
        self.extra
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Current iteration count (0 when unset).
    #[must_use]
    pub fn iteration_count(&self) -> u64 {
        self.get_u64(keys::ITERATION_COUNT).unwrap_or(0)
    }

    /// The terminal error message, if any. Empty string reads as `None`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.get_str(keys::ERROR_MESSAGE).filter(|s| !s.is_empty())
    }

    /// Routing hint written by human-gate nodes.
    #[must_use]
    pub fn next_node(&self) -> Option<&str> {
        self.get_str(keys::NEXT_NODE).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn draft_count(&self) -> u64 {
        self.get_u64(keys::DRAFT_COUNT).unwrap_or(0)
    }

    #[must_use]
    pub fn verdict_count(&self) -> u64 {
        self.get_u64(keys::VERDICT_COUNT).unwrap_or(0)
    }

    #[must_use]
    pub fn issue_number(&self) -> Option<u64> {
        self.get_u64(keys::ISSUE_NUMBER)
    }

    #[must_use]
    pub fn current_draft(&self) -> Option<&str> {
        self.get_str(keys::CURRENT_DRAFT)
    }

    #[must_use]
    pub fn auto_mode(&self) -> bool {
        self.get_flag(keys::AUTO_MODE)
    }

    #[must_use]
    pub fn mock_mode(&self) -> bool {
        self.get_flag(keys::MOCK_MODE)
    }

    /// Per-workflow iteration budget, falling back to the supplied default.
    #[must_use]
    pub fn max_iterations(&self, default: u64) -> u64 {
        self.get_u64(keys::MAX_ITERATIONS).unwrap_or(default)
    }
}

/// Fluent builder for initial workflow state.
#[derive(Debug, Default)]
pub struct VersionedStateBuilder {
    messages: Vec<Message>,
    extra: FxHashMap<String, Value>,
}

impl VersionedStateBuilder {
    pub fn with_user_message(mut self, content: &str) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn with_system_message(mut self, content: &str) -> Self {
        self.messages.push(Message::system(content));
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> VersionedState {
        VersionedState {
            messages: MessagesChannel::new(self.messages, 1),
            extra: ExtrasChannel::new(self.extra, 1),
            errors: ErrorsChannel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_error_message_reads_as_none() {
        let state = VersionedState::builder()
            .with_extra(keys::ERROR_MESSAGE, json!(""))
            .build();
        assert!(state.snapshot().error_message().is_none());

        let state = VersionedState::builder()
            .with_extra(keys::ERROR_MESSAGE, json!("INPUT_NOT_FOUND: no brief"))
            .build();
        assert_eq!(
            state.snapshot().error_message(),
            Some("INPUT_NOT_FOUND: no brief")
        );
    }

    #[test]
    fn counters_default_to_zero() {
        let snap = VersionedState::default().snapshot();
        assert_eq!(snap.iteration_count(), 0);
        assert_eq!(snap.draft_count(), 0);
        assert_eq!(snap.verdict_count(), 0);
    }

    #[test]
    fn snapshot_is_detached_from_state() {
        let mut state = VersionedState::new_with_user_message("seed");
        state.add_extra(keys::LLD_STATUS, json!("DRAFTING"));
        let snap = state.snapshot();
        state.add_extra(keys::LLD_STATUS, json!("BLOCKED"));
        assert_eq!(snap.get_str(keys::LLD_STATUS), Some("DRAFTING"));
    }

    #[test]
    fn max_iterations_falls_back_to_default() {
        let snap = VersionedState::default().snapshot();
        assert_eq!(snap.max_iterations(5), 5);
        let snap = VersionedState::builder()
            .with_extra(keys::MAX_ITERATIONS, json!(9))
            .build()
            .snapshot();
        assert_eq!(snap.max_iterations(5), 9);
    }
}
