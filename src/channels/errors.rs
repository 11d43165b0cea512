//! Error events carried on the errors channel.
//!
//! An [`ErrorEvent`] records where in the run something went wrong (node,
//! runner, or engine scope), the error chain itself, and free-form context.
//! Events are accumulated, never dropped: the errors channel is part of the
//! checkpointed state and therefore part of the audit story.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where in the execution an error originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    /// A workflow node failed. `kind` is the encoded node kind.
    Node { kind: String, step: u64 },
    /// The runner itself failed outside any node.
    Runner { session: String, step: u64 },
    /// Engine-level failure (barrier, compile, persistence).
    Engine,
}

impl Default for ErrorScope {
    fn default() -> Self {
        ErrorScope::Engine
    }
}

/// A message with an optional nested cause, mirroring an error chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CausedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<CausedError>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl CausedError {
    /// Single-message error with no cause.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Attaches a cause one level down.
    #[must_use]
    pub fn with_cause(mut self, cause: CausedError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// A timestamped, scoped error record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: CausedError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    /// Node-scoped error event.
    pub fn node<S: Into<String>>(kind: S, step: u64, error: CausedError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Node {
                kind: kind.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Runner-scoped error event.
    pub fn runner<S: Into<String>>(session: S, step: u64, error: CausedError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Runner {
                session: session.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Engine-scoped error event.
    pub fn engine(error: CausedError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Engine,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_event_serializes_with_tagged_scope() {
        let event = ErrorEvent::node("review", 3, CausedError::msg("verdict parse failed"))
            .with_tag("provider")
            .with_context(json!({"attempts": 2}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["scope"]["scope"], "node");
        assert_eq!(value["scope"]["kind"], "review");
        assert_eq!(value["scope"]["step"], 3);
        assert_eq!(value["tags"][0], "provider");
    }

    #[test]
    fn cause_chain_roundtrips() {
        let event = ErrorEvent::engine(
            CausedError::msg("barrier failed").with_cause(CausedError::msg("bad key")),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: ErrorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.error.cause.unwrap().message, "bad key");
    }
}
