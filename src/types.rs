//! Core identifier types for workflow graphs.
//!
//! These are the fundamental concepts shared by every governance workflow:
//! [`NodeKind`] names a vertex in the execution graph, and [`ChannelType`]
//! names one of the state channels a barrier merge can touch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `Start` and `End` are virtual endpoints: they are never executed and never
/// registered, they only anchor the topology. Every real node is a `Custom`
/// variant carrying the node's name (for example `"generate_draft"` or
/// `"completeness_gate"`).
///
/// # Persistence
///
/// `NodeKind` round-trips through checkpoints both via serde and via the
/// [`encode`](Self::encode)/[`decode`](Self::decode) string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry point. Edges out of `Start` form the initial frontier.
    Start,
    /// Virtual terminal. Reaching `End` (or an empty frontier) completes the run.
    End,
    /// A named, executable workflow node.
    Custom(String),
}

impl NodeKind {
    /// Encode into the persisted string form.
    ///
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `Custom("x")` → `"Custom:x"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a `NodeKind`.
    ///
    /// Unrecognized strings decode as `Custom` for forward compatibility.
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

/// Identifies a state channel for reducer registration and barrier reporting.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Conversation messages exchanged with providers.
    Message,
    /// Error events accumulated across the run.
    Error,
    /// The workflow's key/value state map (drafts, verdicts, counters).
    Extra,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Error => write!(f, "error"),
            Self::Extra => write!(f, "extra"),
        }
    }
}
