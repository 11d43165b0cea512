//! Serde models for checkpoint persistence.
//!
//! The live state types carry behavior (versioned channels); these models
//! are the flat JSON shapes that go into the database. Keeping them apart
//! means the storage schema never leaks into engine code.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::errors::ErrorEvent;
use crate::channels::{Channel, ErrorsChannel, ExtrasChannel, MessagesChannel};
use crate::message::Message;
use crate::state::VersionedState;
use crate::types::NodeKind;

use super::Checkpoint;

/// Flat serialization of a [`VersionedState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub messages: Vec<Message>,
    pub messages_version: u32,
    pub extra: FxHashMap<String, Value>,
    pub extra_version: u32,
    #[serde(default)]
    pub errors: Vec<ErrorEvent>,
    #[serde(default = "default_version")]
    pub errors_version: u32,
}

fn default_version() -> u32 {
    1
}

impl From<&VersionedState> for PersistedState {
    fn from(state: &VersionedState) -> Self {
        Self {
            messages: state.messages.snapshot(),
            messages_version: state.messages.version(),
            extra: state.extra.snapshot(),
            extra_version: state.extra.version(),
            errors: state.errors.snapshot(),
            errors_version: state.errors.version(),
        }
    }
}

impl From<PersistedState> for VersionedState {
    fn from(p: PersistedState) -> Self {
        VersionedState {
            messages: MessagesChannel::new(p.messages, p.messages_version),
            extra: ExtrasChannel::new(p.extra, p.extra_version),
            errors: ErrorsChannel::new(p.errors, p.errors_version),
        }
    }
}

/// Flat serialization of a [`Checkpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub step: u64,
    pub state: PersistedState,
    /// Encoded node kinds (see [`NodeKind::encode`]).
    pub frontier: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ran_nodes: Vec<String>,
    #[serde(default)]
    pub updated_channels: Vec<String>,
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            thread_id: cp.thread_id.clone(),
            step: cp.step,
            state: PersistedState::from(&cp.state),
            frontier: cp.frontier.iter().map(NodeKind::encode).collect(),
            created_at: cp.created_at,
            ran_nodes: cp.ran_nodes.iter().map(NodeKind::encode).collect(),
            updated_channels: cp.updated_channels.clone(),
        }
    }
}

impl From<PersistedCheckpoint> for Checkpoint {
    fn from(p: PersistedCheckpoint) -> Self {
        Checkpoint {
            thread_id: p.thread_id,
            step: p.step,
            state: p.state.into(),
            frontier: p.frontier.iter().map(|s| NodeKind::decode(s)).collect(),
            created_at: p.created_at,
            ran_nodes: p.ran_nodes.iter().map(|s| NodeKind::decode(s)).collect(),
            updated_channels: p.updated_channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_roundtrips_through_persistence() {
        let mut state = VersionedState::new_with_user_message("seed");
        state.add_extra("iteration_count", json!(2));
        state.extra.set_version(4);

        let persisted = PersistedState::from(&state);
        let json = serde_json::to_string(&persisted).unwrap();
        let back: PersistedState = serde_json::from_str(&json).unwrap();
        let restored: VersionedState = back.into();

        assert_eq!(restored, state);
    }

    #[test]
    fn checkpoint_roundtrips_with_encoded_frontier() {
        let cp = Checkpoint {
            thread_id: "testing-3".into(),
            step: 5,
            state: VersionedState::default(),
            frontier: vec![NodeKind::Custom("implement".into()), NodeKind::End],
            created_at: Utc::now(),
            ran_nodes: vec![NodeKind::Custom("completeness_gate".into())],
            updated_channels: vec!["extra".into()],
        };
        let persisted = PersistedCheckpoint::from(&cp);
        assert_eq!(persisted.frontier, vec!["Custom:implement", "End"]);
        let back: Checkpoint = persisted.into();
        assert_eq!(back.frontier, cp.frontier);
        assert_eq!(back.ran_nodes, cp.ran_nodes);
    }
}
