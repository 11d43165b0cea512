use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

/// Appends partial messages to the conversation channel.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddMessages;

impl Reducer for AddMessages {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        if let Some(messages) = &update.messages {
            if !messages.is_empty() {
                state.messages.get_mut().extend(messages.iter().cloned());
            }
        }
    }
}
