use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::{AddErrors, AddMessages, MapMerge, Reducer, ReducerError};
use crate::node::NodePartial;
use crate::state::VersionedState;
use crate::types::ChannelType;

/// Registry mapping channels to their reducers.
///
/// The default registry wires the standard trio: append messages, shallow
/// merge extras, append errors. Multiple reducers may be registered for a
/// channel and run in registration order.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducer_map: FxHashMap<ChannelType, Vec<Arc<dyn Reducer>>>,
}

/// Whether the partial actually carries data for the channel; lets the
/// registry skip reducers with nothing to do.
fn channel_guard(channel: &ChannelType, partial: &NodePartial) -> bool {
    match channel {
        ChannelType::Message => partial
            .messages
            .as_ref()
            .map(|v| !v.is_empty())
            .unwrap_or(false),
        ChannelType::Extra => partial
            .extra
            .as_ref()
            .map(|m| !m.is_empty())
            .unwrap_or(false),
        ChannelType::Error => partial
            .errors
            .as_ref()
            .map(|v| !v.is_empty())
            .unwrap_or(false),
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(ChannelType::Message, Arc::new(AddMessages))
            .register(ChannelType::Extra, Arc::new(MapMerge))
            .register(ChannelType::Error, Arc::new(AddErrors));
        registry
    }
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self {
            reducer_map: FxHashMap::default(),
        }
    }

    /// Registers a reducer for a channel. Chainable.
    pub fn register(&mut self, channel: ChannelType, reducer: Arc<dyn Reducer>) -> &mut Self {
        self.reducer_map.entry(channel).or_default().push(reducer);
        self
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_reducer(mut self, channel: ChannelType, reducer: Arc<dyn Reducer>) -> Self {
        self.register(channel, reducer);
        self
    }

    /// Applies the reducers for one channel, skipping when the partial has
    /// no data for it.
    pub fn try_update(
        &self,
        channel_type: ChannelType,
        state: &mut VersionedState,
        to_update: &NodePartial,
    ) -> Result<(), ReducerError> {
        if !channel_guard(&channel_type, to_update) {
            return Ok(());
        }
        if let Some(reducers) = self.reducer_map.get(&channel_type) {
            for reducer in reducers {
                reducer.apply(state, to_update);
            }
            Ok(())
        } else {
            Err(ReducerError::UnknownChannel(channel_type))
        }
    }

    /// Applies all registered channels for the given partial.
    pub fn apply_all(
        &self,
        state: &mut VersionedState,
        merged_update: &NodePartial,
    ) -> Result<(), ReducerError> {
        for channel in self.reducer_map.keys() {
            self.try_update(channel.clone(), state, merged_update)?;
        }
        Ok(())
    }

    /// Which channels would this partial update?
    pub fn touched_channels(&self, partial: &NodePartial) -> Vec<ChannelType> {
        self.reducer_map
            .keys()
            .filter(|c| channel_guard(c, partial))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    #[test]
    fn default_registry_applies_all_channels() {
        let registry = ReducerRegistry::default();
        let mut state = VersionedState::default();
        let partial = NodePartial::new()
            .with_messages(vec![Message::assistant("draft ready")])
            .set("draft_count", json!(1));

        registry.apply_all(&mut state, &partial).unwrap();
        let snap = state.snapshot();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.extra.get("draft_count"), Some(&json!(1)));
    }

    #[test]
    fn empty_partial_is_a_noop() {
        let registry = ReducerRegistry::default();
        let mut state = VersionedState::new_with_user_message("seed");
        registry.apply_all(&mut state, &NodePartial::new()).unwrap();
        assert_eq!(state.snapshot().messages.len(), 1);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let registry = ReducerRegistry::new();
        let mut state = VersionedState::default();
        let partial = NodePartial::new().set("k", json!(1));
        let err = registry.try_update(ChannelType::Extra, &mut state, &partial);
        assert!(matches!(err, Err(ReducerError::UnknownChannel(_))));
    }
}
