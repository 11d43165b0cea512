use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

/// Shallow merge of the extras map. A key present in the update overwrites
/// the key in the state; keys the update does not mention are untouched.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct MapMerge;

impl Reducer for MapMerge {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        if let Some(extras_update) = &update.extra {
            if !extras_update.is_empty() {
                let state_map = state.extra.get_mut();
                for (k, v) in extras_update.iter() {
                    state_map.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodePartial;
    use serde_json::json;

    #[test]
    fn last_writer_wins_per_key() {
        let mut state = VersionedState::default();
        state.add_extra("status", json!("DRAFTING"));
        state.add_extra("draft_count", json!(1));

        let update = NodePartial::new().set("status", json!("BLOCKED"));
        MapMerge.apply(&mut state, &update);

        let snap = state.snapshot();
        assert_eq!(snap.extra.get("status"), Some(&json!("BLOCKED")));
        // Unmentioned keys survive.
        assert_eq!(snap.extra.get("draft_count"), Some(&json!(1)));
    }
}
