//! State merge strategies applied at the barrier.
//!
//! Each channel has a reducer that folds a [`NodePartial`] into the state:
//! messages and errors append, extras merge shallowly with last-writer-wins
//! semantics. Custom reducers can be registered per channel if a workflow
//! needs different merge behavior.

mod add_errors;
mod add_messages;
mod map_merge;
mod registry;

pub use add_errors::AddErrors;
pub use add_messages::AddMessages;
pub use map_merge::MapMerge;
pub use registry::ReducerRegistry;

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodePartial;
use crate::state::VersionedState;
use crate::types::ChannelType;

/// A reducer folds one channel's slice of a `NodePartial` into the state.
pub trait Reducer: Send + Sync {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial);
}

#[derive(Debug, Error, Diagnostic)]
pub enum ReducerError {
    #[error("no reducers registered for channel: {0:?}")]
    #[diagnostic(
        code(steward::reducers::unknown_channel),
        help("Register a reducer for {0:?} on the ReducerRegistry.")
    )]
    UnknownChannel(ChannelType),
}
