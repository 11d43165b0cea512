//! Versioned state channels.
//!
//! Workflow state is split into independent channels, each carrying its own
//! monotonically increasing version. The barrier bumps a channel's version
//! only when a step actually updated it, which is what makes checkpoint
//! diffs and resume cheap to reason about.

pub mod errors;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::message::Message;
use errors::ErrorEvent;

/// Common behavior of a versioned state channel.
pub trait Channel {
    /// The payload this channel stores.
    type Payload: Clone;

    /// Read-only clone of the current payload.
    fn snapshot(&self) -> Self::Payload;

    /// Mutable access to the payload. Version bumps are the barrier's job,
    /// not the caller's.
    fn get_mut(&mut self) -> &mut Self::Payload;

    /// Current channel version.
    fn version(&self) -> u32;

    /// Overwrite the channel version (used when restoring from a checkpoint
    /// and when the barrier commits an update).
    fn set_version(&mut self, version: u32);

    /// Bump the version by one.
    fn bump_version(&mut self) {
        self.set_version(self.version() + 1);
    }
}

macro_rules! versioned_channel {
    ($(#[$meta:meta])* $name:ident, $payload:ty) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            payload: $payload,
            version: u32,
        }

        impl $name {
            /// Creates a channel with an explicit payload and version.
            #[must_use]
            pub fn new(payload: $payload, version: u32) -> Self {
                Self { payload, version }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    payload: Default::default(),
                    version: 1,
                }
            }
        }

        impl Channel for $name {
            type Payload = $payload;

            fn snapshot(&self) -> Self::Payload {
                self.payload.clone()
            }

            fn get_mut(&mut self) -> &mut Self::Payload {
                &mut self.payload
            }

            fn version(&self) -> u32 {
                self.version
            }

            fn set_version(&mut self, version: u32) {
                self.version = version;
            }
        }
    };
}

versioned_channel!(
    /// Channel holding the conversation exchanged with providers.
    MessagesChannel,
    Vec<Message>
);

versioned_channel!(
    /// Channel holding the workflow's key/value state map.
    ExtrasChannel,
    FxHashMap<String, Value>
);

versioned_channel!(
    /// Channel accumulating error events across the run.
    ErrorsChannel,
    Vec<ErrorEvent>
);
