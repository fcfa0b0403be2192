//! Per-key serialization of admitted operations.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::operation::Launch;

/// Routes admitted operations into per-key channels.
///
/// Operations sharing a non-default key run strictly one at a time, in
/// admission order; unkeyed operations pass straight through and run
/// concurrently. A parked operation keeps the in-flight slot it was admitted
/// with until its channel reaches it, so the gate's accounting never has to
/// distinguish "running" from "waiting behind its key".
pub(crate) struct KeyRouter {
    channels: HashMap<String, KeyChannel>,
}

struct KeyChannel {
    parked: VecDeque<Launch>,
}

impl KeyRouter {
    pub(crate) fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Accepts an admitted operation. Returns the launch if it may run now,
    /// or parks it behind the in-flight operation sharing its key.
    pub(crate) fn admit(&mut self, launch: Launch) -> Option<Launch> {
        let Some(key) = launch.key.clone() else {
            return Some(launch);
        };
        match self.channels.get_mut(&key) {
            Some(channel) => {
                channel.parked.push_back(launch);
                None
            }
            None => {
                self.channels.insert(
                    key,
                    KeyChannel {
                        parked: VecDeque::new(),
                    },
                );
                Some(launch)
            }
        }
    }

    /// Records that the in-flight operation for `key` terminated and hands
    /// back the next parked operation of that key, if any.
    pub(crate) fn on_terminated(&mut self, key: &str) -> Option<Launch> {
        let Some(channel) = self.channels.get_mut(key) else {
            debug_assert!(false, "termination for key {key:?} with no channel");
            return None;
        };
        match channel.parked.pop_front() {
            Some(next) => Some(next),
            None => {
                self.channels.remove(key);
                None
            }
        }
    }
}
