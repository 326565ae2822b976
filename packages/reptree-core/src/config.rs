use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables for a [`crate::ReplicatedTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TreeConfig {
    /// Upper bound on ancestor walks. Hitting it is reported and treated as a cycle.
    pub max_depth: usize,
    /// Minimum spacing between notification flushes driven by `poll_events`.
    pub notify_interval_ms: u64,
}

impl TreeConfig {
    pub const DEFAULT_MAX_DEPTH: usize = 100_000;
    /// Roughly 30 flushes per second.
    pub const DEFAULT_NOTIFY_INTERVAL_MS: u64 = 33;

    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(self.notify_interval_ms)
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            notify_interval_ms: Self::DEFAULT_NOTIFY_INTERVAL_MS,
        }
    }
}
