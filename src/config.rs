//! Runner-level configuration: concurrency cap, seed fan-out, and the
//! minimum accepted protocol version.

use crate::consts::{DEFAULT_K, DEFAULT_MAX_CONCURRENT_SEARCHES};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RunnerConfig {
    /// Cap on concurrently active searches. Admission uses strict `>`
    /// against this cap, so up to `max_concurrent_searches + 1` searches
    /// may be active at once.
    pub max_concurrent_searches: usize,

    /// Fan-out (`K`) of the initial seed: how many locally-known nodes a
    /// new search starts with.
    pub k: usize,

    /// The minimum protocol version a seed node must advertise to be used.
    pub current_protocol_version: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_searches: DEFAULT_MAX_CONCURRENT_SEARCHES,
            k: DEFAULT_K,
            current_protocol_version: 1,
        }
    }
}
