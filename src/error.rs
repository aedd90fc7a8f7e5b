//! Error taxonomy.
//!
//! Almost every failure in the response pipeline is soft: it is logged via
//! `tracing` and handled locally without aborting the search. The single
//! caller-visible failure is [`SearchError::AdmissionRefused`], returned by
//! [`crate::Runner::start`].

use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum SearchError {
    /// `start` refused to admit a new search: either the global concurrency
    /// cap was already saturated, or the local routing table had no seed
    /// nodes for this target.
    #[error("search admission refused: {0}")]
    AdmissionRefused(#[from] AdmissionRefusedReason),
}

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum AdmissionRefusedReason {
    #[error("already {active} searches active against a cap of {max}")]
    ConcurrencyCapReached { active: usize, max: usize },
    #[error("no seed nodes available for this target")]
    EmptySeed,
}

/// Reasons a reply is dropped by the response pipeline. Never propagated to
/// callers; recorded here so tests can assert on the exact drop reason.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PipelineDrop {
    /// Missing/bad `n` or `np` length mismatch.
    MalformedReply,
    /// Label splice returned the failure sentinel.
    UnsplicableRoute,
    /// The returned address's prefix equals our own address (a dead loop).
    LoopRoute,
    /// The returned address failed the overlay's validity predicate.
    GarbageAddress,
    /// The candidate was not strictly closer to the target than the
    /// responder (the monotone-progress invariant).
    NotCloser,
}
