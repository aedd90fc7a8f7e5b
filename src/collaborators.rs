//! Traits describing the external collaborators the core consumes: the
//! routing table / node store, the RPC layer, the rumor mill, and
//! identifier/label algebra. The core never implements any of these; it
//! only calls them.
//!
//! Bundled into one [`Environment`] trait with an associated `Future` type
//! rather than pulling in `async-trait`.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::address::{Address, Key, Path, Target};
use crate::wire::{FindNodeQuery, FindNodeReply};

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    #[error("connection to peer lost")]
    ConnectionLost,
    #[error("request timed out")]
    TimedOut,
    #[error("router error: {0}")]
    Other(Cow<'static, str>),
}

/// Everything the search runner needs from the surrounding DHT: a routing
/// table, an RPC layer, a rumor intake queue, a label splicer, and address
/// arithmetic.
pub trait Environment: Clone + 'static {
    /// Future returned by [`Environment::find_node`].
    type FindNodeFut: Future<Output = Result<(Duration, FindNodeReply), RouterError>>;

    // --- node_store ---------------------------------------------------

    /// The `k` closest locally-known nodes to `target` with at least
    /// `min_version`, excluding none in particular (the core never needs to
    /// exclude specific nodes from the seed).
    fn closest(&self, target: &Target, k: usize, min_version: u32) -> Vec<Address>;

    /// Resolves the current best-known node for a candidate's path, so a
    /// stale or superseded route can be detected before it is queried.
    fn best_for_path(&self, candidate: &Address) -> Option<Address>;

    /// Reports a route that is known to be dead (e.g. because it loops back
    /// through us).
    fn broken_path(&self, path: Path);

    // --- router / RPC ---------------------------------------------------

    /// Sends a find-node query to `to` and awaits the reply, timed.
    fn find_node(&self, to: &Address, query: FindNodeQuery) -> Self::FindNodeFut;

    /// The duration to wait for a reply before re-stepping the search.
    fn search_timeout(&self) -> Duration;

    // --- rumor mill ---------------------------------------------------

    /// Enqueues an unverified advertised address for later probing.
    fn add_rumor(&self, addr: Address);

    // --- label splicer ---------------------------------------------------

    /// Composes `inner`'s route onto the end of `outer`'s, or returns `None`
    /// if the route cannot be extended through `outer`.
    fn splice(&self, inner: Path, outer: Path) -> Option<Path>;

    // --- address arithmetic / serialization ---------------------------------------------------

    /// Derives the 16-byte overlay prefix (`ip6`) of a key.
    fn derive_prefix(&self, key: &Key) -> [u8; 16];

    /// The overlay's "is this a legal address" predicate.
    fn is_valid_prefix(&self, ip6: &[u8; 16]) -> bool;

    /// Parses one `ADDRESS_SERIALIZED_SIZE`-byte record into a path and key.
    fn parse_record(&self, bytes: &[u8]) -> Option<(Path, Key)>;
}
