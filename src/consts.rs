//! Wire-level and search-level constants.

/// The maximum number of requests to make before calling a search failed.
pub const MAX_REQUESTS_PER_SEARCH: u32 = 8;

/// Length in bytes of an overlay identifier / target.
pub const TARGET_LEN: usize = 16;

/// Length in bytes of an `Address`'s public key.
pub const KEY_LEN: usize = 32;

/// Serialized size of one node record in a `find-node` reply: an 8-byte path
/// followed by a 32-byte key.
pub const ADDRESS_SERIALIZED_SIZE: usize = 8 + KEY_LEN;

/// Serialized size of one entry in the `np` version list.
pub const VERSION_ENTRY_SIZE: usize = 2;

/// Default fan-out (`k`) of the initial seed and of routing-table closeness
/// queries.
pub const DEFAULT_K: usize = 8;

/// Default cap on concurrently active searches.
pub const DEFAULT_MAX_CONCURRENT_SEARCHES: usize = 64;

/// Wire query name for a find-node request (`q = "fn"`).
pub const QUERY_FIND_NODE: &str = "fn";
