//! The `Address`/`Target` data model: overlay identifiers and XOR distance.

use std::cmp::Ordering;
use std::fmt;

use crate::consts::{KEY_LEN, TARGET_LEN};

/// 16-byte identifier being searched for.
pub type Target = [u8; TARGET_LEN];

/// An `Address`'s dedup identity.
pub type Key = [u8; KEY_LEN];

/// 64-bit overlay route identifier.
pub type Path = u64;

/// Sentinel returned by [`crate::collaborators::LabelSplicer::splice`] when a
/// route cannot be spliced.
pub const SPLICE_FAILURE: Path = Path::MAX;

/// A candidate peer: a 16-byte overlay identifier, a 32-byte public key, a
/// path through the overlay, and the protocol version it advertised.
///
/// Equality for dedup purposes uses only `key` — see [`Address::same_key`].
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Address {
    pub ip6: [u8; TARGET_LEN],
    pub key: Key,
    pub path: Path,
    pub version: u32,
}

impl Address {
    pub fn same_key(&self, other: &Address) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("ip6", &hex::encode(self.ip6))
            .field("key", &hex::encode(&self.key[..4]))
            .field("path", &format_args!("{:016x}", self.path))
            .field("version", &self.version)
            .finish()
    }
}

/// XOR distance between `target` and `ip6`, as a lexicographically
/// comparable byte array.
pub fn closest_bytes(target: &Target, ip6: &[u8; TARGET_LEN]) -> [u8; TARGET_LEN] {
    let mut out = [0u8; TARGET_LEN];
    for i in 0..TARGET_LEN {
        out[i] = target[i] ^ ip6[i];
    }
    out
}

/// Orders two addresses by their XOR distance to `target`.
///
/// `Ordering::Less` means `a` is strictly closer to `target` than `b`.
pub fn closest(target: &Target, a: &Address, b: &Address) -> Ordering {
    closest_bytes(target, &a.ip6).cmp(&closest_bytes(target, &b.ip6))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip6_last_byte: u8, key_byte: u8) -> Address {
        let mut ip6 = [0u8; TARGET_LEN];
        ip6[15] = ip6_last_byte;
        Address {
            ip6,
            key: [key_byte; KEY_LEN],
            path: 1,
            version: 1,
        }
    }

    #[test]
    fn closest_orders_by_xor_distance() {
        let target = [0u8; TARGET_LEN];
        let near = addr(1, 1);
        let far = addr(2, 2);
        assert_eq!(closest(&target, &near, &far), Ordering::Less);
        assert_eq!(closest(&target, &far, &near), Ordering::Greater);
        assert_eq!(closest(&target, &near, &near), Ordering::Equal);
    }

    #[test]
    fn same_key_ignores_path_and_version() {
        let mut a = addr(1, 9);
        let b = addr(2, 9);
        assert!(a.same_key(&b));
        a.path = 42;
        assert!(a.same_key(&b));
    }
}
