//! The per-search candidate frontier: an ordered, poppable set of not-yet-
//! queried addresses, closest-to-target first with a stable insertion-order
//! tie-break.

use std::cmp::Reverse;
use std::collections::HashMap;

use priority_queue::PriorityQueue;

use crate::address::{closest_bytes, Address, Key, Target};

/// Ordered, per-search set of candidate addresses. Distance-ascending pops,
/// insertion-order tie-breaks, at-most-once delivery per key.
pub struct Frontier {
    target: Target,
    /// Every address ever added, keyed by its dedup identity. Entries stay
    /// here even after being popped from `queue`, so `next_unqueried` can
    /// still return full address data and re-`add`s remain idempotent.
    known: HashMap<Key, Address>,
    /// Unqueried candidates, ordered by (distance, insertion sequence).
    queue: PriorityQueue<Key, (Reverse<[u8; 16]>, Reverse<u64>)>,
    next_seq: u64,
}

impl Frontier {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            known: HashMap::new(),
            queue: PriorityQueue::new(),
            next_seq: 0,
        }
    }

    /// Inserts `addr` if no entry with the same key exists. A no-op
    /// (including the queried flag) if the key is already known.
    pub fn add(&mut self, addr: Address) {
        if self.known.contains_key(&addr.key) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let distance = closest_bytes(&self.target, &addr.ip6);
        self.queue.push(addr.key, (Reverse(distance), Reverse(seq)));
        self.known.insert(addr.key, addr);
    }

    /// Returns and marks queried the unqueried entry closest to the target,
    /// or `None` if none remain.
    pub fn next_unqueried(&mut self) -> Option<Address> {
        let (key, _priority) = self.queue.pop()?;
        self.known.get(&key).copied()
    }

    #[cfg(test)]
    fn len_known(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::KEY_LEN;

    fn addr(ip6_last: u8, key_byte: u8) -> Address {
        let mut ip6 = [0u8; 16];
        ip6[15] = ip6_last;
        Address {
            ip6,
            key: [key_byte; KEY_LEN],
            path: 1,
            version: 1,
        }
    }

    #[test]
    fn pops_closest_first() {
        let mut f = Frontier::new([0u8; 16]);
        f.add(addr(5, 1));
        f.add(addr(1, 2));
        f.add(addr(3, 3));

        assert_eq!(f.next_unqueried().unwrap().key, [2u8; KEY_LEN]);
        assert_eq!(f.next_unqueried().unwrap().key, [3u8; KEY_LEN]);
        assert_eq!(f.next_unqueried().unwrap().key, [1u8; KEY_LEN]);
        assert!(f.next_unqueried().is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut f = Frontier::new([0u8; 16]);
        f.add(addr(7, 1));
        f.add(addr(7, 2));
        assert_eq!(f.next_unqueried().unwrap().key, [1u8; KEY_LEN]);
        assert_eq!(f.next_unqueried().unwrap().key, [2u8; KEY_LEN]);
    }

    #[test]
    fn readd_same_key_is_noop() {
        let mut f = Frontier::new([0u8; 16]);
        f.add(addr(1, 9));
        f.add(addr(1, 9));
        assert_eq!(f.len_known(), 1);
        assert!(f.next_unqueried().is_some());
        assert!(f.next_unqueried().is_none());
    }

    #[test]
    fn each_entry_queried_at_most_once() {
        let mut f = Frontier::new([0u8; 16]);
        f.add(addr(1, 1));
        let first = f.next_unqueried();
        assert!(first.is_some());
        // Re-adding the same key after it was queried must not resurrect it.
        f.add(addr(1, 1));
        assert!(f.next_unqueried().is_none());
    }
}
