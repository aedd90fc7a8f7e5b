//! Parses the `np` field of a find-node reply: a flat list of per-record
//! protocol versions, one stride-addressed `u16` per entry.

use crate::consts::VERSION_ENTRY_SIZE;

/// Parses `bytes` into a list of versions, or `None` if its length is not a
/// multiple of [`VERSION_ENTRY_SIZE`].
pub fn parse(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() % VERSION_ENTRY_SIZE != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(VERSION_ENTRY_SIZE)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]) as u32)
            .collect(),
    )
}
