//! CRC32 checksums for pool metadata
//!
//! Every pool header, block header and undo record carries a CRC32
//! (IEEE polynomial). Any mismatch found while opening is corruption.

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Computes one CRC32 over several non-contiguous parts, in order.
pub fn compute_checksum_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
