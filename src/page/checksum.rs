//! CRC32 checksums for index pages
//!
//! The checksum covers every page byte except the checksum field itself.

use crc32fast::Hasher;

/// Computes the page checksum, skipping `skip` (the checksum field).
pub fn compute_page_checksum(data: &[u8], skip: std::ops::Range<usize>) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&data[..skip.start]);
    hasher.update(&data[skip.end..]);
    hasher.finalize()
}
