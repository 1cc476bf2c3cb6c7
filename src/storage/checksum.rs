//! # Page Checksums
//!
//! CRC32 in the MSB-first form: polynomial 0x04C11DB7, initial value
//! 0xFFFFFFFF, final complement. These are the CRC-32/BZIP2 parameters, so
//! the lookup table comes from the `crc` crate and is built at compile
//! time.
//!
//! Page code streams the covered byte ranges through a `Digest`
//! (init/update/finalize); `compute` is the one-shot form.

use crc::{Crc, CRC_32_BZIP2};

/// The page checksum algorithm. Use `CRC32.digest()` for incremental
/// computation over discontiguous ranges.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// One-shot checksum of a contiguous byte slice.
pub fn compute(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
