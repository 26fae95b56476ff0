//! # Storage Module
//!
//! On-disk foundations for blockdb: the packed little-endian layout
//! structs, the positional-I/O data file, and the memory-mapped slot
//! table. Higher layers (`partition`, `store`) compose these; nothing in
//! here knows about coordinates or caching.
//!
//! ## Files Per Partition
//!
//! ```text
//! <savedir>/
//! ├── mapdb_0          # data file: 1 KiB-aligned record extents
//! ├── mapdb_0meta      # meta file: mmap'd header + slot table
//! ├── mapdb_1
//! ├── mapdb_1meta
//! └── ...
//! ```
//!
//! The data file is append-grown and never shrunk; the meta file has a
//! fixed mapped size derived from the slot count at compile time.

mod data_file;
pub mod headers;
mod meta_file;

pub use data_file::DataFile;
pub use headers::{KeyNode, PartitionHeader, RecordHeader};
pub use meta_file::MetaFile;

use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Seconds since the Unix epoch, for record timestamps and report
/// cadence.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parses a zerocopy struct from the front of a byte slice with size
/// validation.
#[inline]
pub fn parse_prefix<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}
