//! # blockdb Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//! Constants that depend on each other are co-located to prevent
//! mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PARTITION_COUNT (10)
//!       │
//!       └─> partition routing: |x| % PARTITION_COUNT, and the local
//!           slot packing divides x by PARTITION_COUNT before encoding
//!
//! MAX_NODE (14 * 104 * 1024 slots per partition)
//!       │
//!       ├─> MAX_CACHE (MAX_NODE / 56 slab entries)
//!       │
//!       └─> VALUE_OFFSET (slot-table prefix of the meta file,
//!           rounded up to EXTENT_ALIGN)
//!
//! EXTENT_ALIGN (1024 bytes)
//!       │
//!       ├─> every data-file extent starts and ends on this boundary
//!       │
//!       └─> KeyNode stores pos / EXTENT_ALIGN in 32 bits, capacity in
//!           EXTENT_ALIGN units in 16 bits
//!
//! MAX_DATA_LENGTH (65535)
//!       │
//!       ├─> a record (header + payload, rounded to EXTENT_ALIGN) must
//!       │   stay below this, so capacity always fits KeyNode's i16
//!       │
//!       └─> READ_BUFFER_LEN (round_up to PREREAD_WINDOW) sizes the
//!           per-partition I/O buffer; the miss path reads
//!           round_up(capacity, PREREAD_WINDOW) bytes in one pread
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `RECORD_HEADER_SIZE == 24` and `KEY_NODE_SIZE == 12` (byte-exact
//!    on-disk layout, re-asserted against the real structs in
//!    `storage::headers`)
//! 2. `VALUE_OFFSET` is a multiple of `EXTENT_ALIGN`
//! 3. `READ_BUFFER_LEN` covers the largest legal extent plus the preread
//!    window rounding

/// Number of independent partitions per store. A block at `(x, y, z)` is
/// routed to partition `|x| % PARTITION_COUNT`.
pub const PARTITION_COUNT: usize = 10;

/// Fixed logical slots per partition. The local slot packing
/// (z | x' << 10 | (y + 14) << 16) tops out slightly above this; slots
/// beyond it are rejected as out of range.
pub const MAX_NODE: usize = 14 * 104 * 1024;

/// Slab-allocated cache values per partition.
pub const MAX_CACHE: usize = MAX_NODE / 56;

/// Ceiling on cached payload bytes per partition (20 MiB).
pub const MAX_CACHE_LENGTH: usize = 20 * 1024 * 1024;

/// Upper bound on a record (header + payload) after rounding to
/// EXTENT_ALIGN. Oversize saves are rejected without touching disk.
pub const MAX_DATA_LENGTH: usize = 65535;

/// Alignment of every data-file extent, and the unit KeyNode uses for
/// both position and capacity.
pub const EXTENT_ALIGN: usize = 1024;

/// The miss path reads round_up(capacity, PREREAD_WINDOW) bytes so that
/// records in adjacent slots that happen to sit in the same window can be
/// validated and cached opportunistically.
pub const PREREAD_WINDOW: usize = 8192;

/// Soft ceiling on the preread FIFO; beyond it, eviction prefers preread
/// entries over access-driven ones.
pub const PREREAD_FIFO_SOFT_CAP: usize = 1024;

/// A slab value never holds more than this many FIFO tokens, bounding the
/// second-chance window of hot keys.
pub const FIFO_REFS_MAX: i64 = 3;

/// Size of the record header prefixed to every on-disk extent.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Size of one slot-table entry in the meta file.
pub const KEY_NODE_SIZE: usize = 12;

/// Size of the meta-file prefix before the slot table (version, sequence,
/// count).
pub const PARTITION_HEADER_SIZE: usize = 14;

/// Mapped length of the meta file: header prefix + slot table, rounded up
/// to EXTENT_ALIGN.
pub const VALUE_OFFSET: usize =
    round_up(PARTITION_HEADER_SIZE + MAX_NODE * KEY_NODE_SIZE, EXTENT_ALIGN);

/// Per-partition reusable I/O buffer. Must cover the largest read the
/// miss path can issue: round_up(max capacity, PREREAD_WINDOW).
pub const READ_BUFFER_LEN: usize = round_up(MAX_DATA_LENGTH, PREREAD_WINDOW);

/// Bounded wait inside force_flush: poll count x poll interval, then a
/// final settle sleep before partition flushes.
pub const FORCE_FLUSH_MAX_POLLS: usize = 100;
pub const FORCE_FLUSH_POLL_MS: u64 = 100;
pub const FORCE_FLUSH_SETTLE_MS: u64 = 500;

/// Minimum seconds between hit-rate reports; calls inside the window are
/// no-ops so the TPS counters keep accumulating.
pub const HIT_RATE_INTERVAL_SECS: i64 = 30;

/// Stamp written into RecordHeader::reserved.
pub const RECORD_RESERVED: u32 = 0xCDCD_CDCD;

/// Supported meta-file format version.
pub const META_VERSION: i16 = 1;

pub const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

const _: () = assert!(
    VALUE_OFFSET % EXTENT_ALIGN == 0,
    "slot table must end on an extent boundary"
);

const _: () = assert!(
    READ_BUFFER_LEN >= round_up(MAX_DATA_LENGTH - 1, PREREAD_WINDOW),
    "read buffer must cover the largest legal extent after window rounding"
);

const _: () = assert!(
    MAX_CACHE < MAX_NODE,
    "slab capacity must not exceed the slot count"
);
