//! # On-Disk Layout Definitions
//!
//! This module provides the type-safe, zerocopy-based structs for the two
//! files a partition owns:
//!
//! 1. **meta file** — a `PartitionHeader` prefix followed by the fixed
//!    `KeyNode` slot table. The whole region is memory-mapped read-write
//!    and mutated in place; `msync` is the durability primitive.
//! 2. **data file** — variable-length extents, each prefixed by a
//!    `RecordHeader` and zero-padded to the extent alignment.
//!
//! ## Layout
//!
//! ```text
//! meta file                        data file
//! +----------------------+        +---------------------------+
//! | PartitionHeader 14 B |        | RecordHeader 24 B         |
//! +----------------------+        | payload (len - 24 bytes)  |
//! | KeyNode[MAX_NODE]    |        | zero pad to capacity      |
//! |   12 B each          |        +---------------------------+
//! +----------------------+        | next extent ...           |
//! | pad to 1 KiB         |        +---------------------------+
//! +----------------------+
//! ```
//!
//! ## Zerocopy Safety
//!
//! All structs derive the zerocopy traits (`FromBytes`, `IntoBytes`,
//! `Immutable`, `KnownLayout`, `Unaligned`) so they can be read directly
//! out of the mmap region or the partition's I/O buffer without copies,
//! at any alignment. Multi-byte fields use explicit little-endian
//! wrappers; compile-time assertions pin the struct sizes.
//!
//! ## Field Widths
//!
//! `KeyNode.len` counts logical bytes including the 24-byte record
//! header. The largest legal record (just under `MAX_DATA_LENGTH` after
//! rounding) exceeds `i16::MAX`, so the field is read as an unsigned
//! 16-bit quantity; the on-disk bytes are identical. `capacity` is kept
//! small by storing extent-alignment units rather than bytes.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I16, I32, I64, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    EXTENT_ALIGN, KEY_NODE_SIZE, META_VERSION, PARTITION_HEADER_SIZE, RECORD_HEADER_SIZE,
    RECORD_RESERVED,
};

/// Prefix of the meta file: format version, a reserved sequence field and
/// the number of non-empty slots.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PartitionHeader {
    version: I16,
    sequence: I64,
    count: I32,
}

const _: () = assert!(std::mem::size_of::<PartitionHeader>() == PARTITION_HEADER_SIZE);

impl PartitionHeader {
    zerocopy_accessors! {
        version: i16,
        sequence: i64,
        count: i32,
    }

    /// Stamps a zeroed header as freshly initialized.
    pub fn init(&mut self) {
        self.set_version(META_VERSION);
        self.set_sequence(0);
        self.set_count(0);
    }

    pub fn check_version(&self) -> Result<()> {
        ensure!(
            self.version() == META_VERSION,
            "unsupported meta format version: {} (expected {})",
            self.version(),
            META_VERSION
        );
        Ok(())
    }

    pub fn increment_count(&mut self) {
        self.count = I32::new(self.count.get() + 1);
    }

    pub fn decrement_count(&mut self) {
        self.count = I32::new(self.count.get() - 1);
    }
}

/// One slot-table entry: where the slot's extent lives, how large it is,
/// how many logical bytes it holds, and the change-tracking flags.
///
/// Invariants: `len == 0` iff the slot is empty; `capacity > 0` implies an
/// extent exists at `pos()`; `len <= capacity_bytes()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct KeyNode {
    pos_kb: I32,
    capacity_kb: I16,
    len: U16,
    flags: [u8; 2],
    reserved: [u8; 2],
}

const _: () = assert!(std::mem::size_of::<KeyNode>() == KEY_NODE_SIZE);

impl KeyNode {
    /// Byte offset of the slot's extent in the data file.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos_kb.get() as u64 * EXTENT_ALIGN as u64
    }

    /// Stores an extent offset; must sit on the extent alignment.
    #[inline]
    pub fn set_pos(&mut self, pos: u64) {
        debug_assert!(pos % EXTENT_ALIGN as u64 == 0);
        self.pos_kb = I32::new((pos / EXTENT_ALIGN as u64) as i32);
    }

    /// Extent size in bytes.
    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_kb.get() as usize * EXTENT_ALIGN
    }

    #[inline]
    pub fn set_capacity_bytes(&mut self, capacity: usize) {
        debug_assert!(capacity % EXTENT_ALIGN == 0);
        self.capacity_kb = I16::new((capacity / EXTENT_ALIGN) as i16);
    }

    /// Logical bytes stored in the extent, including the record header.
    /// Zero means the slot is empty.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.get() as usize
    }

    #[inline]
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= u16::MAX as usize);
        self.len = U16::new(len as u16);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    /// Whether the slot changed since the last external sync-out.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.flags[0] != 0
    }

    #[inline]
    pub fn set_modified(&mut self, modified: bool) {
        self.flags = [modified as u8, 0];
    }

    #[inline]
    pub fn clear_flags(&mut self) {
        self.flags = [0, 0];
    }

    /// Raw flag bytes, for callers that track the legacy encoding.
    #[inline]
    pub fn flags(&self) -> [u8; 2] {
        self.flags
    }
}

/// Header prefixed to every on-disk record.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordHeader {
    headsize: U32,
    crc: U32,
    index: U32,
    timestamp: U64,
    reserved: U32,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

impl RecordHeader {
    pub fn new(crc: u32, index: u32, timestamp: u64) -> Self {
        Self {
            headsize: U32::new(RECORD_HEADER_SIZE as u32),
            crc: U32::new(crc),
            index: U32::new(index),
            timestamp: U64::new(timestamp),
            reserved: U32::new(RECORD_RESERVED),
        }
    }

    zerocopy_accessors! {
        headsize: u32,
        crc: u32,
        index: u32,
        timestamp: u64,
        reserved: u32,
    }
}
