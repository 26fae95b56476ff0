//! # Partition
//!
//! One of the store's independent shards: a data file of 1 KiB-aligned
//! record extents, the mmap'd slot table that indexes them, a reusable
//! I/O buffer, and the FIFO read cache. Partitions share nothing, so the
//! store scales reads and writes across them with one mutex each.
//!
//! ## Write Path
//!
//! A save composes `[RecordHeader | payload | zero pad]` in the reusable
//! buffer, then either overwrites the slot's existing extent in place
//! (when the rounded size still fits and the partition is not in
//! append-only mode) or appends a fresh extent at the end of the data
//! file and repoints the slot. In-place overwrites only write the
//! logical bytes; stale tail bytes in the extent are ignored on read
//! because the slot table records the logical length.
//!
//! ## Read Path
//!
//! A load resolves from the cache when possible. On a miss it reads the
//! extent rounded up to the preread window and validates records
//! front-to-back: the requested slot's record is returned, and any whole
//! records for adjacent slots that happen to sit in the fetched window
//! are validated and cached opportunistically. Validation failures on
//! the requested record surface as [`BlockRead::Corrupt`]; failures
//! while prefetching are silent and benign.
//!
//! ## Durability
//!
//! `flush` starts kernel writeback, then `fdatasync`s the data file when
//! only payload bytes changed since the previous flush (`fsync` when
//! extents moved), and always `msync`s the slot table.

use std::path::Path;

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use zerocopy::IntoBytes;

use crate::cache::BlockCache;
use crate::config::{
    round_up, EXTENT_ALIGN, MAX_DATA_LENGTH, MAX_NODE, PREREAD_WINDOW, READ_BUFFER_LEN,
    RECORD_HEADER_SIZE,
};
use crate::coord::{block_as_integer, global_of_slot, local_slot, BlockPos};
use crate::storage::{parse_prefix, DataFile, MetaFile, RecordHeader};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Whether a partition keeps the in-memory read cache, or runs
/// append-only (every save appends a fresh extent; nothing is cached).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cache,
    Append,
}

/// Outcome of a load. `Absent` and `Corrupt` are distinct: an absent
/// slot is normal, a corrupt record means the on-disk bytes failed
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRead {
    Absent,
    Corrupt,
    Block(Vec<u8>),
}

impl BlockRead {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BlockRead::Block(data) => Some(data),
            _ => None,
        }
    }
}

/// A load result plus whether it was resolved from memory (absorbed
/// value, empty slot, or cache) rather than the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedBlock {
    pub payload: BlockRead,
    pub cache_hit: bool,
}

impl LoadedBlock {
    fn in_memory(payload: BlockRead) -> Self {
        Self {
            payload,
            cache_hit: true,
        }
    }
}

pub struct Partition {
    inner: Mutex<PartitionInner>,
    index: usize,
}

struct PartitionInner {
    data: DataFile,
    meta: MetaFile,
    buffer: Box<[u8]>,
    cache: Option<BlockCache>,
    cache_mode: CacheMode,
    metadata_changed: bool,
}

impl Partition {
    pub fn open<P: AsRef<Path>>(
        savedir: P,
        file_name: &str,
        index: usize,
        cache_mode: CacheMode,
    ) -> Result<Self> {
        let savedir = savedir.as_ref();
        std::fs::create_dir_all(savedir)
            .wrap_err_with(|| format!("failed to create save directory '{}'", savedir.display()))?;

        let data = DataFile::open(savedir.join(file_name))?;
        let meta = MetaFile::open(savedir.join(format!("{file_name}meta")))?;

        let cache = match cache_mode {
            CacheMode::Cache => Some(BlockCache::new()),
            CacheMode::Append => None,
        };

        Ok(Self {
            inner: Mutex::new(PartitionInner {
                data,
                meta,
                buffer: vec![0u8; READ_BUFFER_LEN].into_boxed_slice(),
                cache,
                cache_mode,
                metadata_changed: false,
            }),
            index,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Persists a block. Out-of-range coordinates and oversize payloads
    /// are rejected without touching disk.
    pub fn save_block(&self, x: i16, y: i16, z: i16, data: &[u8], changed: bool) -> Result<()> {
        let Some(slot) = local_slot(x, y, z) else {
            tracing::error!(x, y, z, "save rejected: coordinate out of range");
            return Ok(());
        };

        let len = data.len() + RECORD_HEADER_SIZE;
        let capacity = round_up(len, EXTENT_ALIGN);
        if capacity >= MAX_DATA_LENGTH {
            let key = block_as_integer(BlockPos::new(x, y, z));
            tracing::error!(key, capacity, "save rejected: block too large");
            return Ok(());
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.buffer[..capacity].fill(0);
        let header = RecordHeader::new(payload_crc(data), slot, crate::storage::unix_timestamp());
        inner.buffer[..RECORD_HEADER_SIZE].copy_from_slice(header.as_bytes());
        inner.buffer[RECORD_HEADER_SIZE..len].copy_from_slice(data);

        if inner.meta.node(slot)?.is_empty() {
            inner.meta.header_mut()?.increment_count();
        }
        {
            let node = inner.meta.node_mut(slot)?;
            node.set_len(len);
            node.set_modified(changed);
        }

        let reuse = inner.meta.node(slot)?.capacity_bytes() >= capacity
            && inner.cache_mode != CacheMode::Append;
        let (write_pos, write_len) = if reuse {
            (inner.meta.node(slot)?.pos(), len)
        } else {
            let end = inner.data.len()?;
            if end % EXTENT_ALIGN as u64 != 0 {
                let key = block_as_integer(BlockPos::new(x, y, z));
                tracing::error!(key, end, "data file end is not extent aligned");
            }
            let node = inner.meta.node_mut(slot)?;
            node.set_capacity_bytes(capacity);
            node.set_pos(end);
            inner.metadata_changed = true;
            (end, capacity)
        };

        inner.data.write_at(write_pos, &inner.buffer[..write_len])?;

        if let Some(cache) = inner.cache.as_mut() {
            cache.insert(slot, data, true, false);
        }
        inner.data.hint_flush(write_pos, capacity as u64);

        Ok(())
    }

    /// Loads a block. Empty and out-of-range slots resolve in memory as
    /// `Absent`; cached slots resolve from the cache; everything else is
    /// read from the data file with opportunistic prefetch of adjacent
    /// records.
    pub fn load_block(&self, x: i16, y: i16, z: i16) -> Result<LoadedBlock> {
        let Some(slot) = local_slot(x, y, z) else {
            return Ok(LoadedBlock::in_memory(BlockRead::Absent));
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.meta.node(slot)?.is_empty() {
            return Ok(LoadedBlock::in_memory(BlockRead::Absent));
        }

        let cached = inner
            .cache
            .as_ref()
            .and_then(|cache| cache.lookup(slot))
            .map(|data| data.to_vec());
        if let Some(value) = cached {
            if let Some(cache) = inner.cache.as_mut() {
                cache.insert(slot, &value, false, false);
            }
            return Ok(LoadedBlock::in_memory(BlockRead::Block(value)));
        }

        let node = inner.meta.node(slot)?;
        let want = round_up(node.capacity_bytes(), PREREAD_WINDOW).min(READ_BUFFER_LEN);
        let pos = node.pos();
        let read = inner.data.read_at(pos, &mut inner.buffer[..want])?;

        Ok(LoadedBlock {
            payload: scan_records(inner, read, slot),
            cache_hit: false,
        })
    }

    /// Loads a block together with its modified-since-sync flag. The
    /// flag is only meaningful for a record actually present on disk.
    pub fn direct_load(&self, x: i16, y: i16, z: i16) -> Result<(LoadedBlock, bool)> {
        let loaded = self.load_block(x, y, z)?;
        let modified = match (&loaded.payload, local_slot(x, y, z)) {
            (BlockRead::Block(data), Some(slot)) if !data.is_empty() => {
                self.inner.lock().meta.node(slot)?.is_modified()
            }
            _ => false,
        };
        Ok((loaded, modified))
    }

    /// Empties a slot. The extent stays allocated (and leaks until the
    /// slot is overwritten); only the slot table changes. Idempotent.
    pub fn delete_block(&self, x: i16, y: i16, z: i16) -> Result<()> {
        let Some(slot) = local_slot(x, y, z) else {
            return Ok(());
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.meta.node(slot)?.is_empty() {
            inner.meta.header_mut()?.decrement_count();
        }
        let node = inner.meta.node_mut(slot)?;
        node.set_len(0);
        node.clear_flags();
        Ok(())
    }

    /// Appends the global keys of every slot still marked modified since
    /// the last external sync-out.
    pub fn modify_list(&self, out: &mut Vec<i64>) -> Result<()> {
        let guard = self.inner.lock();
        for slot in 0..MAX_NODE as u32 {
            if guard.meta.node(slot)?.is_modified() {
                out.push(global_of_slot(slot, self.index));
            }
        }
        Ok(())
    }

    /// Appends the global keys of every non-empty slot.
    pub fn loadable_list(&self, out: &mut Vec<i64>) -> Result<()> {
        let guard = self.inner.lock();
        for slot in 0..MAX_NODE as u32 {
            if !guard.meta.node(slot)?.is_empty() {
                out.push(global_of_slot(slot, self.index));
            }
        }
        Ok(())
    }

    /// Durably flushes the data file and the slot table.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let only_data = !guard.metadata_changed;
        guard.metadata_changed = false;
        guard.data.flush(only_data)?;
        guard.meta.sync()
    }

    /// Number of non-empty slots.
    pub fn block_count(&self) -> Result<i32> {
        Ok(self.inner.lock().meta.header()?.count())
    }

    /// (cached slot count, cached payload bytes)
    pub fn cache_summary(&self) -> (u32, usize) {
        self.inner
            .lock()
            .cache
            .as_ref()
            .map(|cache| cache.summary())
            .unwrap_or((0, 0))
    }

    /// Releases the cache and flushes both files. Dropping the partition
    /// afterwards closes the handles; the slot table is synced again on
    /// drop as a backstop.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        if let Some(cache) = guard.cache.as_mut() {
            cache.release_all();
        }
        guard.meta.sync()?;
        guard.data.flush(false)
    }
}

/// Validates the records in the freshly read window. The first record
/// (the one the caller asked for) decides the return value; any further
/// whole records belonging to the following slots are cached as preread
/// and their failures are silent.
fn scan_records(inner: &mut PartitionInner, read_bytes: usize, first_slot: u32) -> BlockRead {
    let mut remaining = read_bytes;
    let mut read_pos = 0usize;
    let mut slot = first_slot;
    let mut first: Option<Vec<u8>> = None;

    loop {
        let requested = read_pos == 0;
        if remaining < RECORD_HEADER_SIZE || slot as usize >= MAX_NODE {
            break;
        }

        let Ok(header) = parse_prefix::<RecordHeader>(&inner.buffer[read_pos..], "RecordHeader")
        else {
            break;
        };
        let (headsize, record_slot, stored_crc) = (header.headsize(), header.index(), header.crc());

        if headsize as usize != RECORD_HEADER_SIZE {
            if requested {
                tracing::error!(headsize, slot, "record header size mismatch");
            }
            break;
        }
        if record_slot != slot {
            if requested {
                tracing::error!(expected = slot, found = record_slot, "record slot mismatch");
            }
            break;
        }

        let Ok(node) = inner.meta.node(slot) else {
            break;
        };
        let capacity = node.capacity_bytes();
        let len = node.len();
        if remaining < capacity {
            if requested {
                tracing::error!(slot, capacity, remaining, "record extent not fully read");
            }
            break;
        }
        if len < RECORD_HEADER_SIZE || len > capacity {
            if requested {
                tracing::error!(slot, len, capacity, "slot length out of bounds");
            }
            break;
        }

        let payload = inner.buffer[read_pos + RECORD_HEADER_SIZE..read_pos + len].to_vec();
        if payload_crc(&payload) != stored_crc {
            if requested {
                tracing::error!(slot, stored_crc, "record crc mismatch");
            }
            break;
        }

        if let Some(cache) = inner.cache.as_mut() {
            cache.insert(slot, &payload, true, !requested);
        }
        if requested {
            first = Some(payload);
        }

        remaining -= capacity;
        read_pos += capacity;
        slot += 1;
    }

    match first {
        Some(payload) => BlockRead::Block(payload),
        None => BlockRead::Corrupt,
    }
}

fn payload_crc(data: &[u8]) -> u32 {
    if data.is_empty() {
        0
    } else {
        CRC32.checksum(data)
    }
}
