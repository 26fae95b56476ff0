//! # Memory-Mapped Slot Table
//!
//! The meta file's first `VALUE_OFFSET` bytes hold the `PartitionHeader`
//! and the fixed `KeyNode` slot table. This module maps that prefix
//! read-write and hands out typed references into it; every slot-table
//! mutation is a store through the mapping, made durable by `sync()`
//! (`msync(MS_SYNC)`).
//!
//! ## Initialization
//!
//! A zero-length file is extended to `VALUE_OFFSET` zero bytes and
//! stamped with the current format version. An existing file must carry
//! that version or opening fails — there is no migration path.
//!
//! ## Safety Considerations
//!
//! The mapping is `MAP_SHARED`, so the region behaves like shared memory
//! with the OS page cache: stores become visible to the file immediately
//! and survive process exit once synced. The mapping is never grown or
//! remapped — its length is the compile-time `VALUE_OFFSET` — so typed
//! references cannot dangle; the borrow checker ties them to `&self`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use zerocopy::FromBytes;

use crate::config::{KEY_NODE_SIZE, MAX_NODE, PARTITION_HEADER_SIZE, VALUE_OFFSET};
use crate::storage::headers::{KeyNode, PartitionHeader};

pub struct MetaFile {
    file: std::fs::File,
    mmap: MmapMut,
    path: PathBuf,
}

impl MetaFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open meta file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        let is_new = file_size == 0;
        if is_new {
            file.set_len(VALUE_OFFSET as u64).wrap_err_with(|| {
                format!(
                    "failed to extend '{}' to {} bytes",
                    path.display(),
                    VALUE_OFFSET
                )
            })?;
        } else {
            ensure!(
                file_size >= VALUE_OFFSET as u64,
                "meta file '{}' is truncated: {} < {}",
                path.display(),
                file_size,
                VALUE_OFFSET
            );
        }

        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // mappings can produce undefined behavior. This is safe because:
        // 1. The partition owns both files for its whole lifetime; no
        //    other process is expected to write them
        // 2. The mapping length is exactly VALUE_OFFSET, which the file
        //    covers (extended above for fresh files, checked otherwise)
        // 3. The mapping is never remapped, so references handed out by
        //    header()/node() stay valid for the MetaFile lifetime
        let mmap = unsafe {
            MmapOptions::new()
                .len(VALUE_OFFSET)
                .map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let mut meta = Self { file, mmap, path };
        if is_new {
            tracing::info!(path = %meta.path.display(), "initializing fresh meta file");
            meta.header_mut()?.init();
        } else {
            meta.header()?.check_version().wrap_err_with(|| {
                format!("meta file '{}' has unsupported format", meta.path.display())
            })?;
        }
        Ok(meta)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn header(&self) -> Result<&PartitionHeader> {
        PartitionHeader::ref_from_bytes(&self.mmap[..PARTITION_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PartitionHeader: {:?}", e))
    }

    #[inline]
    pub fn header_mut(&mut self) -> Result<&mut PartitionHeader> {
        PartitionHeader::mut_from_bytes(&mut self.mmap[..PARTITION_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PartitionHeader: {:?}", e))
    }

    #[inline]
    pub fn node(&self, slot: u32) -> Result<&KeyNode> {
        debug_assert!((slot as usize) < MAX_NODE);
        let start = PARTITION_HEADER_SIZE + slot as usize * KEY_NODE_SIZE;
        KeyNode::ref_from_bytes(&self.mmap[start..start + KEY_NODE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse KeyNode {}: {:?}", slot, e))
    }

    #[inline]
    pub fn node_mut(&mut self, slot: u32) -> Result<&mut KeyNode> {
        debug_assert!((slot as usize) < MAX_NODE);
        let start = PARTITION_HEADER_SIZE + slot as usize * KEY_NODE_SIZE;
        KeyNode::mut_from_bytes(&mut self.mmap[start..start + KEY_NODE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse KeyNode {}: {:?}", slot, e))
    }

    /// msync(MS_SYNC) over the mapped region.
    pub fn sync(&self) -> Result<()> {
        self.mmap
            .flush()
            .wrap_err_with(|| format!("msync failed for '{}'", self.path.display()))
    }

    /// Keeps the file handle alive alongside the mapping.
    pub fn file(&self) -> &std::fs::File {
        &self.file
    }
}

impl Drop for MetaFile {
    fn drop(&mut self) {
        // Shutdown durability; errors here have no caller to reach.
        let _ = self.mmap.flush();
    }
}
