//! # blockdb - Embedded Voxel Block Store
//!
//! blockdb is an embedded, single-process key-value store for voxel
//! world servers: variable-sized block payloads (typically compressed
//! chunks of up to tens of kilobytes) keyed by a signed 16-bit
//! `(x, y, z)` coordinate, written and read many thousands of times per
//! second and flushed durably on demand.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blockdb::{BlockStore, BlockPos, BlockRead, CacheMode, block_as_integer};
//!
//! let store = BlockStore::open("./world", "mapdb_{}", CacheMode::Cache)?;
//!
//! let key = block_as_integer(BlockPos::new(1, 0, 0));
//! store.save_block_modified(key, b"compressed chunk bytes")?;
//!
//! match store.load_block(key)? {
//!     BlockRead::Block(data) => println!("{} bytes", data.len()),
//!     BlockRead::Absent => println!("never saved"),
//!     BlockRead::Corrupt => println!("failed validation"),
//! }
//!
//! store.force_flush()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Public API (BlockStore)           │
//! ├──────────────────────────────────────────────┤
//! │  Write-absorbing map │ Routing │ Counters    │
//! ├──────────────────────────────────────────────┤
//! │         Partition[0..10)  (one mutex each)   │
//! ├──────────────────────┬───────────────────────┤
//! │  FIFO read cache     │  Slot-indexed files   │
//! │  (slab + 2 FIFOs)    │  (data + mmap'd meta) │
//! └──────────────────────┴───────────────────────┘
//! ```
//!
//! A coordinate is routed to partition `|x| % 10`; inside a partition
//! the remaining coordinate bits select one of ~1.5M fixed slots, each
//! backed by a variable-capacity 1 KiB-aligned extent in the data file.
//! The slot table lives in a memory-mapped header, giving O(1)
//! coordinate → extent lookup with per-slot integrity and change flags.
//!
//! ## File Layout
//!
//! ```text
//! world/
//! ├── mapdb_0        # partition 0 data (record extents)
//! ├── mapdb_0meta    # partition 0 slot table (mmap'd)
//! ├── ...
//! ├── mapdb_9
//! └── mapdb_9meta
//! ```
//!
//! ## Module Overview
//!
//! - [`store`]: the engine — routing, write absorption, counters
//! - [`partition`]: per-shard save/load/delete and durability
//! - [`cache`]: slab-allocated FIFO read cache
//! - [`storage`]: packed on-disk layout, positional I/O, mmap
//! - [`coord`]: coordinate codecs and slot packing
//! - [`config`]: compile-time tunables

#[macro_use]
mod macros;

pub mod cache;
pub mod config;
pub mod coord;
pub mod partition;
pub mod storage;
pub mod store;

pub use coord::{block_as_integer, integer_as_block, BlockPos};
pub use partition::{BlockRead, CacheMode, LoadedBlock, Partition};
pub use store::{BlockStore, Command, CommandKind, SyncState};
