//! # Block Store
//!
//! The engine object: it owns the ten partitions, routes every operation
//! by `|x| % PARTITION_COUNT`, and fronts the partitions with a
//! process-wide write-absorbing layer.
//!
//! ## Two Cache Tiers
//!
//! ```text
//! Client ──► BlockStore
//!              ├── absorbed writes (seq → command, key → latest value)
//!              └── Partition[0..10)
//!                     ├── data file (record extents)
//!                     ├── meta file (mmap'd slot table)
//!                     └── FIFO read cache
//! ```
//!
//! A load first consults the absorbed values (tier 1 — gives
//! read-your-writes for queued commands), then the owning partition,
//! whose in-memory resolutions count as tier 2. The hit counters feed
//! the periodic [`BlockStore::log_hit_rate`] report.
//!
//! ## Draining
//!
//! Queued commands (`process_set_command` / `process_delete_command`)
//! are meant to be drained by the host — typically a worker thread that
//! applies them through the direct operations and then retires the
//! absorbed values. [`BlockStore::drain`] is a synchronous rendition of
//! that cycle for hosts without a worker; `check_flush` and
//! `force_flush` observe and wait on the same state either way.
//!
//! ## Concurrency
//!
//! Partition mutexes serialize operations per shard; the absorbing map
//! and the pending queues each sit behind their own short-held mutex.
//! Counters are atomics. No ordering is promised across partitions.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::{
    FORCE_FLUSH_MAX_POLLS, FORCE_FLUSH_POLL_MS, FORCE_FLUSH_SETTLE_MS, HIT_RATE_INTERVAL_SECS,
    PARTITION_COUNT,
};
use crate::coord::{block_as_integer, integer_as_block, partition_of, BlockPos};
use crate::partition::{BlockRead, CacheMode, Partition};
use crate::storage::unix_timestamp;

/// A queued mutation, keyed by a host-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub map_id: i32,
    pub seq: i64,
    pub key: i64,
    pub val: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Set,
    Delete,
}

/// Host-visible sync marker carried by the store (set externally, e.g.
/// by a periodic sync-out job watching the modify list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NeedSync,
    Synced,
}

#[derive(Default)]
struct AbsorbedWrites {
    commands: BTreeMap<i64, Command>,
    values: HashMap<i64, Vec<u8>>,
}

pub struct BlockStore {
    savedir: PathBuf,
    partitions: Vec<Partition>,

    absorbed: Mutex<AbsorbedWrites>,
    pending: Mutex<Vec<VecDeque<Command>>>,

    total_loads: AtomicI64,
    cache1_hits: AtomicI64,
    cache2_hits: AtomicI64,
    tps_reads: AtomicI64,
    tps_writes: AtomicI64,
    last_tps_reset: AtomicI64,

    state: Mutex<SyncState>,
    config_id: AtomicI32,
    create_time: i64,
}

impl BlockStore {
    /// Opens the store under `savedir`. `file_template` names the
    /// per-partition files with a `{}` placeholder for the partition
    /// index, e.g. `"mapdb_{}"` producing `mapdb_0` / `mapdb_0meta`
    /// through `mapdb_9` / `mapdb_9meta`.
    pub fn open<P: AsRef<Path>>(
        savedir: P,
        file_template: &str,
        cache_mode: CacheMode,
    ) -> Result<Self> {
        ensure!(
            file_template.contains("{}"),
            "file template '{}' has no partition index placeholder",
            file_template
        );

        let savedir = savedir.as_ref().to_path_buf();
        let mut partitions = Vec::with_capacity(PARTITION_COUNT);
        for i in 0..PARTITION_COUNT {
            let file_name = file_template.replace("{}", &i.to_string());
            partitions.push(Partition::open(&savedir, &file_name, i, cache_mode)?);
        }

        Ok(Self {
            savedir,
            partitions,
            absorbed: Mutex::new(AbsorbedWrites::default()),
            pending: Mutex::new(vec![VecDeque::new(); PARTITION_COUNT]),
            total_loads: AtomicI64::new(0),
            cache1_hits: AtomicI64::new(0),
            cache2_hits: AtomicI64::new(0),
            tps_reads: AtomicI64::new(0),
            tps_writes: AtomicI64::new(0),
            last_tps_reset: AtomicI64::new(0),
            state: Mutex::new(SyncState::NeedSync),
            config_id: AtomicI32::new(-1),
            create_time: unix_timestamp() as i64,
        })
    }

    pub fn savedir(&self) -> &Path {
        &self.savedir
    }

    fn partition_for(&self, x: i16) -> &Partition {
        &self.partitions[partition_of(x)]
    }

    /// Loads a block by its global key: absorbed values first, then the
    /// owning partition.
    pub fn load_block(&self, key: i64) -> Result<BlockRead> {
        self.tps_reads.fetch_add(1, Ordering::Relaxed);
        self.total_loads.fetch_add(1, Ordering::Relaxed);

        {
            let absorbed = self.absorbed.lock();
            if !absorbed.values.is_empty() {
                if let Some(value) = absorbed.values.get(&key) {
                    self.cache1_hits.fetch_add(1, Ordering::Relaxed);
                    // An absorbed delete is stored as an empty value.
                    return Ok(if value.is_empty() {
                        BlockRead::Absent
                    } else {
                        BlockRead::Block(value.clone())
                    });
                }
            }
        }

        let pos = integer_as_block(key);
        let loaded = self.partition_for(pos.x).load_block(pos.x, pos.y, pos.z)?;
        if loaded.cache_hit {
            self.cache2_hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(loaded.payload)
    }

    /// Saves synchronously, bypassing the absorbing layer.
    pub fn direct_save_block(&self, key: i64, data: &[u8], changed: bool) -> Result<()> {
        let pos = integer_as_block(key);
        self.partition_for(pos.x)
            .save_block(pos.x, pos.y, pos.z, data, changed)
    }

    /// Deletes synchronously, bypassing the absorbing layer.
    pub fn direct_delete_block(&self, key: i64) -> Result<()> {
        let pos = integer_as_block(key);
        self.partition_for(pos.x).delete_block(pos.x, pos.y, pos.z)
    }

    /// Loads synchronously together with the slot's modified flag.
    pub fn direct_load_block(&self, key: i64) -> Result<(BlockRead, bool)> {
        let pos = integer_as_block(key);
        let (loaded, modified) = self.partition_for(pos.x).direct_load(pos.x, pos.y, pos.z)?;
        Ok((loaded.payload, modified))
    }

    /// World-generator save path: persists without marking the slot
    /// modified.
    pub fn save_block(&self, pos: BlockPos, data: &[u8]) -> Result<()> {
        self.direct_save_block(block_as_integer(pos), data, false)
    }

    /// Gameplay save path: persists and marks the slot modified so it
    /// shows up in the modify list.
    pub fn save_block_modified(&self, key: i64, data: &[u8]) -> Result<()> {
        self.direct_save_block(key, data, true)
    }

    pub fn delete_block(&self, pos: BlockPos) -> Result<()> {
        self.direct_delete_block(block_as_integer(pos))
    }

    /// Queues a set for the drain worker and absorbs its value for
    /// read-your-writes.
    pub fn process_set_command(&self, command: Command) {
        self.tps_writes.fetch_add(1, Ordering::Relaxed);
        let mut absorbed = self.absorbed.lock();
        absorbed.values.insert(command.key, command.val.clone());
        absorbed.commands.insert(command.seq, command);
    }

    /// Queues a delete; the absorbed value becomes empty so loads see
    /// the deletion immediately.
    pub fn process_delete_command(&self, command: Command) {
        self.tps_writes.fetch_add(1, Ordering::Relaxed);
        let mut absorbed = self.absorbed.lock();
        absorbed.values.insert(command.key, Vec::new());
        absorbed.commands.insert(command.seq, command);
    }

    /// True when nothing is queued: no absorbed commands and no pending
    /// per-partition work.
    pub fn check_flush(&self) -> bool {
        if !self.absorbed.lock().commands.is_empty() {
            return false;
        }
        self.pending.lock().iter().all(|queue| queue.is_empty())
    }

    /// Waits (bounded) for the drain side to empty the command queue,
    /// then flushes every partition.
    pub fn force_flush(&self) -> Result<()> {
        let mut polls = 0;
        while polls < FORCE_FLUSH_MAX_POLLS {
            if self.absorbed.lock().commands.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(FORCE_FLUSH_POLL_MS));
            polls += 1;
        }

        std::thread::sleep(std::time::Duration::from_millis(FORCE_FLUSH_SETTLE_MS));

        if polls == FORCE_FLUSH_MAX_POLLS {
            let left = self.absorbed.lock().commands.len();
            tracing::error!(left, "force flush proceeding with commands still queued");
        }

        self.flush_all()
    }

    /// Synchronous drain cycle: moves queued commands into the
    /// per-partition pending queues, applies them via the direct
    /// operations, and retires absorbed values that are still current.
    /// Returns the number of commands applied.
    pub fn drain(&self) -> Result<usize> {
        let commands: Vec<Command> = {
            let mut absorbed = self.absorbed.lock();
            std::mem::take(&mut absorbed.commands).into_values().collect()
        };

        {
            let mut pending = self.pending.lock();
            for command in commands {
                let pos = integer_as_block(command.key);
                pending[partition_of(pos.x)].push_back(command);
            }
        }

        let mut applied = 0;
        for index in 0..PARTITION_COUNT {
            loop {
                let command = self.pending.lock()[index].pop_front();
                let Some(command) = command else {
                    break;
                };

                match command.kind {
                    CommandKind::Set => {
                        self.direct_save_block(command.key, &command.val, true)?;
                    }
                    CommandKind::Delete => self.direct_delete_block(command.key)?,
                }

                // Retire the absorbed value only while it still matches;
                // a newer queued write must keep winning loads.
                let mut absorbed = self.absorbed.lock();
                let current = absorbed.values.get(&command.key);
                let retire = match command.kind {
                    CommandKind::Set => current.is_some_and(|v| *v == command.val),
                    CommandKind::Delete => current.is_some_and(|v| v.is_empty()),
                };
                if retire {
                    absorbed.values.remove(&command.key);
                }
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Global keys of every slot saved with `changed = true` and not
    /// since deleted or synced out.
    pub fn modify_list(&self) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        for partition in &self.partitions {
            partition.modify_list(&mut out)?;
        }
        Ok(out)
    }

    /// Global keys of every non-empty slot.
    pub fn loadable_blocks(&self) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        for partition in &self.partitions {
            partition.loadable_list(&mut out)?;
        }
        Ok(out)
    }

    /// (cached slot count, cached payload bytes) summed over partitions.
    pub fn cache_summary(&self) -> (u32, usize) {
        let mut count = 0u32;
        let mut bytes = 0usize;
        for partition in &self.partitions {
            let (c, b) = partition.cache_summary();
            count += c;
            bytes += b;
        }
        (count, bytes)
    }

    /// Total non-empty slots across partitions.
    pub fn block_count(&self) -> Result<i64> {
        let mut total = 0i64;
        for partition in &self.partitions {
            total += partition.block_count()? as i64;
        }
        Ok(total)
    }

    /// Flushes every partition durably.
    pub fn flush_all(&self) -> Result<()> {
        for partition in &self.partitions {
            partition.flush()?;
        }
        Ok(())
    }

    /// Releases caches and flushes everything; call before drop for
    /// checked shutdown durability.
    pub fn close(&self) -> Result<()> {
        for partition in &self.partitions {
            partition.close()?;
        }
        Ok(())
    }

    /// Periodic observability dump. No-op until the report interval has
    /// elapsed; logging resets the TPS window.
    pub fn log_hit_rate(&self) {
        let now = unix_timestamp() as i64;
        let last = self.last_tps_reset.load(Ordering::Relaxed);
        let elapsed = now - last;
        if elapsed < HIT_RATE_INTERVAL_SECS {
            return;
        }

        let total_loads = self.total_loads.load(Ordering::Relaxed);
        let cache1 = self.cache1_hits.load(Ordering::Relaxed);
        let cache2 = self.cache2_hits.load(Ordering::Relaxed);
        let hit_ratio = if total_loads != 0 {
            (cache1 + cache2) as f64 * 100.0 / total_loads as f64
        } else {
            0.0
        };
        let (cache_count, cache_bytes) = self.cache_summary();

        tracing::info!(
            config_id = self.config_id.load(Ordering::Relaxed),
            tps_write = self.tps_writes.load(Ordering::Relaxed) / elapsed.max(1),
            tps_read = self.tps_reads.load(Ordering::Relaxed) / elapsed.max(1),
            total_loads,
            cache1_hits = cache1,
            cache2_hits = cache2,
            hit_ratio,
            cache_count,
            cache_bytes,
            "block store hit rate"
        );

        self.tps_reads.store(0, Ordering::Relaxed);
        self.tps_writes.store(0, Ordering::Relaxed);
        self.last_tps_reset.store(now, Ordering::Relaxed);
    }

    pub fn total_load_count(&self) -> i64 {
        self.total_loads.load(Ordering::Relaxed)
    }

    pub fn cache1_hit_count(&self) -> i64 {
        self.cache1_hits.load(Ordering::Relaxed)
    }

    pub fn cache2_hit_count(&self) -> i64 {
        self.cache2_hits.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SyncState) {
        *self.state.lock() = state;
    }

    pub fn config_id(&self) -> i32 {
        self.config_id.load(Ordering::Relaxed)
    }

    pub fn set_config_id(&self, id: i32) {
        self.config_id.store(id, Ordering::Relaxed);
    }

    pub fn create_time(&self) -> i64 {
        self.create_time
    }
}
