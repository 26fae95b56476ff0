//! # Block Store Integration Tests
//!
//! Engine-level behavior: routing across partitions, the write-absorbing
//! layer and its read-your-writes guarantee, the drain cycle, flush
//! observers, counters, and concurrent access.

use blockdb::{
    block_as_integer, BlockPos, BlockRead, BlockStore, CacheMode, Command, CommandKind, SyncState,
};
use tempfile::tempdir;

fn key(x: i16, y: i16, z: i16) -> i64 {
    block_as_integer(BlockPos::new(x, y, z))
}

fn set_command(seq: i64, key: i64, val: &[u8]) -> Command {
    Command {
        kind: CommandKind::Set,
        map_id: 0,
        seq,
        key,
        val: val.to_vec(),
    }
}

fn delete_command(seq: i64, key: i64) -> Command {
    Command {
        kind: CommandKind::Delete,
        map_id: 0,
        seq,
        key,
        val: Vec::new(),
    }
}

mod open {
    use super::*;

    #[test]
    fn open_creates_all_partition_files() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        for i in 0..10 {
            assert!(dir.path().join(format!("mapdb_{i}")).exists());
            assert!(dir.path().join(format!("mapdb_{i}meta")).exists());
        }
        assert_eq!(store.block_count().unwrap(), 0);
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(BlockStore::open(dir.path(), "mapdb", CacheMode::Cache).is_err());
    }

    #[test]
    fn fresh_store_loads_nothing() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        assert_eq!(store.load_block(key(0, 0, 0)).unwrap(), BlockRead::Absent);
        assert_eq!(store.total_load_count(), 1);
    }
}

mod routing {
    use super::*;

    #[test]
    fn same_partition_distinct_slots_round_trip() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        // |10| % 10 == |20| % 10 == 0: both land in partition 0.
        store.save_block_modified(key(10, 0, 0), b"a").unwrap();
        store.save_block_modified(key(20, 0, 0), b"b").unwrap();

        assert_eq!(
            store.load_block(key(10, 0, 0)).unwrap(),
            BlockRead::Block(b"a".to_vec())
        );
        assert_eq!(
            store.load_block(key(20, 0, 0)).unwrap(),
            BlockRead::Block(b"b".to_vec())
        );

        let len = std::fs::metadata(dir.path().join("mapdb_0")).unwrap().len();
        assert_eq!(len, 2048, "both extents live in partition 0's file");
    }

    #[test]
    fn blocks_spread_across_partitions() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        for x in 0..10i16 {
            store
                .save_block_modified(key(x, 0, 0), format!("block-{x}").as_bytes())
                .unwrap();
        }

        for x in 0..10i16 {
            let len = std::fs::metadata(dir.path().join(format!("mapdb_{x}")))
                .unwrap()
                .len();
            assert_eq!(len, 1024, "partition {x} holds exactly one extent");
        }
        assert_eq!(store.block_count().unwrap(), 10);
    }

    #[test]
    fn negative_x_routes_but_rejects_at_the_slot_level() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.save_block_modified(key(-7, 0, 0), b"nope").unwrap();
        assert_eq!(store.block_count().unwrap(), 0);
        assert_eq!(store.load_block(key(-7, 0, 0)).unwrap(), BlockRead::Absent);
    }
}

mod persistence {
    use super::*;

    #[test]
    fn blocks_survive_close_and_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
            store.save_block_modified(key(1, 0, 0), b"hello").unwrap();
            store.save_block(BlockPos::new(2, 1, 3), b"generated").unwrap();
            store.close().unwrap();
        }

        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
        assert_eq!(
            store.load_block(key(1, 0, 0)).unwrap(),
            BlockRead::Block(b"hello".to_vec())
        );
        assert_eq!(
            store.load_block(key(2, 1, 3)).unwrap(),
            BlockRead::Block(b"generated".to_vec())
        );
        assert_eq!(store.block_count().unwrap(), 2);

        // Only the gameplay save was marked modified.
        assert_eq!(store.modify_list().unwrap(), vec![key(1, 0, 0)]);
    }

    #[test]
    fn deleted_blocks_stay_deleted_after_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
            store.save_block_modified(key(1, 0, 0), b"doomed").unwrap();
            store.delete_block(BlockPos::new(1, 0, 0)).unwrap();
            store.close().unwrap();
        }

        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
        assert_eq!(store.load_block(key(1, 0, 0)).unwrap(), BlockRead::Absent);
        assert_eq!(store.block_count().unwrap(), 0);
        assert!(store.modify_list().unwrap().is_empty());
    }
}

mod absorbed_writes {
    use super::*;

    #[test]
    fn queued_set_is_visible_before_draining() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.process_set_command(set_command(1, key(5, 0, 0), b"queued"));

        assert_eq!(
            store.load_block(key(5, 0, 0)).unwrap(),
            BlockRead::Block(b"queued".to_vec())
        );
        assert_eq!(store.cache1_hit_count(), 1);
        assert_eq!(store.block_count().unwrap(), 0, "nothing reached disk yet");
    }

    #[test]
    fn queued_delete_hides_a_saved_block() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.save_block_modified(key(5, 0, 0), b"on-disk").unwrap();
        store.process_delete_command(delete_command(1, key(5, 0, 0)));

        assert_eq!(store.load_block(key(5, 0, 0)).unwrap(), BlockRead::Absent);
        assert_eq!(store.cache1_hit_count(), 1);
    }

    #[test]
    fn drain_applies_commands_in_sequence_order() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        let k = key(5, 0, 0);
        store.process_set_command(set_command(2, k, b"newer"));
        store.process_set_command(set_command(1, k, b"older"));

        assert!(!store.check_flush());
        let applied = store.drain().unwrap();
        assert_eq!(applied, 2);
        assert!(store.check_flush());

        // seq 2 was applied last; its value also won the absorbed map.
        assert_eq!(
            store.load_block(k).unwrap(),
            BlockRead::Block(b"newer".to_vec())
        );
    }

    #[test]
    fn drain_persists_sets_and_deletes() {
        let dir = tempdir().unwrap();

        {
            let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
            store.process_set_command(set_command(1, key(3, 0, 0), b"kept"));
            store.process_set_command(set_command(2, key(4, 0, 0), b"dropped"));
            store.process_delete_command(delete_command(3, key(4, 0, 0)));
            assert_eq!(store.drain().unwrap(), 3);
            store.close().unwrap();
        }

        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
        assert_eq!(
            store.load_block(key(3, 0, 0)).unwrap(),
            BlockRead::Block(b"kept".to_vec())
        );
        assert_eq!(store.load_block(key(4, 0, 0)).unwrap(), BlockRead::Absent);

        // Drained sets are modifications.
        assert_eq!(store.modify_list().unwrap(), vec![key(3, 0, 0)]);
    }

    #[test]
    fn drained_values_stop_counting_as_tier1_hits() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        let k = key(5, 0, 0);
        store.process_set_command(set_command(1, k, b"value"));
        store.drain().unwrap();

        assert_eq!(store.load_block(k).unwrap(), BlockRead::Block(b"value".to_vec()));
        assert_eq!(store.cache1_hit_count(), 0);
        assert_eq!(store.cache2_hit_count(), 1, "served by the partition cache");
    }

    #[test]
    fn check_flush_sees_the_empty_store_as_flushed() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
        assert!(store.check_flush());
    }

    #[test]
    fn force_flush_settles_and_syncs() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.process_set_command(set_command(1, key(1, 0, 0), b"queued"));
        store.drain().unwrap();
        store.force_flush().unwrap();
        assert!(store.check_flush());
    }
}

mod direct_interface {
    use super::*;

    #[test]
    fn direct_load_reports_the_modified_flag() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.direct_save_block(key(1, 0, 0), b"changed", true).unwrap();
        store.direct_save_block(key(2, 0, 0), b"clean", false).unwrap();

        let (payload, modified) = store.direct_load_block(key(1, 0, 0)).unwrap();
        assert_eq!(payload, BlockRead::Block(b"changed".to_vec()));
        assert!(modified);

        let (payload, modified) = store.direct_load_block(key(2, 0, 0)).unwrap();
        assert_eq!(payload, BlockRead::Block(b"clean".to_vec()));
        assert!(!modified);
    }

    #[test]
    fn direct_interface_bypasses_the_absorbing_layer() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        let k = key(1, 0, 0);
        store.process_set_command(set_command(1, k, b"absorbed"));
        store.direct_save_block(k, b"direct", false).unwrap();

        // The absorbed value still wins loads until the queue drains.
        assert_eq!(store.load_block(k).unwrap(), BlockRead::Block(b"absorbed".to_vec()));

        let (payload, _) = store.direct_load_block(k).unwrap();
        assert_eq!(payload, BlockRead::Block(b"direct".to_vec()));
    }
}

mod counters {
    use super::*;

    #[test]
    fn load_counters_split_by_tier() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.save_block_modified(key(1, 0, 0), b"x").unwrap();

        store.load_block(key(1, 0, 0)).unwrap(); // partition cache
        store.process_set_command(set_command(1, key(2, 0, 0), b"y"));
        store.load_block(key(2, 0, 0)).unwrap(); // absorbed value
        store.load_block(key(3, 0, 0)).unwrap(); // absent (in-memory)

        assert_eq!(store.total_load_count(), 3);
        assert_eq!(store.cache1_hit_count(), 1);
        assert_eq!(store.cache2_hit_count(), 2, "cache hit plus empty-slot hit");
    }

    #[test]
    fn cache_summary_tracks_cached_payload() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        store.save_block_modified(key(1, 0, 0), &[1u8; 100]).unwrap();
        store.save_block_modified(key(2, 0, 0), &[2u8; 200]).unwrap();

        let (count, bytes) = store.cache_summary();
        assert_eq!(count, 2);
        assert_eq!(bytes, 300);
    }

    #[test]
    fn log_hit_rate_is_callable() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();
        store.save_block_modified(key(1, 0, 0), b"x").unwrap();
        store.load_block(key(1, 0, 0)).unwrap();
        store.log_hit_rate();
    }

    #[test]
    fn state_and_config_accessors() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap();

        assert_eq!(store.state(), SyncState::NeedSync);
        store.set_state(SyncState::Synced);
        assert_eq!(store.state(), SyncState::Synced);

        assert_eq!(store.config_id(), -1);
        store.set_config_id(7);
        assert_eq!(store.config_id(), 7);

        assert!(store.create_time() > 0);
    }
}

mod concurrency {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn disjoint_partitions_write_in_parallel() {
        let dir = tempdir().unwrap();
        let store =
            Arc::new(BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap());

        std::thread::scope(|scope| {
            for x in 0..8i16 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for z in 0..32i16 {
                        let payload = format!("block-{x}-{z}");
                        store
                            .save_block_modified(key(x, 0, z), payload.as_bytes())
                            .unwrap();
                    }
                });
            }
        });

        for x in 0..8i16 {
            for z in 0..32i16 {
                let expected = format!("block-{x}-{z}");
                assert_eq!(
                    store.load_block(key(x, 0, z)).unwrap(),
                    BlockRead::Block(expected.into_bytes())
                );
            }
        }
        assert_eq!(store.block_count().unwrap(), 8 * 32);
    }

    #[test]
    fn same_partition_operations_serialize() {
        let dir = tempdir().unwrap();
        let store =
            Arc::new(BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap());

        // All writers hammer partition 0 on distinct slots plus one
        // shared slot.
        std::thread::scope(|scope| {
            for t in 0..4i16 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for round in 0..16i16 {
                        store
                            .save_block_modified(key(10, 0, t), format!("own-{t}-{round}").as_bytes())
                            .unwrap();
                        store
                            .save_block_modified(key(10, 0, 100), format!("shared-{t}").as_bytes())
                            .unwrap();
                        store.load_block(key(10, 0, 100)).unwrap();
                    }
                });
            }
        });

        for t in 0..4i16 {
            assert_eq!(
                store.load_block(key(10, 0, t)).unwrap(),
                BlockRead::Block(format!("own-{t}-15").into_bytes())
            );
        }

        // The shared slot holds whichever writer came last; it must be
        // one of the four values, intact.
        let shared = store.load_block(key(10, 0, 100)).unwrap();
        let bytes = match shared {
            BlockRead::Block(data) => data,
            other => panic!("expected a block, got {:?}", other),
        };
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("shared-"), "torn value: {text}");
    }

    #[test]
    fn concurrent_queue_and_drain_converge() {
        let dir = tempdir().unwrap();
        let store =
            Arc::new(BlockStore::open(dir.path(), "mapdb_{}", CacheMode::Cache).unwrap());

        std::thread::scope(|scope| {
            let producer = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..64i64 {
                    let k = key((i % 8) as i16, 0, (i / 8) as i16);
                    producer.process_set_command(set_command(i, k, format!("v{i}").as_bytes()));
                }
            });
            let drainer = Arc::clone(&store);
            scope.spawn(move || {
                for _ in 0..8 {
                    drainer.drain().unwrap();
                    std::thread::yield_now();
                }
            });
        });

        store.drain().unwrap();
        assert!(store.check_flush());

        // Every key holds the highest-sequence value written to it.
        for x in 0..8i16 {
            for z in 0..8i16 {
                let i = z as i64 * 8 + x as i64;
                assert_eq!(
                    store.load_block(key(x, 0, z)).unwrap(),
                    BlockRead::Block(format!("v{i}").into_bytes())
                );
            }
        }
    }
}
