use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use bcache::{BSIZE, BlockId, BufferCache};
use test_support::mock::arch::{init_mock_arch, set_cpu_id};
use test_support::mock::device::MockDisk;

const DEV: u32 = 1;

fn setup(nbuf: usize, nshards: usize, blocks: usize) -> (BufferCache, Arc<MockDisk>) {
    init_mock_arch();
    let cache = BufferCache::new(nbuf, nshards);
    let disk = MockDisk::new(blocks, BSIZE);
    cache.register_device(DEV, disk.clone());
    (cache, disk)
}

fn ids_in(cache: &BufferCache, shard: usize) -> Vec<Option<BlockId>> {
    cache.shard_snapshot(shard).iter().map(|b| b.id).collect()
}

#[test]
fn test_buffers_spread_round_robin() {
    let (cache, _disk) = setup(30, 7, 8);
    assert_eq!(cache.nbuf(), 30);
    let sizes: Vec<usize> = (0..7).map(|s| cache.shard_snapshot(s).len()).collect();
    assert_eq!(sizes, [5, 5, 4, 4, 4, 4, 4]);
    assert!(cache.shard_snapshot(0).iter().all(|b| b.id.is_none() && b.refcnt == 0));
}

#[test]
fn test_shard_of_hash() {
    let (cache, _disk) = setup(30, 7, 8);
    assert_eq!(cache.shard_of(1, 1), 2);
    assert_eq!(cache.shard_of(1, 13), 0);
    assert_eq!(cache.shard_of(3, 4), 0);
    assert_eq!(cache.shard_of(4, 3), 0);
    for blockno in 0..64 {
        assert!(cache.shard_of(DEV, blockno) < cache.nshards());
    }
}

#[test]
fn test_read_miss_then_hit() {
    let (cache, disk) = setup(4, 1, 8);

    let buf = cache.read(DEV, 3);
    assert!(buf.is_valid());
    assert_eq!(buf.block_id(), BlockId::new(DEV, 3));
    drop(buf);
    assert_eq!(disk.reads(), 1);

    let buf = cache.read(DEV, 3);
    assert!(buf.is_valid());
    buf.release();
    assert_eq!(disk.reads(), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.disk_reads, 1);
}

#[test]
fn test_get_does_not_read_disk() {
    let (cache, disk) = setup(2, 1, 8);
    let mut buf = cache.get(DEV, 5);
    assert!(!buf.is_valid());
    buf.data_mut().fill(0x42);
    buf.write();
    drop(buf);
    assert_eq!(disk.reads(), 0);
    assert_eq!(disk.writes(), 1);

    // 写回并不让缓冲区变为有效，下一次 read 仍会读盘
    let buf = cache.read(DEV, 5);
    assert_eq!(disk.reads(), 1);
    assert!(buf.data().iter().all(|&b| b == 0x42));
}

#[test]
fn test_write_persists_across_caches() {
    let (cache, disk) = setup(4, 2, 8);
    {
        let mut buf = cache.read(DEV, 6);
        buf.data_mut()[..5].copy_from_slice(b"hello");
        buf.write();
    }
    assert_eq!(&disk.ram_disk().raw_data()[6 * BSIZE..6 * BSIZE + 5], b"hello");

    let other = BufferCache::new(4, 2);
    other.register_device(DEV, MockDisk::wrap(disk.ram_disk().clone()));
    let buf = other.read(DEV, 6);
    assert_eq!(&buf.data()[..5], b"hello");
    assert!(buf.data()[5..].iter().all(|&b| b == 0));
}

#[test]
fn test_lru_recycles_least_recent() {
    let (cache, disk) = setup(3, 1, 8);
    for blockno in [1, 2, 3] {
        cache.read(DEV, blockno).release();
    }
    assert_eq!(
        ids_in(&cache, 0),
        [
            Some(BlockId::new(DEV, 3)),
            Some(BlockId::new(DEV, 2)),
            Some(BlockId::new(DEV, 1)),
        ]
    );

    // 块 1 最久未用，被块 4 顶替
    cache.read(DEV, 4).release();
    let ids = ids_in(&cache, 0);
    assert!(!ids.contains(&Some(BlockId::new(DEV, 1))));
    assert_eq!(ids[0], Some(BlockId::new(DEV, 4)));
    assert_eq!(disk.reads(), 4);

    cache.read(DEV, 2).release();
    assert_eq!(disk.reads(), 4);
    cache.read(DEV, 1).release();
    assert_eq!(disk.reads(), 5);
}

#[test]
fn test_evictions_follow_release_order() {
    let (cache, _disk) = setup(3, 1, 16);
    for blockno in [1, 2, 3] {
        cache.read(DEV, blockno).release();
    }

    let mut evicted = Vec::new();
    for blockno in [4, 5, 6] {
        let before = ids_in(&cache, 0);
        cache.read(DEV, blockno).release();
        let after = ids_in(&cache, 0);
        evicted.extend(
            before
                .into_iter()
                .flatten()
                .filter(|id| !after.contains(&Some(*id)))
                .map(|id| id.blockno),
        );
    }
    assert_eq!(evicted, [1, 2, 3]);
}

#[test]
fn test_hit_takes_only_home_shard_lock() {
    let (cache, _disk) = setup(7, 7, 16);
    cache.read(DEV, 1).release();

    let home = cache.shard_of(DEV, 1);
    let before: Vec<usize> = (0..7).map(|s| cache.shard_lock_stats(s).acquires).collect();
    let evicts = cache.evict_lock_stats().acquires;

    cache.read(DEV, 1).release();

    // 一次查找加一次释放
    for (shard, acquires) in before.into_iter().enumerate() {
        let expected = if shard == home { acquires + 2 } else { acquires };
        assert_eq!(cache.shard_lock_stats(shard).acquires, expected);
    }
    assert_eq!(cache.evict_lock_stats().acquires, evicts);
    assert_eq!(cache.shard_lock_stats(home).name, "bcache.shard");
    assert_eq!(cache.evict_lock_stats().name, "bcache.evict");
}

#[test]
fn test_release_stamps_last_used() {
    let (cache, _disk) = setup(3, 1, 8);
    let a = cache.read(DEV, 1);
    let b = cache.read(DEV, 2);
    a.release();
    b.release();

    let snap = cache.shard_snapshot(0);
    let stamp = |blockno| {
        snap.iter()
            .find(|info| info.id == Some(BlockId::new(DEV, blockno)))
            .map(|info| info.last_used)
            .unwrap()
    };
    assert!(stamp(2) > stamp(1));
    assert!(snap.iter().all(|info| info.refcnt == 0));
}

#[test]
fn test_held_buffer_is_not_recycled() {
    let (cache, _disk) = setup(2, 1, 8);
    let held = cache.read(DEV, 1);
    cache.read(DEV, 2).release();
    cache.read(DEV, 3).release();

    let ids = ids_in(&cache, 0);
    assert!(ids.contains(&Some(BlockId::new(DEV, 1))));
    assert!(ids.contains(&Some(BlockId::new(DEV, 3))));
    assert_eq!(held.blockno(), 1);
}

#[test]
fn test_steal_from_other_shard() {
    // 两个分片各一个缓冲区；块 1、3 落在分片 0，块 2 落在分片 1
    let (cache, disk) = setup(2, 2, 8);
    assert_eq!(cache.shard_of(DEV, 1), 0);
    assert_eq!(cache.shard_of(DEV, 3), 0);
    assert_eq!(cache.shard_of(DEV, 2), 1);

    let one = cache.read(DEV, 1);
    let three = cache.read(DEV, 3);
    assert_eq!(cache.stats().steals, 1);
    assert!(cache.shard_snapshot(1).is_empty());
    assert_eq!(cache.shard_snapshot(0).len(), 2);
    one.release();
    three.release();

    // 被窃取的缓冲区已挂在新的分片上，再次查找直接命中
    cache.read(DEV, 3).release();
    assert_eq!(disk.reads(), 2);
    assert_eq!(cache.stats().hits, 1);

    // 分片 1 已空，块 2 只能反过来从分片 0 窃取最久未用的缓冲区
    let two = cache.read(DEV, 2);
    assert_eq!(cache.stats().steals, 2);
    assert_eq!(ids_in(&cache, 0), [Some(BlockId::new(DEV, 3))]);
    let snap = cache.shard_snapshot(1);
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].id, Some(BlockId::new(DEV, 2)));
    assert_eq!(snap[0].refcnt, 1);
    assert_eq!(snap[0].index, two.index());
}

#[test]
fn test_reused_buffer_is_invalidated() {
    let (cache, _disk) = setup(1, 1, 8);
    cache.read(DEV, 1).release();
    let buf = cache.get(DEV, 2);
    assert!(!buf.is_valid());
}

#[test]
fn test_pin_keeps_buffer_cached() {
    let (cache, disk) = setup(2, 1, 8);
    let buf = cache.read(DEV, 1);
    let pin = buf.pin();
    buf.release();

    cache.read(DEV, 2).release();
    cache.read(DEV, 3).release();
    assert_eq!(disk.reads(), 3);

    cache.read(DEV, 1).release();
    assert_eq!(disk.reads(), 3);

    pin.unpin();
    let snap = cache.shard_snapshot(0);
    assert!(snap.iter().all(|b| b.refcnt == 0));
    // 最后一次 unpin 把缓冲区放回 MRU
    assert_eq!(snap[0].id, Some(BlockId::new(DEV, 1)));
}

#[test]
fn test_pin_uncached_block_does_not_read() {
    let (cache, disk) = setup(1, 1, 8);
    let pin = cache.pin(DEV, 4);
    assert_eq!(pin.block_id(), BlockId::new(DEV, 4));
    assert_eq!(disk.reads(), 0);

    let buf = cache.read(DEV, 4);
    assert_eq!(buf.index(), pin.index());
    assert_eq!(disk.reads(), 1);
    assert_eq!(cache.shard_snapshot(0)[0].refcnt, 2);
}

#[test]
fn test_pin_does_not_wait_for_content_lock() {
    let (cache, _disk) = setup(2, 1, 8);
    let cache = Arc::new(cache);
    let held = cache.read(DEV, 5);

    let (tx, rx) = mpsc::channel();
    let pinner = {
        let cache = cache.clone();
        thread::spawn(move || {
            set_cpu_id(1);
            let pin = cache.pin(DEV, 5);
            let refcnt = cache.shard_snapshot(0)
                .iter()
                .find(|b| b.index == pin.index())
                .map(|b| b.refcnt);
            tx.send((pin.index(), refcnt)).unwrap();
            pin.unpin();
        })
    };

    // 内容锁一直由本线程持有
    let (index, refcnt) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("pin waited for the content lock");
    assert_eq!(index, held.index());
    assert_eq!(refcnt, Some(2));
    pinner.join().unwrap();

    assert!(held.is_valid());
    drop(held);
    assert!(cache.shard_snapshot(0).iter().all(|b| b.refcnt == 0));
}

#[test]
#[should_panic(expected = "bcache: no buffers")]
fn test_pinned_buffer_exhausts_cache() {
    let (cache, _disk) = setup(1, 1, 8);
    let _pin = cache.pin(DEV, 1);
    let _ = cache.get(DEV, 2);
}

#[test]
#[should_panic(expected = "bcache: no buffers")]
fn test_all_buffers_held() {
    let (cache, _disk) = setup(2, 2, 8);
    let _a = cache.get(DEV, 1);
    let _b = cache.get(DEV, 2);
    let _c = cache.get(DEV, 3);
}

#[test]
#[should_panic(expected = "bcache: unknown device")]
fn test_unknown_device() {
    let (cache, _disk) = setup(2, 1, 8);
    let _ = cache.read(DEV + 1, 0);
}

#[test]
#[should_panic(expected = "bcache: read error")]
fn test_read_past_end_of_disk() {
    let (cache, _disk) = setup(2, 1, 4);
    let _ = cache.read(DEV, 4);
}

#[test]
#[should_panic(expected = "block size")]
fn test_register_mismatched_block_size() {
    init_mock_arch();
    let cache = BufferCache::new(2, 1);
    cache.register_device(DEV, MockDisk::new(8, 512));
}

#[test]
fn test_concurrent_increments_are_exclusive() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;
    let (cache, _disk) = setup(8, 3, 16);

    thread::scope(|s| {
        for t in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                set_cpu_id(t);
                for round in 0..ROUNDS {
                    let mut buf = cache.read(DEV, 0);
                    let data = buf.data_mut();
                    let n = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    data[..4].copy_from_slice(&(n + 1).to_le_bytes());
                    buf.write();
                    buf.release();

                    // 制造其它块上的回收压力
                    let other = 1 + ((t * ROUNDS + round) % 15) as u32;
                    cache.read(DEV, other).release();
                }
            });
        }
    });

    let buf = cache.read(DEV, 0);
    let data = buf.data();
    let n = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    assert_eq!(n as usize, THREADS * ROUNDS);
}

#[test]
fn test_racing_misses_cache_one_copy() {
    const THREADS: usize = 4;
    let (cache, _disk) = setup(8, 2, 16);

    thread::scope(|s| {
        for t in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                set_cpu_id(t);
                for _ in 0..100 {
                    cache.get(DEV, 9).release();
                }
            });
        }
    });

    let home = cache.shard_of(DEV, 9);
    let copies = (0..cache.nshards())
        .flat_map(|s| cache.shard_snapshot(s))
        .filter(|b| b.id == Some(BlockId::new(DEV, 9)))
        .count();
    assert_eq!(copies, 1);
    assert!(ids_in(&cache, home).contains(&Some(BlockId::new(DEV, 9))));
}
