//! 分片缓冲区缓存
//!
//! # 锁的层次
//!
//! 1. `evict_lock`：串行化所有缺失路径上的回收/窃取
//! 2. 分片自旋锁：保护该分片的链表、块身份与引用计数，同一时刻最多持有本分片和一把
//!    其它分片的锁中的一把（窃取时先放掉本分片再逐个锁其它分片）
//! 3. 内容睡眠锁：在所有自旋锁都放掉之后才获取
//!
//! 缺失路径先放掉本分片锁，再按 `evict_lock` → 本分片锁的顺序重新加锁并复查，
//! 两个同时缺失同一块的调用者因此不会缓存出两份。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use device::BlockDriver;
use sync::{LockStats, SleepLock, SpinLock};

use crate::buf::{BlockId, Buf, BufData, PinnedBuf};
use crate::config::BSIZE;
use crate::shard::{BufCtrl, Shard};

/// 单个缓冲区槽：有效标志与受睡眠锁保护的内容
struct BufSlot {
    valid: AtomicBool,
    data: SleepLock<BufData>,
}

/// 某个缓冲区在分片中的快照，用于调试与测试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufInfo {
    /// 槽下标
    pub index: usize,
    /// 当前缓存的块
    pub id: Option<BlockId>,
    /// 引用计数
    pub refcnt: usize,
    /// 最近一次释放时的逻辑时钟
    pub last_used: usize,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中次数
    pub hits: usize,
    /// 缺失次数
    pub misses: usize,
    /// 从其它分片窃取缓冲区的次数
    pub steals: usize,
    /// 磁盘读次数
    pub disk_reads: usize,
    /// 磁盘写次数
    pub disk_writes: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    steals: AtomicUsize,
    disk_reads: AtomicUsize,
    disk_writes: AtomicUsize,
}

/// 按 `(dev, blockno)` 哈希分片的磁盘块缓存
pub struct BufferCache {
    shards: Vec<SpinLock<Shard>>,
    evict_lock: SpinLock<()>,
    slots: Vec<BufSlot>,
    devices: SpinLock<BTreeMap<u32, Arc<dyn BlockDriver>>>,
    clock: AtomicUsize,
    counters: Counters,
}

impl BufferCache {
    /// 创建含 `nbuf` 个缓冲区、`nshards` 个分片的缓存
    ///
    /// 缓冲区轮流分配到各分片，初始都没有块身份。
    ///
    /// # Panics
    ///
    /// `nbuf` 或 `nshards` 为零时 panic。
    pub fn new(nbuf: usize, nshards: usize) -> Self {
        assert!(nbuf > 0, "bcache: nbuf must be positive");
        assert!(nshards > 0, "bcache: nshards must be positive");

        let mut shards: Vec<Shard> = (0..nshards).map(|_| Shard::new()).collect();
        for index in 0..nbuf {
            shards[index % nshards].push_mru(BufCtrl::unassigned(index));
        }

        let slots = (0..nbuf)
            .map(|_| BufSlot {
                valid: AtomicBool::new(false),
                data: SleepLock::new(BufData::zeroed()),
            })
            .collect();

        log::debug!("bcache: {} buffers in {} shards", nbuf, nshards);

        Self {
            shards: shards
                .into_iter()
                .map(|shard| SpinLock::named("bcache.shard", shard))
                .collect(),
            evict_lock: SpinLock::named("bcache.evict", ()),
            slots,
            devices: SpinLock::named("bcache.devices", BTreeMap::new()),
            clock: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// 注册设备号对应的块设备，已存在时替换
    ///
    /// # Panics
    ///
    /// 设备块大小不等于 [`BSIZE`] 时 panic。
    pub fn register_device(&self, dev: u32, driver: Arc<dyn BlockDriver>) {
        let block_size = driver.block_size();
        if block_size != BSIZE {
            log::error!("bcache: dev {} block size {} != {}", dev, block_size, BSIZE);
            panic!("bcache: dev {} has block size {}", dev, block_size);
        }
        let blocks = driver.total_blocks();
        if self.devices.lock().insert(dev, driver).is_some() {
            log::warn!("bcache: dev {} re-registered ({} blocks)", dev, blocks);
        } else {
            log::info!("bcache: dev {} registered ({} blocks)", dev, blocks);
        }
    }

    /// 缓冲区总数
    pub fn nbuf(&self) -> usize {
        self.slots.len()
    }

    /// 分片数
    pub fn nshards(&self) -> usize {
        self.shards.len()
    }

    /// 块所属的分片
    pub fn shard_of(&self, dev: u32, blockno: u32) -> usize {
        let n = self.shards.len();
        ((dev as usize % n) + (blockno as usize % n)) % n
    }

    /// 获取块的缓冲区并锁住内容，不读磁盘
    ///
    /// 返回的缓冲区可能尚未有效，见 [`Buf::is_valid`]。
    ///
    /// # Panics
    ///
    /// 所有缓冲区都在使用中时 panic。
    pub fn get(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let id = BlockId::new(dev, blockno);
        let index = self.acquire(id);
        Buf::new(self, index, id, self.slots[index].data.lock())
    }

    /// pin 住块的缓冲区，不获取内容锁也不读磁盘
    ///
    /// 块不在缓存中时与 [`get`](Self::get) 一样分配缓冲区，新缓冲区无效。
    ///
    /// # Panics
    ///
    /// 所有缓冲区都在使用中时 panic。
    #[must_use = "丢弃 PinnedBuf 会立即撤销 pin"]
    pub fn pin(&self, dev: u32, blockno: u32) -> PinnedBuf<'_> {
        let id = BlockId::new(dev, blockno);
        let index = self.acquire(id);
        PinnedBuf::new(self, index, id)
    }

    /// 命中或回收得到一个缓冲区，引用计数已加一，返回槽下标
    fn acquire(&self, id: BlockId) -> usize {
        let home = self.shard_of(id.dev, id.blockno);
        let hit = self.shards[home].lock().lookup(id);
        match hit {
            Some(index) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                index
            }
            None => self.evict(home, id),
        }
    }

    /// 获取块的缓冲区，内容无效时从磁盘读入
    ///
    /// # Panics
    ///
    /// 没有可用缓冲区、设备未注册或读盘失败时 panic。
    pub fn read(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut buf = self.get(dev, blockno);
        if !buf.is_valid() {
            let index = buf.index();
            self.read_in(buf.block_id(), buf.data_mut());
            self.slots[index].valid.store(true, Ordering::Release);
        }
        buf
    }

    /// 缺失路径：复查后在本分片回收，否则从其它分片窃取
    fn evict(&self, home: usize, id: BlockId) -> usize {
        let _evict = self.evict_lock.lock();
        let mut shard = self.shards[home].lock();

        if let Some(index) = shard.lookup(id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return index;
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(index) = shard.victim().and_then(|pos| shard.claim(pos, id)) {
            self.slots[index].valid.store(false, Ordering::Release);
            log::trace!("bcache: block {} reuses buffer {} in shard {}", id, index, home);
            return index;
        }
        drop(shard);

        let n = self.shards.len();
        for offset in 1..n {
            let from = (home + offset) % n;
            let mut foreign = self.shards[from].lock();
            let Some(ctrl) = foreign.victim().and_then(|pos| foreign.take(pos, id)) else {
                continue;
            };
            drop(foreign);

            let index = ctrl.index;
            self.slots[index].valid.store(false, Ordering::Release);
            self.shards[home].lock().push_mru(ctrl);
            self.counters.steals.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "bcache: block {} steals buffer {} from shard {} to shard {}",
                id,
                index,
                from,
                home
            );
            return index;
        }

        log::error!("bcache: no free buffer for block {}", id);
        panic!("bcache: no buffers");
    }

    pub(crate) fn slot_valid(&self, index: usize) -> bool {
        self.slots[index].valid.load(Ordering::Acquire)
    }

    fn driver(&self, dev: u32) -> Arc<dyn BlockDriver> {
        // 克隆后立即放锁，磁盘 I/O 不在自旋锁下进行
        let driver = self.devices.lock().get(&dev).cloned();
        match driver {
            Some(driver) => driver,
            None => {
                log::error!("bcache: dev {} is not registered", dev);
                panic!("bcache: unknown device {}", dev);
            }
        }
    }

    fn read_in(&self, id: BlockId, data: &mut [u8; BSIZE]) {
        let driver = self.driver(id.dev);
        self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);
        if !driver.read_block(id.blockno as usize, data) {
            log::error!("bcache: read of block {} failed", id);
            panic!("bcache: read error on block {}", id);
        }
    }

    pub(crate) fn write_back(&self, id: BlockId, data: &[u8; BSIZE]) {
        let driver = self.driver(id.dev);
        self.counters.disk_writes.fetch_add(1, Ordering::Relaxed);
        if !driver.write_block(id.blockno as usize, data) {
            log::error!("bcache: write of block {} failed", id);
            panic!("bcache: write error on block {}", id);
        }
    }

    /// 归还一次引用；内容锁已由调用者放掉
    pub(crate) fn release(&self, index: usize, id: BlockId) {
        self.put(index, id, "release");
    }

    pub(crate) fn pin_slot(&self, index: usize, id: BlockId) {
        let home = self.shard_of(id.dev, id.blockno);
        if self.shards[home].lock().pin(index).is_none() {
            log::error!("bcache: pin of buffer {} ({}) not in shard {}", index, id, home);
            panic!("bcache: pin");
        }
    }

    /// 撤销一次 pin，计数归零时与 release 一样移到 MRU
    pub(crate) fn unpin(&self, index: usize, id: BlockId) {
        self.put(index, id, "unpin");
    }

    fn put(&self, index: usize, id: BlockId, op: &str) {
        let home = self.shard_of(id.dev, id.blockno);
        let mut shard = self.shards[home].lock();
        let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        if shard.release(index, now).is_none() {
            drop(shard);
            log::error!("bcache: {} of buffer {} ({}) underflows refcnt", op, index, id);
            panic!("bcache: {}", op);
        }
    }

    /// 按 MRU → LRU 顺序列出分片中的缓冲区
    pub fn shard_snapshot(&self, shard: usize) -> Vec<BufInfo> {
        self.shards[shard]
            .lock()
            .iter()
            .map(|b| BufInfo {
                index: b.index,
                id: b.id,
                refcnt: b.refcnt,
                last_used: b.last_used,
            })
            .collect()
    }

    /// 分片锁的获取与竞争计数
    pub fn shard_lock_stats(&self, shard: usize) -> LockStats {
        self.shards[shard].stats()
    }

    /// 全局驱逐锁的获取与竞争计数
    pub fn evict_lock_stats(&self) -> LockStats {
        self.evict_lock.stats()
    }

    /// 统计计数的快照
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            steals: c.steals.load(Ordering::Relaxed),
            disk_reads: c.disk_reads.load(Ordering::Relaxed),
            disk_writes: c.disk_writes.load(Ordering::Relaxed),
        }
    }
}
