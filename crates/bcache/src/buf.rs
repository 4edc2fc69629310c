//! 缓冲区句柄
//!
//! [`Buf`] 代表对某个磁盘块内容的独占访问：持有期间内容睡眠锁一直被占着，
//! 丢弃（或调用 [`Buf::release`]）时先释放内容锁，再归还引用计数。
//!
//! [`PinnedBuf`] 只占一次引用计数、不碰内容锁，用来阻止缓冲区被回收。

use core::fmt;

use sync::SleepLockGuard;

use crate::cache::BufferCache;
use crate::config::BSIZE;

/// 一个磁盘块在缓存中的身份：设备号 + 块号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    /// 设备号
    pub dev: u32,
    /// 块号
    pub blockno: u32,
}

impl BlockId {
    /// 创建块身份
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// 缓冲区内容
#[repr(C, align(8))]
pub struct BufData(pub [u8; BSIZE]);

impl BufData {
    pub(crate) const fn zeroed() -> Self {
        Self([0; BSIZE])
    }
}

/// 持有中的缓冲区
///
/// 由 [`BufferCache::get`] 或 [`BufferCache::read`] 返回。
pub struct Buf<'a> {
    cache: &'a BufferCache,
    index: usize,
    id: BlockId,
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    pub(crate) fn new(
        cache: &'a BufferCache,
        index: usize,
        id: BlockId,
        data: SleepLockGuard<'a, BufData>,
    ) -> Self {
        Self {
            cache,
            index,
            id,
            data: Some(data),
        }
    }

    /// 缓存的块
    pub fn block_id(&self) -> BlockId {
        self.id
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.id.dev
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.id.blockno
    }

    /// 缓冲区在缓存中的槽下标
    pub fn index(&self) -> usize {
        self.index
    }

    /// 内容是否已与磁盘同步
    pub fn is_valid(&self) -> bool {
        self.cache.slot_valid(self.index)
    }

    /// 块内容
    pub fn data(&self) -> &[u8; BSIZE] {
        match &self.data {
            Some(guard) => &guard.0,
            None => unreachable!(),
        }
    }

    /// 可写的块内容，修改后需要 [`Buf::write`] 才会落盘
    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        match &mut self.data {
            Some(guard) => &mut guard.0,
            None => unreachable!(),
        }
    }

    /// 把内容写回磁盘
    pub fn write(&mut self) {
        self.cache.write_back(self.id, self.data());
    }

    /// 增加一次引用，使缓冲区在调用者释放后仍不会被回收
    ///
    /// 只获取分片锁。
    #[must_use = "丢弃 PinnedBuf 会立即撤销 pin"]
    pub fn pin(&self) -> PinnedBuf<'a> {
        self.cache.pin_slot(self.index, self.id);
        PinnedBuf::new(self.cache, self.index, self.id)
    }

    /// 释放缓冲区，等价于直接丢弃
    pub fn release(self) {}
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // 内容锁必须先于引用计数释放
        drop(self.data.take());
        self.cache.release(self.index, self.id);
    }
}

/// 一次 pin，持有期间缓冲区不会被回收，但不占用内容锁
///
/// 由 [`Buf::pin`] 或 [`BufferCache::pin`] 得到；丢弃或调用
/// [`PinnedBuf::unpin`] 时归还这次引用。
pub struct PinnedBuf<'a> {
    cache: &'a BufferCache,
    index: usize,
    id: BlockId,
}

impl<'a> PinnedBuf<'a> {
    pub(crate) fn new(cache: &'a BufferCache, index: usize, id: BlockId) -> Self {
        Self { cache, index, id }
    }

    /// 被 pin 住的块
    pub fn block_id(&self) -> BlockId {
        self.id
    }

    /// 缓冲区在缓存中的槽下标
    pub fn index(&self) -> usize {
        self.index
    }

    /// 撤销 pin，等价于直接丢弃
    pub fn unpin(self) {}
}

impl Drop for PinnedBuf<'_> {
    fn drop(&mut self) {
        self.cache.unpin(self.index, self.id);
    }
}

impl fmt::Debug for PinnedBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuf")
            .field("index", &self.index)
            .field("id", &self.id)
            .finish()
    }
}

impl fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("id", &self.id)
            .finish()
    }
}
