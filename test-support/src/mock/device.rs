//! 块设备相关的 Mock 实现

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use device::{BlockDriver, RamDisk};

/// 包装 [`RamDisk`]，统计读写次数
pub struct MockDisk {
    inner: Arc<RamDisk>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockDisk {
    /// 创建 `blocks` 个 `block_size` 字节的磁盘
    pub fn new(blocks: usize, block_size: usize) -> Arc<Self> {
        Self::wrap(RamDisk::new(blocks * block_size, block_size, 0))
    }

    /// 包装已有的内存磁盘（例如在两个缓存实例间共享同一块“盘”）
    pub fn wrap(inner: Arc<RamDisk>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// 已执行的块读取次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// 已执行的块写入次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 底层内存磁盘
    pub fn ram_disk(&self) -> &Arc<RamDisk> {
        &self.inner
    }
}

impl BlockDriver for MockDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_block(block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_block(block_id, buf)
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn total_blocks(&self) -> usize {
        self.inner.total_blocks()
    }
}
