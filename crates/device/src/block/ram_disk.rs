//! 内存模拟块设备

use super::BlockDriver;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use sync::SpinLock;

/// 内存模拟的块设备
///
/// 用于测试和开发；读写都在内部自旋锁下完成拷贝，不会让出 CPU。
pub struct RamDisk {
    /// 存储数据
    data: SpinLock<Vec<u8>>,

    /// 块大小
    block_size: usize,

    /// 设备 ID
    device_id: usize,
}

impl RamDisk {
    /// 创建指定大小的内存磁盘
    pub fn new(size: usize, block_size: usize, device_id: usize) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::named("ramdisk", vec![0u8; size]),
            block_size,
            device_id,
        })
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn block_range(&self, block_id: usize, len: usize, disk_len: usize) -> Option<core::ops::Range<usize>> {
        if len != self.block_size {
            log::warn!(
                "ramdisk{}: buffer length {} != block size {}",
                self.device_id,
                len,
                self.block_size
            );
            return None;
        }
        let offset = block_id.checked_mul(self.block_size)?;
        let end = offset.checked_add(self.block_size)?;
        if end > disk_len {
            log::warn!("ramdisk{}: block {} out of range", self.device_id, block_id);
            return None;
        }
        Some(offset..end)
    }
}

impl BlockDriver for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        let data = self.data.lock();
        match self.block_range(block_id, buf.len(), data.len()) {
            Some(range) => {
                buf.copy_from_slice(&data[range]);
                true
            }
            None => false,
        }
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        let mut data = self.data.lock();
        match self.block_range(block_id, buf.len(), data.len()) {
            Some(range) => {
                data[range].copy_from_slice(buf);
                true
            }
            None => false,
        }
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }
}
