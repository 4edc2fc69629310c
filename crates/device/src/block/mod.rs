//! 块设备模块
//!
//! 包含块设备相关的驱动接口和实现

mod ram_disk;

pub use ram_disk::RamDisk;

/// 块设备驱动程序接口
///
/// 所有方法都是同步的：返回时数据已经读入 `buf` 或已经写到设备。
/// 调用方可能因此阻塞，所以不得在持有自旋锁时调用。
pub trait BlockDriver: Send + Sync {
    /// 读取块设备数据
    /// # 参数：
    /// * `block_id` - 块设备的块号
    /// * `buf` - 用于存储读取数据的缓冲区，长度必须等于 [`block_size`](Self::block_size)
    /// # 返回值：
    /// 如果读取成功则返回 true，否则返回 false
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool;

    /// 写入块设备数据
    /// # 参数：
    /// * `block_id` - 块设备的块号
    /// * `buf` - 包含要写入数据的缓冲区
    /// # 返回值：
    /// 如果写入成功则返回 true，否则返回 false
    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool;

    /// 获取块大小（字节）
    fn block_size(&self) -> usize;

    /// 获取总块数
    fn total_blocks(&self) -> usize;
}
