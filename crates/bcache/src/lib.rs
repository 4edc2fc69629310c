//! 磁盘块缓冲区缓存
//!
//! 固定数量的缓冲区按 `(dev, blockno)` 哈希到若干分片，每个分片有独立的自旋锁和
//! LRU 链表，不同分片上的命中可以并行。本分片没有空闲缓冲区时，
//! 从其它分片窃取最久未用的一个。
//!
//! 缓冲区内容由睡眠锁保护，同一块同时只有一个持有者；
//! 持有者丢弃 [`Buf`] 时自动归还。需要阻止回收又不独占内容的调用者
//! 使用 [`PinnedBuf`]，它只增加引用计数。
//!
//! # 使用前提
//!
//! - 必须先调用 `sync::register_arch_ops`
//! - 读写某个设备前必须用 [`register_device`] 注册对应的块设备

#![no_std]

extern crate alloc;

mod buf;
mod cache;
pub mod config;
mod shard;

use alloc::sync::Arc;

use device::BlockDriver;
use lazy_static::lazy_static;

pub use buf::{BlockId, Buf, BufData, PinnedBuf};
pub use cache::{BufInfo, BufferCache, CacheStats};
pub use config::{BSIZE, NBUCKET, NBUF};

lazy_static! {
    /// 全局缓冲区缓存
    pub static ref BCACHE: BufferCache = BufferCache::new(NBUF, NBUCKET);
}

/// 在全局缓存中注册块设备
pub fn register_device(dev: u32, driver: Arc<dyn BlockDriver>) {
    BCACHE.register_device(dev, driver);
}

/// 从全局缓存读取块
pub fn bread(dev: u32, blockno: u32) -> Buf<'static> {
    BCACHE.read(dev, blockno)
}
