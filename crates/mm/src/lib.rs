//! 内存管理子系统
//!
//! 提供每核物理页分配器：空闲页按 CPU 分链表管理，本核缺页时从其它核窃取。
//!
//! # 架构解耦
//!
//! 当前 CPU 编号与中断开关通过 `sync` crate 注册的 `ArchOps` 获取，
//! 使用前必须先调用 `sync::register_arch_ops`。

#![no_std]

extern crate alloc;

pub mod config;
pub mod page_allocator;

pub use config::{ALLOC_POISON, FREE_POISON, NCPU, PAGE_SIZE};
pub use page_allocator::{
    BadPage, PageAllocator, free_memory, init_page_allocator, kalloc, kfree,
};
