//! 测试支持 crate
//!
//! 提供宿主机上运行单元测试所需的 Mock 实现：
//!
//! - [`mock::arch`]：按线程区分 CPU 编号的 `sync::ArchOps`
//! - [`mock::mm`]：页对齐的模拟物理内存
//! - [`mock::device`]：统计读写次数的块设备

pub mod mock;
