//! 块设备接口
//!
//! 缓冲区缓存只通过 [`BlockDriver`] 与磁盘交互：给定块号，同步读或写一整块。
//! 中断级的 I/O 细节由具体驱动负责，不在此 crate 中。
//!
//! - [`BlockDriver`] trait - 块设备驱动接口
//! - [`RamDisk`] - 内存模拟块设备，用于测试和开发

#![no_std]

extern crate alloc;

pub mod block;

pub use block::{BlockDriver, RamDisk};
