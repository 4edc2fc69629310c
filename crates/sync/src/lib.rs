//! 同步原语
//!
//! 向缓冲区缓存与页分配器提供两类互不替代的锁：
//!
//! - [`SpinLock`] / [`RawSpinLock`]：短持有、忙等待，关闭本地中断，用于保护元数据
//!   （分片链表、每核空闲链表、全局驱逐锁）。持有期间禁止任何 I/O 或阻塞调用。
//!   每把锁带名字和 [`LockStats`] 计数。
//! - [`SleepLock`]：长持有、可挂起，用于保护缓冲区内容，是唯一允许跨越磁盘 I/O 持有的锁。
//!
//! # 架构依赖
//!
//! 此 crate 通过 `ArchOps` trait 抽象架构相关操作（中断开关、CPU 编号、让出 CPU）。
//! 使用前必须调用 `register_arch_ops` 注册实现。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod sleep_lock;
mod spin_lock;

pub use intr_guard::*;
pub use raw_spin_lock::*;
pub use sleep_lock::*;
pub use spin_lock::*;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由内核（或测试桩）实现并注册，提供中断控制、CPU 信息与调度挂钩
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 获取 SSTATUS_SIE 常量（中断使能位）
    fn sstatus_sie(&self) -> usize;

    /// 获取当前 CPU ID
    fn cpu_id(&self) -> usize;

    /// 让出当前 CPU，直到调度器再次选中调用者
    ///
    /// 睡眠锁在竞争时循环调用此方法，因此允许虚假唤醒。
    fn yield_now(&self);
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_DATA.store(data, Ordering::Release);
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

/// 当前 CPU 的编号
///
/// 调用者若需要在读取后继续使用该编号，应自行保证不会被迁移到其它 CPU
/// （例如持有 [`IntrGuard`]）。
pub fn cpu_id() -> usize {
    arch_ops().cpu_id()
}
