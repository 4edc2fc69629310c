//! 自旋锁实现
//!
//! 每把锁带一个名字和两项计数：成功获取的次数，以及获取时遇到竞争（至少自旋过一轮）的次数。
//! 分片缓存与每核分配器靠这些计数说明锁拆分后竞争是否真的下降。

use core::hint;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::intr_guard::IntrGuard;

/// 某把自旋锁的计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    /// 锁名
    pub name: &'static str,
    /// 成功获取的次数
    pub acquires: usize,
    /// 获取时锁已被占用、需要自旋等待的次数
    pub contended: usize,
}

/// 自旋锁结构体，提供互斥访问临界区的能力。
///
/// 等待者只会忙等，从不让出 CPU；因此持有期间不得执行磁盘 I/O，
/// 也不得获取 [`SleepLock`](crate::SleepLock)。
/// 不可重入。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    name: &'static str,
    acquires: AtomicUsize,
    contended: AtomicUsize,
}

impl RawSpinLock {
    /// 创建未命名的锁
    pub const fn new() -> Self {
        Self::named("spin")
    }

    /// 创建带名字的锁，名字只用于诊断
    pub const fn named(name: &'static str) -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
            name,
            acquires: AtomicUsize::new(0),
            contended: AtomicUsize::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// 获取自旋锁，并返回一个 RAII 保护器。
    ///
    /// 先在当前 CPU 禁用本地中断，再自旋直到拿到锁。
    pub fn lock(&self) -> RawSpinLockGuard<'_> {
        let intr = IntrGuard::new();

        if !self.try_acquire() {
            self.contended.fetch_add(1, Ordering::Relaxed);
            loop {
                while self.locked.load(Ordering::Relaxed) {
                    hint::spin_loop();
                }
                if self.try_acquire() {
                    break;
                }
            }
        }
        self.acquires.fetch_add(1, Ordering::Relaxed);

        RawSpinLockGuard { lock: self, _intr: intr }
    }

    /// 尝试获取自旋锁，失败时立即恢复中断状态并返回 `None`。
    pub fn try_lock(&self) -> Option<RawSpinLockGuard<'_>> {
        let intr = IntrGuard::new();
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        self.acquires.fetch_add(1, Ordering::Relaxed);
        Some(RawSpinLockGuard { lock: self, _intr: intr })
    }

    /// 锁是否被占用 (仅用于调试/断言)
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// 锁名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 计数快照
    pub fn stats(&self) -> LockStats {
        LockStats {
            name: self.name,
            acquires: self.acquires.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// 自动释放自旋锁和恢复中断状态的 RAII 结构体
///
/// 字段按声明顺序销毁：先放锁标志，再恢复中断。
pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
    _intr: IntrGuard,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
