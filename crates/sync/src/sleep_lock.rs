//! 睡眠锁
//!
//! 适用于可能长时间持有的锁（典型场景：跨越一次磁盘读写持有缓冲区内容）。
//! 当锁被占用时，等待者通过 [`ArchOps::yield_now`](crate::ArchOps::yield_now)
//! 让出 CPU，而不是像自旋锁那样忙等；被重新调度后再检查锁状态。
//!
//! 睡眠锁不关闭中断，也不能在持有自旋锁时获取。
//!
//! 守卫与数据访问由 `lock_api` 提供，这里只实现底层的 [`RawSleepLock`]。

use core::sync::atomic::{AtomicBool, Ordering};

use lock_api::{GuardSend, RawMutex};

use crate::arch_ops;

/// 睡眠锁的底层实现
pub struct RawSleepLock {
    locked: AtomicBool,
}

impl RawSleepLock {
    /// 创建未加锁的实例
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for RawSleepLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for RawSleepLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSleepLock::new();

    // 持有睡眠锁的任务可以被调度到其它 CPU 上继续运行
    type GuardMarker = GuardSend;

    fn lock(&self) {
        while !self.try_lock() {
            arch_ops().yield_now();
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 睡眠锁，保护较长时间持有的数据
///
/// `is_locked()` 对应“是否有人持有”（holding-sleep）。
pub type SleepLock<T> = lock_api::Mutex<RawSleepLock, T>;

/// [`SleepLock`] 的 RAII 保护器，离开作用域时释放锁
pub type SleepLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSleepLock, T>;
