//! 保护数据的自旋锁
//!
//! 缓冲区缓存的分片链表、全局驱逐锁和每核空闲链表都用它保护。
//! 同一条执行路径需要多把 SpinLock 时，必须遵循调用方约定的全局顺序，
//! 并按相反顺序释放。

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::raw_spin_lock::{LockStats, RawSpinLock, RawSpinLockGuard};

/// 提供对数据的互斥访问的自旋锁
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::named("kmem", 0);
/// {
///     let mut guard = lock.lock();
///     *guard += 1;
/// } // 离开作用域，自动释放锁
/// assert_eq!(lock.stats().acquires, 1);
/// ```
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// 创建未命名的锁
    pub const fn new(data: T) -> Self {
        Self::named("spin", data)
    }

    /// 创建带名字的锁
    pub const fn named(name: &'static str, data: T) -> Self {
        SpinLock {
            raw: RawSpinLock::named(name),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取锁
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let raw = self.raw.lock();
        // SAFETY: 持有 raw 期间独占数据
        unsafe { SpinLockGuard::new(raw, &self.data) }
    }

    /// 尝试获取锁，已被占用时返回 `None`
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let raw = self.raw.try_lock()?;
        // SAFETY: 同上
        Some(unsafe { SpinLockGuard::new(raw, &self.data) })
    }

    /// 锁是否被占用 (仅用于调试/断言)
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// 获取次数与竞争次数
    pub fn stats(&self) -> LockStats {
        self.raw.stats()
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.raw.name())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// [`SpinLock`] 的 RAII 保护器，离开作用域时释放锁
pub struct SpinLockGuard<'a, T> {
    _raw: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// # Safety
    /// `raw` 必须是保护 `data` 的那把锁的保护器
    unsafe fn new(raw: RawSpinLockGuard<'a>, data: &'a UnsafeCell<T>) -> Self {
        Self {
            _raw: raw,
            // SAFETY: 由调用者保证已持有对应的锁
            data: unsafe { &mut *data.get() },
        }
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

// SAFETY: 数据只在持有 RawSpinLock 时被访问
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}
