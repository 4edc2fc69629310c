//! 中断保护器
//!
//! 关中断只挡住本 CPU 上的中断处理程序，挡不住其它 CPU；共享数据仍要靠自旋锁。
//! 嵌套的保护器必须按后进先出的顺序销毁，否则外层临界区会提前打开中断。

use core::marker::PhantomData;

use crate::arch_ops;

/// 创建时关闭本地中断并记下之前的状态，销毁时原样恢复
///
/// 保存的状态属于创建它的那个 CPU，所以保护器不能跨线程移动。
///
/// # 示例
/// ```ignore
/// {
///     let _guard = IntrGuard::new();
///     let cpu = sync::cpu_id(); // 期间不会被迁移
/// }
/// ```
pub struct IntrGuard {
    flags: usize,
    _not_send: PhantomData<*const ()>,
}

impl IntrGuard {
    /// 关闭本地中断
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 只会在 Drop 中原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard {
            flags,
            _not_send: PhantomData,
        }
    }

    /// 进入临界区前中断是否开启
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().sstatus_sie() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 来自本保护器创建时的 read_and_disable_interrupts
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
