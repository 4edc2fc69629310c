//! 架构相关操作的 Mock 实现
//!
//! 每个测试线程扮演一个 CPU：中断状态与 CPU 编号都保存在线程局部变量里，
//! 让多线程测试可以把不同线程“钉”在不同的核上。

use std::cell::Cell;
use std::sync::Once;

use sync::ArchOps;

std::thread_local! {
    static INTERRUPT_STATE: Cell<bool> = const { Cell::new(true) };
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
}

/// Mock 架构操作
pub struct MockArchOps;

impl ArchOps for MockArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        if INTERRUPT_STATE.with(|s| s.replace(false)) {
            self.sstatus_sie()
        } else {
            0
        }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        INTERRUPT_STATE.with(|s| s.set(flags & self.sstatus_sie() != 0));
    }

    fn sstatus_sie(&self) -> usize {
        0x2 // SIE bit
    }

    fn cpu_id(&self) -> usize {
        CPU_ID.with(Cell::get)
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps;

static REGISTER: Once = Once::new();

/// 注册 [`MOCK_ARCH_OPS`]，可重复调用
pub fn init_mock_arch() {
    REGISTER.call_once(|| {
        // SAFETY: Once 保证只注册一次
        unsafe { sync::register_arch_ops(&MOCK_ARCH_OPS) };
    });
}

/// 设置当前线程扮演的 CPU 编号
pub fn set_cpu_id(id: usize) {
    CPU_ID.with(|c| c.set(id));
}

/// 当前线程的中断是否处于开启状态
pub fn interrupts_enabled() -> bool {
    INTERRUPT_STATE.with(Cell::get)
}
