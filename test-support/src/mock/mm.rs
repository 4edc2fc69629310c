//! 内存管理相关的 Mock 实现
//!
//! 宿主机上没有可以直接交给页分配器的物理内存，这里用对齐到页的堆内存代替。

use std::alloc::{self, Layout};

/// 一段页对齐的模拟物理内存，Drop 时归还
pub struct MockPhysMemory {
    base: *mut u8,
    layout: Layout,
}

impl MockPhysMemory {
    /// 分配 `pages` 个 `page_size` 字节的页
    pub fn new(pages: usize, page_size: usize) -> Self {
        assert!(pages > 0);
        let layout = Layout::from_size_align(pages * page_size, page_size).unwrap();
        // SAFETY: layout 大小非零
        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }
        Self { base, layout }
    }

    /// 起始地址（含）
    pub fn start(&self) -> usize {
        self.base as usize
    }

    /// 结束地址（不含）
    pub fn end(&self) -> usize {
        self.base as usize + self.layout.size()
    }
}

impl Drop for MockPhysMemory {
    fn drop(&mut self) {
        // SAFETY: base 与 layout 来自 alloc_zeroed
        unsafe { alloc::dealloc(self.base, self.layout) };
    }
}

// 测试会把内存交给跨线程共享的分配器
unsafe impl Send for MockPhysMemory {}
unsafe impl Sync for MockPhysMemory {}
