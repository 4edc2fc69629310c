//! 内存管理的编译期配置

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;

/// CPU 核数，同时也是每核页分配器的数量
pub const NCPU: usize = 8;

/// 释放时填充的字节，用于暴露悬垂引用
pub const FREE_POISON: u8 = 0x01;

/// 分配时填充的字节，用于暴露未初始化读取
pub const ALLOC_POISON: u8 = 0x05;

/// 向下对齐到页边界
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// 向上对齐到页边界，超出地址空间时返回 `None`
#[inline]
pub const fn page_round_up(addr: usize) -> Option<usize> {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(addr) => Some(page_round_down(addr)),
        None => None,
    }
}
