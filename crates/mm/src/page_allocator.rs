//! 物理页分配器
//!
//! 为进程地址空间、内核栈、页表页和管道缓冲区提供整页（[`PAGE_SIZE`]）物理内存。
//!
//! ## 分配策略（每核空闲链表 + 窃取）
//!
//! 每个 CPU 拥有一条独立的空闲链表（各自一把自旋锁）：
//!
//! - **释放**：页总是挂回**调用者所在 CPU** 的链表头，不做再平衡；
//! - **分配**：先从本核链表弹出；本核为空时，从本核编号开始按轮转顺序
//!   依次尝试其余各核（每次只持有一把锁），直到某一核给出一页或全部为空。
//!
//! 所有核都为空时返回 `None`，这是正常的、可恢复的情况，调用者应让上层请求失败。
//! 传给 [`PageAllocator::free`] 的地址未对齐或越界属于编程错误，直接 panic。
//!
//! ## 毒化
//!
//! 释放时整页填充 [`FREE_POISON`]，分配时整页填充 [`ALLOC_POISON`]，
//! 让悬垂引用与未初始化读取更容易暴露。
//!
//! ## 空闲页的表示
//!
//! 空闲页本身存放链表节点（`Run`），分配器不额外占用内存；
//! 已分配的页对分配器而言是不透明的，不记录持有者。

use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloc::vec::Vec;
use lazy_static::lazy_static;
use sync::{IntrGuard, LockStats, SpinLock};

use crate::config::{ALLOC_POISON, FREE_POISON, NCPU, PAGE_SIZE, page_round_down, page_round_up};

// ============================================================================
// 空闲链表
// ============================================================================

/// 空闲页头部存放的链表节点
struct Run {
    next: Option<NonNull<Run>>,
}

/// 单个 CPU 的空闲页链表
struct FreeList {
    head: Option<NonNull<Run>>,
    count: usize,
}

// 链表节点位于由分配器独占管理的物理页中，只在持有外层 SpinLock 时访问
unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: None,
            count: 0,
        }
    }

    /// 把一页挂到链表头
    ///
    /// # Safety
    /// `page` 必须是页对齐、可写、且不再被其它任何地方使用的整页。
    unsafe fn push(&mut self, page: NonNull<u8>) {
        let run = page.cast::<Run>();
        // SAFETY: 由调用者保证 page 可写且页对齐（满足 Run 的对齐要求）
        unsafe { run.as_ptr().write(Run { next: self.head }) };
        self.head = Some(run);
        self.count += 1;
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        let run = self.head?;
        // SAFETY: 链表中的节点都是 push 写入的有效 Run
        self.head = unsafe { run.as_ref().next };
        self.count -= 1;
        Some(run.cast())
    }
}

// ============================================================================
// 错误类型
// ============================================================================

/// 不能交给分配器管理的页地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadPage {
    /// 地址没有按页对齐
    Misaligned(usize),
    /// 地址不在分配器管理的物理范围内
    OutOfRange(usize),
}

impl fmt::Display for BadPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadPage::Misaligned(pa) => write!(f, "misaligned page {:#x}", pa),
            BadPage::OutOfRange(pa) => write!(f, "out of range page {:#x}", pa),
        }
    }
}

// ============================================================================
// 每核页分配器
// ============================================================================

/// 每核物理页分配器
///
/// 内核中通过本模块的全局函数（[`kalloc`] / [`kfree`]）使用唯一实例；
/// 测试可以独立构造任意核数的实例。
pub struct PageAllocator {
    /// 每个 CPU 一条空闲链表，下标即 CPU 编号
    cpus: Vec<SpinLock<FreeList>>,
    /// 管理范围 `[start, end)`，由 `init_range` 设置一次
    start: AtomicUsize,
    end: AtomicUsize,
    initialized: AtomicBool,
}

impl PageAllocator {
    /// 创建 `ncpu` 条空链表的分配器，尚未管理任何内存。
    pub fn new(ncpu: usize) -> Self {
        assert!(ncpu > 0, "kalloc: need at least one cpu");
        PageAllocator {
            cpus: (0..ncpu).map(|_| SpinLock::named("kmem", FreeList::new())).collect(),
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// 每核链表的数量
    pub fn ncpu(&self) -> usize {
        self.cpus.len()
    }

    /// 把 `[start, end)` 交给分配器管理。
    ///
    /// 起点向上、终点向下对齐到页，然后逐页调用 [`free`](Self::free)，
    /// 因此所有页都进入当前 CPU（启动核）的链表，之后只通过窃取在各核间流动。
    ///
    /// # Safety
    /// 该范围必须是可写的、由分配器独占的物理内存，且在内核生命周期内一直有效。
    ///
    /// # Panics
    /// 重复初始化时 panic。
    pub unsafe fn init_range(&self, start: usize, end: usize) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            log::error!("kinit: page allocator initialised twice");
            panic!("kinit: range already initialised");
        }

        // 起点向上取整越过地址空间末端时，范围为空
        let start = page_round_up(start).unwrap_or(page_round_down(usize::MAX));
        let end = page_round_down(end).max(start);
        self.start.store(start, Ordering::Release);
        self.end.store(end, Ordering::Release);

        for pa in (start..end).step_by(PAGE_SIZE) {
            // SAFETY: 由调用者保证整个范围归分配器所有
            unsafe { self.free(pa as *mut u8) };
        }

        log::info!(
            "kinit: managing [{:#x}, {:#x}), {} pages on cpu {}",
            start,
            end,
            self.total_pages(),
            Self::current_cpu_hint()
        );
    }

    /// 检查 `pa` 是否是分配器管理范围内的页首地址
    pub fn check_page(&self, pa: usize) -> Result<(), BadPage> {
        if pa % PAGE_SIZE != 0 {
            return Err(BadPage::Misaligned(pa));
        }
        let start = self.start.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        if pa < start || pa >= end {
            return Err(BadPage::OutOfRange(pa));
        }
        Ok(())
    }

    /// 释放一页到当前 CPU 的链表。
    ///
    /// # Safety
    /// `pa` 必须来自本分配器的 [`alloc`](Self::alloc)（或初始化范围），
    /// 且调用后不再被使用。
    ///
    /// # Panics
    /// 地址未对齐或不在管理范围内时 panic。
    pub unsafe fn free(&self, pa: *mut u8) {
        let cpu = self.current_cpu();
        // SAFETY: 前置条件由调用者保证
        unsafe { self.free_on(cpu, pa) }
    }

    /// 释放一页到指定 CPU 的链表。
    ///
    /// # Safety
    /// 同 [`free`](Self::free)。
    pub unsafe fn free_on(&self, cpu: usize, pa: *mut u8) {
        let list = self.list(cpu);
        if let Err(bad) = self.check_page(pa as usize) {
            log::error!("kfree: {}", bad);
            match bad {
                BadPage::Misaligned(_) => panic!("kfree: misaligned page {:#x}", pa as usize),
                BadPage::OutOfRange(_) => panic!("kfree: out of range page {:#x}", pa as usize),
            }
        }
        // check_page 通过后 pa 不可能为空
        let Some(page) = NonNull::new(pa) else {
            panic!("kfree: out of range page 0x0");
        };

        // SAFETY: 页在管理范围内且已归还，由调用者保证无人再使用
        unsafe { ptr::write_bytes(page.as_ptr(), FREE_POISON, PAGE_SIZE) };

        // SAFETY: 同上
        unsafe { list.lock().push(page) };
    }

    /// 从当前 CPU 分配一页；本核为空时从其它核窃取。
    ///
    /// # 返回
    ///
    /// 所有核都没有空闲页时返回 `None`。
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        self.alloc_on(self.current_cpu())
    }

    /// 以 `cpu` 作为请求者分配一页。
    ///
    /// 依次尝试 `cpu, cpu+1, ..., cpu-1`（取模），每次只持有一把链表锁。
    pub fn alloc_on(&self, cpu: usize) -> Option<NonNull<u8>> {
        let ncpu = self.cpus.len();
        assert!(cpu < ncpu, "kalloc: cpu {} out of range", cpu);

        // NOTE: 每次都从请求者自己开始扫描，不保存轮转提示
        for i in 0..ncpu {
            let id = (cpu + i) % ncpu;
            let page = self.cpus[id].lock().pop();
            if let Some(page) = page {
                if id != cpu {
                    log::debug!("kalloc: cpu {} stole a page from cpu {}", cpu, id);
                }
                // SAFETY: 刚从空闲链表取下的整页，只属于本次分配
                unsafe { ptr::write_bytes(page.as_ptr(), ALLOC_POISON, PAGE_SIZE) };
                return Some(page);
            }
        }

        log::warn!("kalloc: out of memory (requested by cpu {})", cpu);
        None
    }

    /// 指定 CPU 链表上的空闲页数
    pub fn free_pages_on(&self, cpu: usize) -> usize {
        self.list(cpu).lock().count
    }

    /// 指定 CPU 链表锁的获取与竞争计数
    pub fn lock_stats(&self, cpu: usize) -> LockStats {
        self.list(cpu).stats()
    }

    fn list(&self, cpu: usize) -> &SpinLock<FreeList> {
        assert!(cpu < self.cpus.len(), "kalloc: cpu {} out of range", cpu);
        &self.cpus[cpu]
    }

    /// 所有 CPU 的空闲页总数
    ///
    /// 逐核加锁求和，并发分配/释放时只是近似值。
    pub fn free_pages(&self) -> usize {
        self.cpus.iter().map(|list| list.lock().count).sum()
    }

    /// 空闲内存字节数
    pub fn free_memory(&self) -> usize {
        self.free_pages() * PAGE_SIZE
    }

    /// 管理范围内的总页数
    pub fn total_pages(&self) -> usize {
        (self.end.load(Ordering::Acquire) - self.start.load(Ordering::Acquire)) / PAGE_SIZE
    }

    /// 读取当前 CPU 编号（读取期间关闭中断，防止迁移）
    fn current_cpu(&self) -> usize {
        let cpu = Self::current_cpu_hint();
        assert!(cpu < self.cpus.len(), "kalloc: cpu {} has no free list", cpu);
        cpu
    }

    fn current_cpu_hint() -> usize {
        let _guard = IntrGuard::new();
        sync::cpu_id()
    }
}

// ============================================================================
// 全局页分配器
// ============================================================================

lazy_static! {
    /// 全局物理页分配器，每个 CPU 一条链表。
    static ref KMEM: PageAllocator = PageAllocator::new(NCPU);
}

/// 使用可用的物理内存范围初始化全局页分配器。
///
/// # Safety
/// 同 [`PageAllocator::init_range`]。
pub unsafe fn init_page_allocator(start: usize, end: usize) {
    // SAFETY: 前置条件由调用者保证
    unsafe { KMEM.init_range(start, end) }
}

/// 分配一个物理页。
///
/// # 返回
///
/// 如果分配成功，返回页首地址；所有 CPU 都没有空闲页时返回 `None`。
pub fn kalloc() -> Option<NonNull<u8>> {
    KMEM.alloc()
}

/// 回收一个物理页。
///
/// # Safety
/// 同 [`PageAllocator::free`]。
pub unsafe fn kfree(pa: *mut u8) {
    // SAFETY: 前置条件由调用者保证
    unsafe { KMEM.free(pa) }
}

/// 获取空闲内存字节数
pub fn free_memory() -> usize {
    KMEM.free_memory()
}
