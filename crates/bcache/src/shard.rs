//! 缓存分片
//!
//! 每个分片持有一条按最近使用排序的缓冲区控制块链表：
//! 前端是最近释放的（MRU），后端是最久未用的（LRU）。
//! 分片本身不加锁，由 [`BufferCache`](crate::BufferCache) 用自旋锁包裹。

use alloc::collections::VecDeque;

use crate::BlockId;

/// 缓冲区的元数据，受所在分片的锁保护
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BufCtrl {
    /// 缓冲区在缓存槽数组中的下标，终身不变
    pub index: usize,
    /// 当前缓存的块，`None` 表示从未分配
    pub id: Option<BlockId>,
    /// 引用计数
    pub refcnt: usize,
    /// 最近一次引用计数归零时的逻辑时钟
    pub last_used: usize,
}

impl BufCtrl {
    /// 未分配身份的空闲缓冲区
    pub fn unassigned(index: usize) -> Self {
        Self {
            index,
            id: None,
            refcnt: 0,
            last_used: 0,
        }
    }

    /// 改挂到新的块上，调用者成为唯一持有者
    fn assign(&mut self, id: BlockId) {
        self.id = Some(id);
        self.refcnt = 1;
    }
}

pub(crate) struct Shard {
    lru: VecDeque<BufCtrl>,
}

impl Shard {
    pub const fn new() -> Self {
        Self {
            lru: VecDeque::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufCtrl> {
        self.lru.iter()
    }

    /// 放到链表前端
    pub fn push_mru(&mut self, ctrl: BufCtrl) {
        self.lru.push_front(ctrl);
    }

    /// 查找已缓存的块，命中时引用计数加一并返回槽下标
    pub fn lookup(&mut self, id: BlockId) -> Option<usize> {
        let ctrl = self.lru.iter_mut().find(|b| b.id == Some(id))?;
        ctrl.refcnt += 1;
        Some(ctrl.index)
    }

    /// 从后往前找第一个引用计数为零的缓冲区
    pub fn victim(&self) -> Option<usize> {
        self.lru.iter().rposition(|b| b.refcnt == 0)
    }

    /// 原地回收 `pos` 处的缓冲区，返回槽下标
    pub fn claim(&mut self, pos: usize, id: BlockId) -> Option<usize> {
        let ctrl = self.lru.get_mut(pos)?;
        ctrl.assign(id);
        Some(ctrl.index)
    }

    /// 把 `pos` 处的缓冲区摘出本分片并改挂到 `id`
    pub fn take(&mut self, pos: usize, id: BlockId) -> Option<BufCtrl> {
        let mut ctrl = self.lru.remove(pos)?;
        ctrl.assign(id);
        Some(ctrl)
    }

    fn position(&self, index: usize) -> Option<usize> {
        self.lru.iter().position(|b| b.index == index)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut BufCtrl> {
        self.lru.iter_mut().find(|b| b.index == index)
    }

    /// 引用计数减一；归零时记录时间戳并移到前端
    ///
    /// 返回减一后的引用计数，找不到该缓冲区或计数已为零时返回 `None`。
    pub fn release(&mut self, index: usize, now: usize) -> Option<usize> {
        let pos = self.position(index)?;
        let ctrl = self.lru.get_mut(pos)?;
        ctrl.refcnt = ctrl.refcnt.checked_sub(1)?;
        let refcnt = ctrl.refcnt;
        if refcnt == 0 {
            ctrl.last_used = now;
            if let Some(ctrl) = self.lru.remove(pos) {
                self.lru.push_front(ctrl);
            }
        }
        Some(refcnt)
    }

    /// 引用计数加一，返回新值
    pub fn pin(&mut self, index: usize) -> Option<usize> {
        let ctrl = self.get_mut(index)?;
        ctrl.refcnt += 1;
        Some(ctrl.refcnt)
    }
}
