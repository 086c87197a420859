use crate::sync::{Arc, AtomicPtr, Ordering};
use std::marker::PhantomData;
use std::ptr;

/// An append-only, lock-free registry of reader slots.
///
/// Insertion is a CAS prepend, so any number of workers may register
/// concurrently without a lock. There is no removal: a slot stays linked
/// until the whole list is dropped, and a departing reader neutralises its
/// slot instead of unlinking it. This keeps traversal safe without hazard
/// tracking.
///
/// 一个只追加的无锁读者槽注册表。
/// 插入是 CAS 前插，任意数量的工作线程可以并发注册而无需锁。
/// 没有移除操作：槽保持链接直到整个列表被 drop，
/// 离开的读者将其槽置为中立状态而不是解除链接。
pub(crate) struct SlotList<S> {
    head: AtomicPtr<SlotNode<S>>,
}

struct SlotNode<S> {
    slot: Arc<S>,
    /// Written once before the publishing CAS, immutable afterwards.
    /// 在发布 CAS 之前写入一次，之后不可变。
    next: *mut SlotNode<S>,
}

impl<S> SlotList<S> {
    pub(crate) fn new() -> Self {
        SlotList {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish a slot into the registry.
    ///
    /// The release CAS pairs with the acquire load in `iter()`: a traverser
    /// that observes the new head also observes the node's `next` link and
    /// the slot's initial state.
    ///
    /// 将一个槽发布到注册表中。
    /// 释放 CAS 与 `iter()` 中的获取加载配对。
    pub(crate) fn insert(&self, slot: Arc<S>) {
        let node = Box::into_raw(Box::new(SlotNode {
            slot,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: the node is not published yet, we are its only owner.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    /// Iterate over every registered slot.
    ///
    /// Lock-free: traversal walks the snapshot taken at the acquire load of
    /// the head plus whatever was already linked behind it. Slots inserted
    /// after the load may or may not be seen, which is fine for the
    /// synchronisation scans — a brand-new reader observes the state the
    /// scanner is about to publish.
    ///
    /// 遍历每个已注册的槽。
    /// 无锁：遍历从头指针的获取加载开始。之后插入的槽可能不被看到，
    /// 这对同步扫描来说是可以接受的。
    pub(crate) fn iter(&self) -> Iter<'_, S> {
        Iter {
            node: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }
}

impl<S> Drop for SlotList<S> {
    fn drop(&mut self) {
        // Exclusive access at this point: no reader can hold an Iter.
        // 此时是独占访问：没有读者能持有 Iter。
        let mut node = self.head.load(Ordering::Relaxed);
        while !node.is_null() {
            // SAFETY: every node was created by Box::into_raw in insert()
            // and is only freed here, once.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}

// SAFETY: the raw head/next pointers only ever refer to heap nodes owned by
// the list; all cross-thread hand-off goes through the release/acquire pair
// on `head`.
unsafe impl<S: Send + Sync> Send for SlotList<S> {}
unsafe impl<S: Send + Sync> Sync for SlotList<S> {}

pub(crate) struct Iter<'a, S> {
    node: *mut SlotNode<S>,
    _marker: PhantomData<&'a SlotList<S>>,
}

impl<'a, S> Iterator for Iter<'a, S> {
    type Item = &'a S;

    #[inline]
    fn next(&mut self) -> Option<&'a S> {
        if self.node.is_null() {
            return None;
        }
        // SAFETY: nodes are never unlinked or freed while the list is alive,
        // and the borrow in `_marker` keeps the list alive for 'a.
        let node = unsafe { &*self.node };
        self.node = node.next;
        Some(&node.slot)
    }
}
