use crate::ebr::{CritGuard, EbrDomain, EbrHandle, EbrReader, EBR_EPOCHS};
use crate::sync::{Arc, AtomicPtr, Ordering};
use crossbeam_utils::Backoff;
use std::mem;
use std::ptr;
use std::thread;
use std::time::Duration;

/// The linkage node embedded in every object managed by the G/C facade.
///
/// The object address and the linkage address are related by the fixed
/// byte offset configured at [`GcBuilder::entry_offset`]; the library
/// treats the object itself as an opaque token and never dereferences it
/// except through the reclaim strategy.
///
/// 嵌入在每个由 G/C 外观管理的对象中的链接节点。
/// 对象地址和链接地址通过 `entry_offset` 配置的固定字节偏移相关联；
/// 库将对象本身视为不透明令牌，除回收策略外从不解引用它。
pub struct GcEntry {
    next: AtomicPtr<GcEntry>,
}

impl GcEntry {
    /// Create an unlinked entry.
    /// 创建一个未链接的节点。
    pub fn new() -> Self {
        GcEntry {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The next entry in the chain this entry is linked into, or null.
    /// Reclaim callbacks walk the chain with this accessor.
    ///
    /// 此节点所在链中的下一个节点，或为空。
    /// 回收回调用此访问器遍历链。
    #[inline]
    pub fn next(&self) -> *mut GcEntry {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for GcEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased destructor for the default reclaim strategy: reconstructs
/// the `Box<T>` the object was allocated from and drops it.
///
/// 默认回收策略的类型擦除析构函数：重建对象所来自的 `Box<T>` 并 drop。
unsafe fn drop_boxed<T>(obj: *mut ()) {
    unsafe {
        drop(Box::from_raw(obj as *mut T));
    }
}

enum ReclaimKind {
    /// User callback invoked once per drained chain with the chain head.
    /// 用户回调，每个被取出的链调用一次，参数为链头。
    Chain(Box<dyn FnMut(*mut GcEntry) + Send>),
    /// Default strategy: derive each object address from its linkage and
    /// free it with the type-erased destructor.
    /// 默认策略：从链接地址推导每个对象地址并用类型擦除析构函数释放。
    EachBoxed { dtor: unsafe fn(*mut ()) },
}

/// Builder for a G/C instance (see [`GcDomain::builder`]).
///
/// G/C 实例的构建器（见 `GcDomain::builder`）。
pub struct GcBuilder {
    entry_off: usize,
    reclaim: Option<ReclaimKind>,
}

impl GcBuilder {
    fn new() -> Self {
        GcBuilder {
            entry_off: 0,
            reclaim: None,
        }
    }

    /// Byte offset of the embedded [`GcEntry`] within the user object.
    /// Zero is permitted (linkage at the start of the object).
    ///
    /// 用户对象中嵌入的 `GcEntry` 的字节偏移。允许为零。
    #[inline]
    pub fn entry_offset(mut self, off: usize) -> Self {
        self.entry_off = off;
        self
    }

    /// Install a reclaim callback.
    ///
    /// The callback receives the head of a detached chain of entries whose
    /// grace period has elapsed; it must dispose of every object on the
    /// chain and must not fail. State that the C-style variant would pass
    /// as an opaque argument is simply captured by the closure.
    ///
    /// 安装回收回调。
    /// 回调接收一条已脱离、宽限期已过的节点链的头；
    /// 它必须处置链上的每个对象且不得失败。
    /// C 风格变体中作为不透明参数传递的状态由闭包捕获即可。
    pub fn reclaim<F>(mut self, f: F) -> Self
    where
        F: FnMut(*mut GcEntry) + Send + 'static,
    {
        self.reclaim = Some(ReclaimKind::Chain(Box::new(f)));
        self
    }

    /// Install the default reclaim strategy: each object is derived from
    /// its linkage address by subtracting the entry offset and freed as a
    /// `Box<T>`.
    ///
    /// Only correct when every object handed to [`GcDomain::limbo`] was
    /// allocated as a `Box<T>` with this exact `T`.
    ///
    /// 安装默认回收策略：每个对象通过链接地址减去偏移得出，
    /// 并作为 `Box<T>` 释放。
    /// 仅当交给 `limbo` 的每个对象都是以该 `T` 的 `Box<T>` 分配时才正确。
    pub fn free_boxed<T: Send + 'static>(mut self) -> Self {
        self.reclaim = Some(ReclaimKind::EachBoxed {
            dtor: drop_boxed::<T>,
        });
        self
    }

    /// Build the instance, returning the unique [`GcHandle`] (cycle/full
    /// serialised by sole ownership) and the shareable [`GcDomain`].
    ///
    /// # Panics
    ///
    /// Panics if no reclaim strategy was configured — there is no
    /// type-oblivious free, so either [`reclaim`](Self::reclaim) or
    /// [`free_boxed`](Self::free_boxed) must be chosen.
    ///
    /// 构建实例，返回唯一的 `GcHandle`（通过唯一所有权串行化
    /// cycle/full）和可共享的 `GcDomain`。
    /// 若未配置回收策略则 panic。
    pub fn build(self) -> (GcHandle, GcDomain) {
        let reclaim = self
            .reclaim
            .expect("no reclaim strategy configured: call reclaim() or free_boxed()");

        let (ebr_handle, ebr_domain) = EbrDomain::new();
        let shared = Arc::new(GcShared {
            limbo: AtomicPtr::new(ptr::null_mut()),
            entry_off: self.entry_off,
            ebr: ebr_domain,
        });

        let handle = GcHandle {
            shared: Arc::clone(&shared),
            ebr: ebr_handle,
            buckets: [ptr::null_mut(); EBR_EPOCHS as usize],
            reclaim,
        };

        (handle, GcDomain { shared })
    }
}

struct GcShared {
    /// Lock-free intake list of entries pending deferred destruction.
    /// LIFO; producers publish with a CAS prepend.
    ///
    /// 等待延迟销毁的节点的无锁入口列表。
    /// LIFO；生产者用 CAS 前插发布。
    limbo: AtomicPtr<GcEntry>,
    entry_off: usize,
    ebr: EbrDomain,
}

/// The shareable half of a G/C instance: registration and limbo insertion.
///
/// `GcDomain` is `Clone`; clones share the instance. Any number of
/// producers may insert into limbo concurrently.
///
/// G/C 实例的可共享部分：注册和 limbo 插入。
/// `GcDomain` 是 `Clone` 的；克隆共享同一实例。
/// 任意数量的生产者可以并发插入 limbo。
#[derive(Clone)]
pub struct GcDomain {
    shared: Arc<GcShared>,
}

impl GcDomain {
    /// Start configuring a new G/C instance.
    /// 开始配置一个新的 G/C 实例。
    pub fn builder() -> GcBuilder {
        GcBuilder::new()
    }

    /// Register the calling worker and return its reader handle.
    /// Forwards to the embedded EBR instance.
    ///
    /// 注册调用方工作线程并返回其读者句柄。转发给内嵌的 EBR 实例。
    pub fn register(&self) -> GcReader {
        GcReader {
            inner: self.shared.ebr.register(),
        }
    }

    /// Hand an unpublished object over for deferred destruction.
    ///
    /// Computes the linkage address from the configured entry offset and
    /// prepends it to the limbo list. Safe from arbitrary concurrent
    /// producers; the release CAS pairs with the drain in `cycle`.
    ///
    /// # Safety
    ///
    /// - `obj` must point to a live object embedding a [`GcEntry`] at the
    ///   configured entry offset, not currently linked anywhere.
    /// - The object must no longer be reachable for new readers; only
    ///   readers already inside a critical section may still hold it.
    /// - Ownership transfers to the instance: the object must stay valid
    ///   until the reclaim strategy runs (possibly on another thread, so
    ///   the object must be `Send`), and must not be touched by the
    ///   caller afterwards.
    ///
    /// 将一个已取消发布的对象交付延迟销毁。
    /// 按配置的偏移计算链接地址并将其前插到 limbo 列表。
    /// 对任意并发生产者安全；释放 CAS 与 `cycle` 中的取出配对。
    pub unsafe fn limbo(&self, obj: *mut ()) {
        let entry = unsafe { (obj as *mut u8).add(self.shared.entry_off) } as *mut GcEntry;

        let mut head = self.shared.limbo.load(Ordering::Relaxed);
        loop {
            // SAFETY: per the contract, the entry is live and exclusively
            // ours until the CAS publishes it.
            unsafe { (*entry).next.store(head, Ordering::Relaxed) };
            match self.shared.limbo.compare_exchange_weak(
                head,
                entry,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }
}

/// A registered G/C reader: the EBR critical-section primitives, forwarded.
///
/// 一个已注册的 G/C 读者：转发的 EBR 临界区原语。
pub struct GcReader {
    inner: EbrReader,
}

impl GcReader {
    /// Mark the entrance of the critical path.
    /// 标记临界路径的入口。
    #[inline]
    pub fn crit_enter(&self) {
        self.inner.enter();
    }

    /// Mark the exit of the critical path.
    /// 标记临界路径的出口。
    #[inline]
    pub fn crit_exit(&self) {
        self.inner.exit();
    }

    /// Diagnostic: is this reader currently inside a critical section?
    /// 诊断：此读者当前是否处于临界区内？
    #[inline]
    pub fn in_critical(&self) -> bool {
        self.inner.in_critical()
    }

    /// Enter the critical path and return a guard that exits on drop.
    /// 进入临界路径并返回一个在 drop 时退出的守卫。
    #[inline]
    pub fn pin(&self) -> CritGuard<'_> {
        self.inner.pin()
    }
}

/// The unique drainer of a G/C instance.
///
/// Owns the epoch synchroniser and the per-epoch reclamation buckets;
/// [`cycle`](Self::cycle) and [`full`](Self::full) are serialised by sole
/// ownership and `&mut self`.
///
/// G/C 实例的唯一排水者。
/// 拥有纪元同步者和每纪元的回收桶；
/// `cycle` 和 `full` 通过唯一所有权和 `&mut self` 串行化。
pub struct GcHandle {
    shared: Arc<GcShared>,
    ebr: EbrHandle,
    /// One staged chain per epoch, only ever touched by this handle.
    /// 每个纪元一条暂存链，只由本句柄访问。
    buckets: [*mut GcEntry; EBR_EPOCHS as usize],
    reclaim: ReclaimKind,
}

// SAFETY: the bucket pointers chain objects whose ownership was handed over
// through `GcDomain::limbo`, whose contract requires them to be sendable to
// the drainer; everything else in the handle is already Send.
unsafe impl Send for GcHandle {}

impl GcHandle {
    /// Run one write-stage-reclaim step.
    ///
    /// If the epoch cannot be advanced (an active reader has not observed
    /// it yet), returns immediately: nothing to promote, nothing new to
    /// reclaim. Otherwise the limbo intake is detached into the bucket of
    /// the new staging epoch, and the bucket of the announced gc epoch —
    /// staged a full grace period ago — is drained through the reclaim
    /// strategy. When that bucket is empty the procedure is retried, at
    /// most [`EBR_EPOCHS`] iterations in total, so a caller sweeping
    /// several rounds back-to-back can traverse the epochs.
    ///
    /// 运行一步"写入-暂存-回收"。
    /// 若纪元无法推进（有活跃读者尚未观察到它），立即返回。
    /// 否则将 limbo 入口取出放入新暂存纪元的桶中，
    /// 并通过回收策略清空已宣布的 gc 纪元的桶——它是整整一个
    /// 宽限期之前暂存的。若该桶为空则重试，总共最多
    /// `EBR_EPOCHS` 次迭代。
    pub fn cycle(&mut self) {
        for _ in 0..EBR_EPOCHS {
            let gc_epoch = match self.ebr.sync() {
                Some(epoch) => epoch,
                None => return,
            };

            // Stage: move the limbo intake into the bucket of the epoch
            // that was just announced. The bucket must have been drained
            // two successful syncs ago.
            // 暂存：将 limbo 入口移入刚宣布的纪元的桶中。
            // 该桶在两次成功同步之前必定已被清空。
            let staging = self.ebr.staging_epoch() as usize;
            let chain = self.shared.limbo.swap(ptr::null_mut(), Ordering::AcqRel);
            debug_assert!(
                self.buckets[staging].is_null(),
                "BUG: staging bucket not drained"
            );
            self.buckets[staging] = chain;

            // Reclaim: the gc epoch's bucket is now provably unreferenced.
            // 回收：gc 纪元的桶现在可以证明无人引用。
            let bucket = &mut self.buckets[gc_epoch as usize];
            if bucket.is_null() {
                continue;
            }
            let chain = mem::replace(bucket, ptr::null_mut());
            self.run_reclaim(chain);
            return;
        }
    }

    /// Block until limbo and every bucket are empty.
    ///
    /// Each iteration runs [`cycle`](Self::cycle); while not yet drained,
    /// backs off with an exponential spin up to the backoff cap and then
    /// sleeps `msec_retry` milliseconds per iteration. A zero interval
    /// degrades to a yield hint rather than a tight spin.
    ///
    /// 阻塞直到 limbo 和每个桶都为空。
    /// 每次迭代运行 `cycle`；尚未排空时以指数自旋退避到上限，
    /// 然后每次迭代睡眠 `msec_retry` 毫秒。
    /// 零间隔退化为让出提示而不是紧自旋。
    pub fn full(&mut self, msec_retry: u64) {
        let backoff = Backoff::new();
        loop {
            self.cycle();
            if self.drained() {
                return;
            }
            if !backoff.is_completed() {
                backoff.snooze();
            } else if msec_retry == 0 {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_millis(msec_retry));
            }
        }
    }

    fn drained(&self) -> bool {
        self.shared.limbo.load(Ordering::Acquire).is_null()
            && self.buckets.iter().all(|bucket| bucket.is_null())
    }

    fn run_reclaim(&mut self, chain: *mut GcEntry) {
        let entry_off = self.shared.entry_off;
        match &mut self.reclaim {
            ReclaimKind::Chain(f) => f(chain),
            ReclaimKind::EachBoxed { dtor } => {
                let dtor = *dtor;
                let mut entry = chain;
                while !entry.is_null() {
                    // SAFETY: the chain was detached under the cycle
                    // serialisation after a full grace period; each entry
                    // sits at `entry_off` inside a Box<T> allocation per
                    // the free_boxed() contract.
                    unsafe {
                        let next = (*entry).next();
                        let obj = (entry as *mut u8).sub(entry_off) as *mut ();
                        dtor(obj);
                        entry = next;
                    }
                }
            }
        }
    }
}

impl Drop for GcHandle {
    /// Tearing down with pending work is a caller bug: run
    /// [`full`](Self::full) first. The objects would otherwise leak.
    ///
    /// 带着未完成的工作销毁是调用者的 bug：请先运行 `full`。
    /// 否则对象将泄漏。
    fn drop(&mut self) {
        debug_assert!(
            self.shared.limbo.load(Ordering::Relaxed).is_null(),
            "BUG: dropping a GcHandle with a non-empty limbo list"
        );
        debug_assert!(
            self.buckets.iter().all(|bucket| bucket.is_null()),
            "BUG: dropping a GcHandle with staged reclamation buckets"
        );
    }
}
