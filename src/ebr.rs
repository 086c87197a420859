use crate::list::SlotList;
use crate::sync::{fence, Arc, AtomicU32, Ordering};
use std::cell::Cell;
use std::marker::PhantomData;

/// The number of epochs. Only three are needed: with a modulo-3 clock the
/// epoch ready for reclamation (e-2) is simply the next one, so callers can
/// size their own pending queues with this constant.
///
/// 纪元数量。只需要三个：在模 3 时钟下，可回收的纪元（e-2）
/// 正好是下一个纪元，调用者可以用此常量确定自己的待处理队列大小。
pub const EBR_EPOCHS: u32 = 3;

/// High bit of the reader word: set while the reader is inside its
/// critical section. The low bits hold the observed epoch, so the
/// "active and out of date" check is a single load-and-compare.
///
/// 读者字的高位：读者处于临界区时置位。
/// 低位保存观察到的纪元，因此"活跃且过时"的检查只需一次加载比较。
const ACTIVE: u32 = 0x8000_0000;

/// A slot recording one reader's observed epoch and ACTIVE flag, packed
/// into a single 32-bit word. Cache-aligned to prevent false sharing.
///
/// 记录单个读者观察到的纪元和 ACTIVE 标志的槽，打包进一个 32 位字。
/// 缓存对齐以防止伪共享。
#[repr(align(64))]
pub(crate) struct EbrSlot {
    epoch_active: AtomicU32,
}

struct EbrShared {
    /// The global epoch, always 0, 1 or 2.
    /// 全局纪元，始终为 0、1 或 2。
    global_epoch: AtomicU32,
    readers: SlotList<EbrSlot>,
}

/// An epoch-based reclamation (EBR) instance.
///
/// Readers bracket their accesses with [`EbrReader::enter`] /
/// [`EbrReader::exit`]. A single synchroniser ([`EbrHandle`]) advances the
/// global epoch with [`EbrHandle::sync`]; after a successful advance the
/// epoch reported by [`EbrHandle::gc_epoch`] is provably free of readers.
///
/// `EbrDomain` is `Clone`; clones share the instance and are handed to the
/// threads that need to register readers.
///
/// 基于纪元回收（EBR）的实例。
/// 读者用 `enter`/`exit` 包住其访问。唯一的同步者（`EbrHandle`）用
/// `sync` 推进全局纪元；成功推进后，`gc_epoch` 报告的纪元
/// 可被证明没有任何读者。
/// `EbrDomain` 是 `Clone` 的；克隆共享同一实例。
#[derive(Clone)]
pub struct EbrDomain {
    shared: Arc<EbrShared>,
}

impl EbrDomain {
    /// Create a new EBR instance.
    ///
    /// Returns the unique [`EbrHandle`] together with the domain. The
    /// handle is deliberately not `Clone`: synchronisation points must be
    /// serialised, and sole ownership plus `&mut self` enforces that at
    /// compile time.
    ///
    /// 创建一个新的 EBR 实例。
    /// 返回唯一的 `EbrHandle` 和域。句柄刻意不是 `Clone` 的：
    /// 同步点必须串行化，唯一所有权加 `&mut self` 在编译期强制了这一点。
    pub fn new() -> (EbrHandle, EbrDomain) {
        let shared = Arc::new(EbrShared {
            global_epoch: AtomicU32::new(0),
            readers: SlotList::new(),
        });

        let handle = EbrHandle {
            shared: Arc::clone(&shared),
        };

        (handle, EbrDomain { shared })
    }

    /// Register the calling worker and return its reader handle.
    /// 注册调用方工作线程并返回其读者句柄。
    pub fn register(&self) -> EbrReader {
        let slot = Arc::new(EbrSlot {
            epoch_active: AtomicU32::new(0),
        });
        self.shared.readers.insert(Arc::clone(&slot));
        EbrReader {
            slot,
            shared: Arc::clone(&self.shared),
            _not_sync: PhantomData,
        }
    }
}

/// A registered EBR reader.
///
/// `Send` but not `Sync`: the record is exclusively written by its owning
/// worker, read by the synchroniser. Critical sections do not nest.
///
/// 一个已注册的 EBR 读者。
/// `Send` 但不是 `Sync`：记录只由其所属工作线程写入，由同步者读取。
/// 临界区不可嵌套。
pub struct EbrReader {
    slot: Arc<EbrSlot>,
    shared: Arc<EbrShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl EbrReader {
    /// Mark the entrance of the critical path.
    ///
    /// Publishes `{epoch = global, ACTIVE}` into the reader's record, then
    /// issues a sequentially consistent fence so no load from the critical
    /// path can be reordered before the publication of the observed epoch.
    /// Wait-free: one store and one fence.
    ///
    /// 标记临界路径的入口。
    /// 将 `{epoch = 全局纪元, ACTIVE}` 发布到读者记录中，然后发出
    /// 顺序一致栅栏，使临界路径中的任何加载都不会重排到
    /// 观察纪元的发布之前。等待自由：一次存储加一次栅栏。
    #[inline]
    pub fn enter(&self) {
        debug_assert!(
            !self.in_critical(),
            "BUG: enter() inside a critical section; nesting is not supported"
        );

        let epoch = self.shared.global_epoch.load(Ordering::Acquire);
        self.slot.epoch_active.store(ACTIVE | epoch, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Mark the exit of the critical path.
    ///
    /// Issues a sequentially consistent fence first, so every store made
    /// inside the critical path is globally visible before the reader is
    /// considered inactive, then clears the record.
    ///
    /// 标记临界路径的出口。
    /// 先发出顺序一致栅栏，使临界路径内的所有存储在读者被视为
    /// 不活跃之前全局可见，然后清除记录。
    #[inline]
    pub fn exit(&self) {
        debug_assert!(
            self.in_critical(),
            "BUG: exit() without a matching enter()"
        );

        fence(Ordering::SeqCst);
        self.slot.epoch_active.store(0, Ordering::Relaxed);
    }

    /// Diagnostic: is this reader currently inside a critical section?
    /// 诊断：此读者当前是否处于临界区内？
    #[inline]
    pub fn in_critical(&self) -> bool {
        self.slot.epoch_active.load(Ordering::Relaxed) & ACTIVE != 0
    }

    /// Enter the critical path and return a guard that exits on drop.
    /// 进入临界路径并返回一个在 drop 时退出的守卫。
    #[inline]
    pub fn pin(&self) -> CritGuard<'_> {
        self.enter();
        CritGuard { reader: self }
    }
}

impl Drop for EbrReader {
    fn drop(&mut self) {
        debug_assert!(
            !self.in_critical(),
            "BUG: dropping an EbrReader inside a critical section"
        );
        self.slot.epoch_active.store(0, Ordering::Release);
    }
}

/// RAII guard for an EBR critical section, obtained from
/// [`EbrReader::pin`]. Exits the critical path when dropped. Not `Send`
/// and not `Clone` — critical sections do not nest.
///
/// EBR 临界区的 RAII 守卫，由 `pin` 获得。drop 时退出临界路径。
/// 不是 `Send` 也不是 `Clone` 的——临界区不可嵌套。
#[must_use]
pub struct CritGuard<'a> {
    reader: &'a EbrReader,
}

impl Drop for CritGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.reader.exit();
    }
}

/// The unique synchroniser for an EBR instance.
///
/// 一个 EBR 实例的唯一同步者。
pub struct EbrHandle {
    shared: Arc<EbrShared>,
}

impl EbrHandle {
    /// Attempt to synchronise and announce a new epoch.
    ///
    /// Snapshots the global epoch as `e`, issues a full fence, then scans
    /// the registry. If any active reader still reports an epoch other
    /// than `e`, returns `None` and nothing changes (the epoch that would
    /// be safe to drain is still [`gc_epoch`](Self::gc_epoch)). Otherwise
    /// the global epoch advances to `(e + 1) % 3` and the new gc epoch is
    /// returned.
    ///
    /// Let the announced epoch be `e`. At this point:
    ///
    /// - Active readers may still be running the critical path in the
    ///   `e-1` epoch, or may be entering a new critical path and
    ///   observing `e`.
    /// - Inactive readers may become active by entering and observing `e`.
    /// - No reader can still be running the critical path in `e-2`: a
    ///   reader that entered before the previous successful sync has
    ///   exited (or that sync would not have succeeded), and any reader
    ///   entering now observes `e-1` or `e`. With only three epochs there
    ///   is no ABA hazard, so `e-2` is the epoch ready for reclamation.
    ///
    /// 尝试同步并宣布一个新纪元。
    /// 将全局纪元快照为 `e`，发出完整栅栏，然后扫描注册表。
    /// 若有活跃读者报告的纪元不是 `e`，返回 `None` 且不做任何改变。
    /// 否则全局纪元推进到 `(e + 1) % 3` 并返回新的 gc 纪元。
    /// 设宣布的纪元为 `e`：不可能有读者仍在 `e-2` 的临界路径中——
    /// 在上次成功同步之前进入的读者已经退出（否则那次同步不会成功），
    /// 而现在进入的读者观察到的是 `e-1` 或 `e`。只有三个纪元时
    /// 不存在 ABA 风险，因此 `e-2` 就是可回收的纪元。
    pub fn sync(&mut self) -> Option<u32> {
        let epoch = self.shared.global_epoch.load(Ordering::Relaxed);
        fence(Ordering::SeqCst);

        for slot in self.shared.readers.iter() {
            let word = slot.epoch_active.load(Ordering::Acquire);
            if word & ACTIVE != 0 && word & !ACTIVE != epoch {
                // Not ready: an active reader has not observed `epoch` yet.
                // 尚未就绪：有活跃读者还没有观察到 `epoch`。
                return None;
            }
        }

        let new_epoch = (epoch + 1) % EBR_EPOCHS;
        self.shared.global_epoch.store(new_epoch, Ordering::Release);
        Some((new_epoch + 1) % EBR_EPOCHS)
    }

    /// The epoch new removals are currently staged under.
    /// 新移除当前暂存所在的纪元。
    #[inline]
    pub fn staging_epoch(&self) -> u32 {
        self.shared.global_epoch.load(Ordering::Relaxed)
    }

    /// The epoch known to be quiesced, i.e. safe to reclaim right now.
    /// Since there are only three epochs, `e-2` is just the next epoch
    /// under clock arithmetic.
    ///
    /// 已知静默、即现在可以安全回收的纪元。
    /// 因为只有三个纪元，`e-2` 在时钟算术下正好是下一个纪元。
    #[inline]
    pub fn gc_epoch(&self) -> u32 {
        (self.staging_epoch() + 1) % EBR_EPOCHS
    }
}
