use crate::list::SlotList;
use crate::sync::{fence, Arc, AtomicU64, Ordering};
use std::cell::Cell;
use std::marker::PhantomData;

/// Generation published by a reader that has left the instance.
///
/// The global generation is 64-bit and treated as non-wrapping, so no live
/// barrier target can ever exceed this value and a departed reader can
/// never stall a synchronisation scan.
///
/// 已离开实例的读者发布的世代值。
/// 全局世代是 64 位且视为不会回绕，因此任何屏障目标都不会超过此值，
/// 已离开的读者也永远不会阻塞同步扫描。
const OFFLINE_GEN: u64 = u64::MAX;

/// A slot allocated for a reader to record its last observed generation.
///
/// Cache-aligned to prevent false sharing between readers.
///
/// 为读者分配的槽，用于记录其最后观察到的世代。
/// 缓存对齐以防止读者之间的伪共享。
#[repr(align(64))]
pub(crate) struct QsbrSlot {
    /// The generation observed at the reader's last checkpoint.
    /// 读者上次检查点时观察到的世代。
    local_gen: AtomicU64,
}

struct QsbrShared {
    /// The global monotone generation counter, starts at 1.
    /// 全局单调世代计数器，从 1 开始。
    global_gen: AtomicU64,
    readers: SlotList<QsbrSlot>,
}

/// A quiescent-state based reclamation (QSBR) instance.
///
/// Each participating reader registers once and then periodically calls
/// [`QsbrReader::checkpoint`] at a point where it holds no references to
/// reclaimable objects. A writer that has unpublished objects issues
/// [`QsbrDomain::barrier`] and may destroy them once
/// [`QsbrReader::sync`] reports the returned target observed by everyone.
///
/// `QsbrDomain` is `Clone`; clones share the same instance and are
/// typically handed to the threads that need to register.
///
/// 基于静默状态回收（QSBR）的实例。
/// 每个参与的读者注册一次，然后在不持有任何可回收对象引用的时刻
/// 周期性地调用 `checkpoint`。写入者在对象不再可见后调用 `barrier`，
/// 当 `sync` 报告所有读者都观察到目标世代时即可销毁对象。
/// `QsbrDomain` 是 `Clone` 的；克隆共享同一实例。
#[derive(Clone)]
pub struct QsbrDomain {
    shared: Arc<QsbrShared>,
}

impl QsbrDomain {
    /// Create a new QSBR instance with no registered readers.
    /// 创建一个没有已注册读者的新 QSBR 实例。
    pub fn new() -> Self {
        QsbrDomain {
            shared: Arc::new(QsbrShared {
                global_gen: AtomicU64::new(1),
                readers: SlotList::new(),
            }),
        }
    }

    /// Register the calling worker and return its reader handle.
    ///
    /// The handle owns a fresh zeroed record published into the instance
    /// registry. Each worker keeps exactly one handle; the handle is `Send`
    /// but not `Sync` — the record is exclusively written by its owner.
    ///
    /// 注册调用方工作线程并返回其读者句柄。
    /// 句柄拥有一个新的清零记录，发布到实例注册表中。
    /// 每个工作线程保留恰好一个句柄；句柄是 `Send` 但不是 `Sync` 的。
    pub fn register(&self) -> QsbrReader {
        let slot = Arc::new(QsbrSlot {
            local_gen: AtomicU64::new(0),
        });
        self.shared.readers.insert(Arc::clone(&slot));
        QsbrReader {
            slot,
            shared: Arc::clone(&self.shared),
            _not_sync: PhantomData,
        }
    }

    /// Issue a reclamation barrier and return the target generation.
    ///
    /// Atomically increments the global generation; the returned target is
    /// the post-increment value. The atomic increment itself serves as the
    /// store barrier for the unpublishing stores that preceded it.
    ///
    /// 发出回收屏障并返回目标世代。
    /// 原子地递增全局世代；返回值是递增后的值。
    /// 原子递增本身就是之前"取消发布"存储的存储屏障。
    #[inline]
    pub fn barrier(&self) -> u64 {
        self.shared.global_gen.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for QsbrDomain {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered QSBR reader.
///
/// Dropping the reader publishes the offline sentinel so the record never
/// holds back a barrier; the record itself is released when the instance
/// drops. A reader must be quiescent when it is dropped.
///
/// 一个已注册的 QSBR 读者。
/// drop 读者会发布离线哨兵值，使该记录不再阻碍任何屏障；
/// 记录本身在实例 drop 时释放。读者在被 drop 时必须处于静默状态。
pub struct QsbrReader {
    slot: Arc<QsbrSlot>,
    shared: Arc<QsbrShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl QsbrReader {
    /// Advertise a quiescent state: publish the current global generation
    /// into this reader's record.
    ///
    /// The fence pair makes this a full barrier as observed by the caller:
    /// reads after the checkpoint cannot move before it, and stores before
    /// it are globally visible once the new local generation is.
    ///
    /// 宣告静默状态：将当前全局世代发布到此读者的记录中。
    /// 这对栅栏使其在调用者看来是一个完整屏障。
    #[inline]
    pub fn checkpoint(&self) {
        fence(Ordering::Acquire);
        let gen = self.shared.global_gen.load(Ordering::Relaxed);
        self.slot.local_gen.store(gen, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Check whether every registered reader has observed `target`.
    ///
    /// Checkpoints the calling reader first (it must not hold back its own
    /// barrier), then scans the registry. Read-only with respect to the
    /// global generation; concurrent `sync` calls need no serialisation.
    /// Returns `false` if any reader still lags — the caller retries later,
    /// typically from a backoff loop.
    ///
    /// 检查是否每个已注册读者都观察到了 `target`。
    /// 先对调用读者做检查点（它不能阻碍自己的屏障），然后扫描注册表。
    /// 对全局世代是只读的；并发 `sync` 调用无需串行化。
    pub fn sync(&self, target: u64) -> bool {
        self.checkpoint();

        self.shared
            .readers
            .iter()
            .all(|slot| slot.local_gen.load(Ordering::Acquire) >= target)
    }
}

impl Drop for QsbrReader {
    fn drop(&mut self) {
        self.slot.local_gen.store(OFFLINE_GEN, Ordering::Release);
    }
}
