//! Safe deferred reclamation for lock-free, multi-threaded code.
//!
//! Two primitives and a facade:
//!
//! - [`QsbrDomain`] — quiescent-state based reclamation (QSBR): a monotone
//!   global generation, readers advertising quiescence with
//!   [`QsbrReader::checkpoint`], writers issuing [`QsbrDomain::barrier`]
//!   and polling [`QsbrReader::sync`].
//! - [`EbrDomain`] — epoch-based reclamation (EBR): three epochs, explicit
//!   reader critical sections ([`EbrReader::enter`]/[`EbrReader::exit`]),
//!   a serialised [`EbrHandle::sync`] that advances the epoch once every
//!   active reader has observed it.
//! - [`GcDomain`] — a garbage-collection facade on top of EBR: objects
//!   embedding a [`GcEntry`] linkage go through a lock-free limbo inbox
//!   and per-epoch buckets, and are handed to a reclaim strategy once
//!   their grace period has provably elapsed.
//!
//! The reader fast paths are wait-free (one atomic store plus one fence);
//! only the drainer side walks the registry.
//!
//! # Example
//!
//! ```
//! use memoffset::offset_of;
//! use qsbr_epoch::{GcDomain, GcEntry};
//!
//! struct Node {
//!     value: u64,
//!     entry: GcEntry,
//! }
//!
//! let (mut gc, domain) = GcDomain::builder()
//!     .entry_offset(offset_of!(Node, entry))
//!     .free_boxed::<Node>()
//!     .build();
//!
//! let reader = domain.register();
//!
//! let node = Box::into_raw(Box::new(Node {
//!     value: 7,
//!     entry: GcEntry::new(),
//! }));
//!
//! // Reader side: bracket accesses to shared objects.
//! reader.crit_enter();
//! // ... load shared pointers, dereference ...
//! reader.crit_exit();
//!
//! // Writer side: unpublish the object, hand it over, drain.
//! unsafe { domain.limbo(node as *mut ()) };
//! gc.full(1);
//! ```
//!
//! 面向无锁多线程代码的安全延迟回收。
//! 两个原语加一个外观：QSBR（静默状态回收）、EBR（三纪元回收）
//! 和构建在 EBR 之上的垃圾回收外观。
//! 读者快速路径是等待自由的（一次原子存储加一次栅栏）。
//!
//! # Model checking
//!
//! The synchronisation cores are checked with `loom`:
//! `RUSTFLAGS="--cfg loom" cargo test --test loom_tests --release`

mod ebr;
mod gc;
mod list;
mod qsbr;
mod sync;

pub use ebr::{CritGuard, EbrDomain, EbrHandle, EbrReader, EBR_EPOCHS};
pub use gc::{GcBuilder, GcDomain, GcEntry, GcHandle, GcReader};
pub use qsbr::{QsbrDomain, QsbrReader};

#[cfg(all(test, not(loom)))]
mod tests;
