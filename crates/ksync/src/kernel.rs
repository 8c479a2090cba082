// =============================================================================
// ksync: Kernel Interface
// =============================================================================
//
// The primitives in this crate own almost nothing. Everything they need from
// the rest of the kernel comes through the `Kernel` trait:
//
//   - Thread identity      "who is running right now?"
//   - Interrupt context    "are we inside a handler?"
//   - Interrupt priority   splhigh() → Spl, drop(Spl) == splx
//   - Sleep channels       sleep / wakeone / wakeup / has_sleepers
//
// WHY A TRAIT (and not globals like `curthread`)?
//   The scheduler and interrupt controller live elsewhere. Passing the
//   kernel as an explicit handle lets the same Semaphore/Lock/Condvar code
//   run against the real scheduler on bare metal and against `HostKernel`
//   (std threads) in unit tests.
//
// THE SPL CONTRACT:
//   Holding an `Spl` means nothing else that uses this kernel can run:
//   no other thread, no interrupt handler. On a uniprocessor that is what
//   masking interrupts buys you. `sleep` is the only place the guard is
//   given up while the caller still logically holds it: the thread is
//   suspended, others run, and the guard is handed back before `sleep`
//   returns.
//
// =============================================================================

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of a kernel thread.
///
/// Non-zero so that `Option<ThreadId>` (a lock's holder) is pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    /// Wrap a raw thread number. Returns `None` for zero.
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

/// Monotonically increasing channel counter. Zero is never handed out.
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// A wait channel: the identity threads sleep on and wakers target.
///
/// Each Semaphore, Lock and Condvar allocates one at creation. A counter
/// is used instead of the object's address because Rust values move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(NonZeroU64);

impl Channel {
    /// Allocate a fresh, never-before-used channel.
    pub fn new() -> Self {
        let raw = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would need 2^64 creations to wrap.
        match NonZeroU64::new(raw) {
            Some(id) => Self(id),
            None => panic!("wait channel counter wrapped"),
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan#{}", self.0)
    }
}

/// Services the synchronization primitives consume from the kernel.
///
/// # Safety
///
/// Implementors guarantee that while an `Spl` returned by
/// [`splhigh`](Kernel::splhigh) is alive, no other thread and no interrupt
/// handler can observe or mutate state guarded by the same kernel. The
/// primitives keep their counters in `Cell`s and rely on this for
/// soundness. `sleep` must re-establish that exclusion before returning.
pub unsafe trait Kernel {
    /// Raised interrupt priority. Dropping it restores the previous level.
    type Spl<'a>
    where
        Self: 'a;

    /// Identity of the calling thread.
    fn current_thread(&self) -> ThreadId;

    /// True while executing an interrupt handler.
    fn in_interrupt(&self) -> bool;

    /// Raise the interrupt priority to the maximum.
    fn splhigh(&self) -> Self::Spl<'_>;

    /// Suspend the calling thread on `chan` until a `wakeone`/`wakeup`
    /// selects it. The guard is surrendered while asleep and is held again
    /// when this returns.
    fn sleep<'a>(&'a self, chan: Channel, spl: Self::Spl<'a>) -> Self::Spl<'a>;

    /// Make at most one thread sleeping on `chan` runnable.
    fn wakeone(&self, chan: Channel, spl: &mut Self::Spl<'_>);

    /// Make every thread sleeping on `chan` runnable.
    fn wakeup(&self, chan: Channel, spl: &mut Self::Spl<'_>);

    /// Whether any thread is currently asleep on `chan`.
    fn has_sleepers(&self, chan: Channel, spl: &mut Self::Spl<'_>) -> bool;
}
