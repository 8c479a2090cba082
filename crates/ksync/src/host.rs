// =============================================================================
// ksync: Host Kernel (std threads)
// =============================================================================
//
// A `Kernel` implementation for running the primitives on a hosted OS,
// mainly so they can be unit-tested without a scheduler.
//
// MAPPING:
//   splhigh()      → lock one mutex per HostKernel ("the interrupt level")
//   drop(Spl)      → unlock it
//   sleep(chan)    → enqueue a ticket on chan, then Condvar::wait while the
//                    ticket is still queued (atomic unlock-and-block)
//   wakeone(chan)  → dequeue the oldest ticket on chan, notify_all
//   wakeup(chan)   → dequeue every ticket on chan, notify_all
//   curthread      → a ThreadId assigned lazily per OS thread
//   in_interrupt   → a thread-local flag set by `HostKernel::interrupt`
//
// Host threads really do run in parallel outside guarded sections, which
// is stricter than a uniprocessor: any interleaving bug shows up sooner.
//
// =============================================================================

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::kernel::{Channel, Kernel, ThreadId};

/// Next host thread number. Shared by all HostKernels so identities never
/// collide across kernels.
static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT: ThreadId = match ThreadId::new(NEXT_THREAD.fetch_add(1, Ordering::Relaxed)) {
        Some(id) => id,
        None => panic!("host thread counter wrapped"),
    };
    static IN_INTERRUPT: Cell<bool> = const { Cell::new(false) };
}

/// One queued sleeper.
#[derive(Debug, Clone, Copy)]
struct Sleeper {
    ticket: u64,
    thread: ThreadId,
}

/// State protected by the simulated interrupt level.
#[derive(Debug, Default)]
struct Cpu {
    /// Sleepers per channel in arrival order. Empty queues are removed.
    sleepers: BTreeMap<Channel, VecDeque<Sleeper>>,
    next_ticket: u64,
}

impl Cpu {
    fn is_asleep(&self, chan: Channel, ticket: u64) -> bool {
        self.sleepers
            .get(&chan)
            .is_some_and(|queue| queue.iter().any(|s| s.ticket == ticket))
    }
}

/// Raised interrupt level on a [`HostKernel`].
#[must_use = "dropping the Spl immediately lowers the interrupt level"]
pub struct HostSpl<'a> {
    cpu: MutexGuard<'a, Cpu>,
}

/// A `Kernel` backed by std threads.
#[derive(Debug, Default)]
pub struct HostKernel {
    cpu: Mutex<Cpu>,
    runnable: Condvar,
}

impl HostKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as though it were an interrupt handler on this thread.
    ///
    /// The flag is restored even if `f` panics.
    pub fn interrupt<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(bool);
        impl Drop for Restore {
            fn drop(&mut self) {
                IN_INTERRUPT.with(|flag| flag.set(self.0));
            }
        }

        let _restore = Restore(IN_INTERRUPT.with(|flag| flag.replace(true)));
        f()
    }

    /// Number of threads asleep on `chan` right now.
    ///
    /// Lets tests wait until a thread has actually blocked before waking it.
    pub fn sleeping_on(&self, chan: Channel) -> usize {
        let cpu = self.cpu.lock().unwrap_or_else(PoisonError::into_inner);
        cpu.sleepers.get(&chan).map_or(0, VecDeque::len)
    }

    /// Spin (yielding) until exactly `n` threads sleep on `chan`.
    pub fn wait_for_sleepers(&self, chan: Channel, n: usize) {
        while self.sleeping_on(chan) != n {
            std::thread::yield_now();
        }
    }
}

// SAFETY: every `HostSpl` owns the guard of `self.cpu`, so at most one
// exists per HostKernel at a time. `sleep` only gives the mutex up inside
// `Condvar::wait` and holds it again when that returns.
unsafe impl Kernel for HostKernel {
    type Spl<'a>
        = HostSpl<'a>
    where
        Self: 'a;

    fn current_thread(&self) -> ThreadId {
        CURRENT.with(|id| *id)
    }

    fn in_interrupt(&self) -> bool {
        IN_INTERRUPT.with(Cell::get)
    }

    fn splhigh(&self) -> HostSpl<'_> {
        HostSpl {
            cpu: self.cpu.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn sleep<'a>(&'a self, chan: Channel, spl: HostSpl<'a>) -> HostSpl<'a> {
        let mut cpu = spl.cpu;
        let ticket = cpu.next_ticket;
        cpu.next_ticket += 1;
        let thread = self.current_thread();
        cpu.sleepers
            .entry(chan)
            .or_default()
            .push_back(Sleeper { ticket, thread });
        trace!("{thread} sleeping on {chan}");

        // Not `wait_while`: that bails out on the first poisoned wait, and a
        // panicking thread elsewhere must not look like a wakeup here.
        while cpu.is_asleep(chan, ticket) {
            cpu = self.runnable.wait(cpu).unwrap_or_else(PoisonError::into_inner);
        }
        trace!("{thread} woke on {chan}");
        HostSpl { cpu }
    }

    fn wakeone(&self, chan: Channel, spl: &mut HostSpl<'_>) {
        let cpu = &mut *spl.cpu;
        let Some(queue) = cpu.sleepers.get_mut(&chan) else {
            return;
        };
        if let Some(sleeper) = queue.pop_front() {
            trace!("waking {} on {chan}", sleeper.thread);
        }
        if queue.is_empty() {
            cpu.sleepers.remove(&chan);
        }
        self.runnable.notify_all();
    }

    fn wakeup(&self, chan: Channel, spl: &mut HostSpl<'_>) {
        if let Some(queue) = spl.cpu.sleepers.remove(&chan) {
            trace!("waking {} sleeper(s) on {chan}", queue.len());
            self.runnable.notify_all();
        }
    }

    fn has_sleepers(&self, chan: Channel, spl: &mut HostSpl<'_>) -> bool {
        spl.cpu.sleepers.contains_key(&chan)
    }
}
