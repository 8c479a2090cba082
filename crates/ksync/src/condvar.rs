//! Condition variables.
//!
//! A [`Condvar`] carries no state of its own beyond its wait channel.
//! Waiters sleep on the channel; `signal` wakes one of them and `broadcast`
//! wakes all. Every operation requires the caller to hold the [`Lock`] it
//! passes in. The lock is chosen per call, not fixed at creation.
//!
//! Wakeups are not remembered. A signal with nobody waiting is lost, so
//! callers re-check their predicate in a loop:
//!
//! ```ignore
//! lock.acquire();
//! while !ready() {
//!     cv.wait(&lock);
//! }
//! lock.release();
//! ```

use alloc::string::String;
use core::{fmt, mem, ptr};

use log::{debug, trace};

use crate::error::SyncError;
use crate::kernel::{Channel, Kernel};
use crate::lock::Lock;
use crate::name;

/// A named condition variable.
pub struct Condvar<'k, K: Kernel> {
    name: String,
    chan: Channel,
    kernel: &'k K,
}

impl<'k, K: Kernel> Condvar<'k, K> {
    pub fn create(kernel: &'k K, name: &str) -> Result<Self, SyncError> {
        let name = name::dup(name, "condvar name")?;
        let chan = Channel::new();
        debug!("condvar '{name}' created on {chan}");
        Ok(Self { name, chan, kernel })
    }

    /// Destroy the condition variable.
    ///
    /// # Panics
    /// If any thread is still waiting on it.
    pub fn destroy(self) {
        let mut spl = self.kernel.splhigh();
        assert!(
            !self.kernel.has_sleepers(self.chan, &mut spl),
            "condvar '{}' destroyed with threads waiting on it",
            self.name
        );
        drop(spl);
        debug!("condvar '{}' destroyed", self.name);
    }

    /// Release `lock`, sleep until signalled, then reacquire `lock`.
    ///
    /// Releasing the lock and going to sleep happen under one raised
    /// interrupt level, so a signal sent by whoever takes the lock next
    /// cannot be missed. The caller holds `lock` again on return, whether
    /// it was woken by `signal`, `broadcast` or spuriously.
    ///
    /// # Panics
    /// If the caller does not hold `lock`, or `lock` belongs to a different
    /// kernel than this condition variable. Kernel identity is the address
    /// of the `K` value (a `static` on bare metal); for a zero-sized `K`
    /// all values count as the same kernel.
    pub fn wait(&self, lock: &Lock<'k, K>) {
        self.assert_holds(lock, "wait");
        // The lock's holder is guarded by its own kernel's spl, which is
        // the one raised below only if both share a kernel. Zero-sized
        // kernels keep their state in globals, so every value is the same
        // kernel and addresses say nothing.
        assert!(
            mem::size_of::<K>() == 0 || ptr::eq(self.kernel, lock.kernel()),
            "condvar '{}': lock '{}' belongs to a different kernel",
            self.name,
            lock.name()
        );

        let mut spl = self.kernel.splhigh();
        lock.release_locked(&mut spl);
        trace!("condvar '{}': waiting on {}", self.name, self.chan);
        let spl = self.kernel.sleep(self.chan, spl);
        drop(spl);

        lock.acquire();
    }

    /// Wake at most one waiter. Does not touch `lock`.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn signal(&self, lock: &Lock<'k, K>) {
        self.assert_holds(lock, "signal");
        let mut spl = self.kernel.splhigh();
        self.kernel.wakeone(self.chan, &mut spl);
    }

    /// Wake every waiter. Does not touch `lock`.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock<'k, K>) {
        self.assert_holds(lock, "broadcast");
        let mut spl = self.kernel.splhigh();
        self.kernel.wakeup(self.chan, &mut spl);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wait channel `wait` sleeps on.
    pub fn channel(&self) -> Channel {
        self.chan
    }

    fn assert_holds(&self, lock: &Lock<'k, K>, op: &str) {
        assert!(
            lock.do_i_hold(),
            "condvar '{}': {op} without holding lock '{}'",
            self.name,
            lock.name()
        );
    }
}

impl<K: Kernel> fmt::Debug for Condvar<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("name", &self.name)
            .field("chan", &self.chan)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostKernel;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn wait_releases_and_reacquires() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "ready").unwrap();

        thread::scope(|s| {
            let a = s.spawn(|| {
                lock.acquire();
                cv.wait(&lock);
                let held = lock.do_i_hold();
                lock.release();
                held
            });
            kernel.wait_for_sleepers(cv.channel(), 1);

            // A is asleep inside wait, so the lock must be free.
            assert!(lock.try_acquire());
            cv.broadcast(&lock);
            lock.release();

            assert!(a.join().unwrap());
        });

        cv.destroy();
        lock.destroy();
    }

    #[test]
    fn signal_wakes_one_broadcast_wakes_rest() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "event").unwrap();
        let woken = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    lock.acquire();
                    cv.wait(&lock);
                    woken.fetch_add(1, Ordering::SeqCst);
                    lock.release();
                });
            }
            kernel.wait_for_sleepers(cv.channel(), 3);

            lock.acquire();
            cv.signal(&lock);
            lock.release();
            while woken.load(Ordering::SeqCst) != 1 {
                thread::yield_now();
            }
            assert_eq!(kernel.sleeping_on(cv.channel()), 2);

            lock.acquire();
            cv.broadcast(&lock);
            lock.release();
        });

        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn signal_without_waiters_is_lost() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "nobody").unwrap();

        lock.acquire();
        cv.signal(&lock);
        cv.broadcast(&lock);
        lock.release();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                lock.acquire();
                cv.wait(&lock);
                lock.release();
            });
            // The earlier signals must not let this wait fall through.
            kernel.wait_for_sleepers(cv.channel(), 1);
            assert!(!waiter.is_finished());

            lock.acquire();
            cv.signal(&lock);
            lock.release();
        });
    }

    #[test]
    fn producer_consumer_monitor() {
        const ITEMS: usize = 300;
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "buffer").unwrap();
        let nonempty = Condvar::create(&kernel, "nonempty").unwrap();
        // Only read or written while `lock` is held.
        let items = AtomicUsize::new(0);
        let consumed = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..ITEMS {
                        lock.acquire();
                        while items.load(Ordering::Relaxed) == 0 {
                            nonempty.wait(&lock);
                        }
                        items.fetch_sub(1, Ordering::Relaxed);
                        consumed.fetch_add(1, Ordering::Relaxed);
                        lock.release();
                    }
                });
            }
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..ITEMS {
                        let guard = lock.lock();
                        items.fetch_add(1, Ordering::Relaxed);
                        nonempty.signal(guard.lock());
                    }
                });
            }
        });

        assert_eq!(consumed.load(Ordering::Relaxed), 2 * ITEMS);
        assert_eq!(items.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn one_condvar_many_locks() {
        let kernel = HostKernel::new();
        let first = Lock::create(&kernel, "first").unwrap();
        let second = Lock::create(&kernel, "second").unwrap();
        let cv = Condvar::create(&kernel, "shared").unwrap();

        first.acquire();
        cv.signal(&first);
        first.release();

        second.acquire();
        cv.broadcast(&second);
        second.release();
    }

    #[test]
    #[should_panic(expected = "wait without holding lock")]
    fn wait_without_lock_is_fatal() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "cv").unwrap();
        cv.wait(&lock);
    }

    #[test]
    #[should_panic(expected = "signal without holding lock")]
    fn signal_without_lock_is_fatal() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "cv").unwrap();
        cv.signal(&lock);
    }

    #[test]
    fn broadcast_with_lock_held_elsewhere_is_fatal() {
        let kernel = HostKernel::new();
        let lock = Lock::create(&kernel, "monitor").unwrap();
        let cv = Condvar::create(&kernel, "cv").unwrap();
        lock.acquire();

        let outcome = thread::scope(|s| {
            s.spawn(|| {
                panic::catch_unwind(AssertUnwindSafe(|| cv.broadcast(&lock))).is_err()
            })
            .join()
            .unwrap()
        });
        assert!(outcome);
        lock.release();
    }

    #[test]
    #[should_panic(expected = "different kernel")]
    fn wait_across_kernels_is_fatal() {
        let (here, there) = (HostKernel::new(), HostKernel::new());
        let lock = Lock::create(&there, "foreign").unwrap();
        let cv = Condvar::create(&here, "local").unwrap();
        lock.acquire();
        cv.wait(&lock);
    }

    /// A kernel whose state lives in globals, borrowing the host guard.
    struct GlobalKernel;

    static GLOBAL_HOST: std::sync::LazyLock<HostKernel> = std::sync::LazyLock::new(HostKernel::new);

    // SAFETY: every call forwards to the one shared HostKernel.
    unsafe impl Kernel for GlobalKernel {
        type Spl<'a>
            = crate::host::HostSpl<'static>
        where
            Self: 'a;

        fn current_thread(&self) -> crate::ThreadId {
            GLOBAL_HOST.current_thread()
        }

        fn in_interrupt(&self) -> bool {
            GLOBAL_HOST.in_interrupt()
        }

        fn splhigh(&self) -> crate::host::HostSpl<'static> {
            GLOBAL_HOST.splhigh()
        }

        fn sleep<'a>(
            &'a self,
            chan: Channel,
            spl: crate::host::HostSpl<'static>,
        ) -> crate::host::HostSpl<'static> {
            GLOBAL_HOST.sleep(chan, spl)
        }

        fn wakeone(&self, chan: Channel, spl: &mut crate::host::HostSpl<'static>) {
            GLOBAL_HOST.wakeone(chan, spl)
        }

        fn wakeup(&self, chan: Channel, spl: &mut crate::host::HostSpl<'static>) {
            GLOBAL_HOST.wakeup(chan, spl)
        }

        fn has_sleepers(&self, chan: Channel, spl: &mut crate::host::HostSpl<'static>) -> bool {
            GLOBAL_HOST.has_sleepers(chan, spl)
        }
    }

    #[test]
    fn zero_sized_kernels_share_identity() {
        let (a, b) = (GlobalKernel, GlobalKernel);
        let lock = Lock::create(&a, "global").unwrap();
        let cv = Condvar::create(&b, "global").unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                lock.acquire();
                cv.wait(&lock);
                let held = lock.do_i_hold();
                lock.release();
                held
            });
            GLOBAL_HOST.wait_for_sleepers(cv.channel(), 1);

            lock.acquire();
            cv.signal(&lock);
            lock.release();
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn destroy_with_waiter_is_fatal() {
        let kernel = HostKernel::new();
        let cv = Condvar::create(&kernel, "busy").unwrap();
        let chan = cv.channel();

        thread::scope(|s| {
            s.spawn(|| {
                let spl = kernel.splhigh();
                drop(kernel.sleep(chan, spl));
            });
            kernel.wait_for_sleepers(chan, 1);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| cv.destroy()));

            let mut spl = kernel.splhigh();
            kernel.wakeup(chan, &mut spl);
            drop(spl);
            assert!(outcome.is_err());
        });
    }
}
