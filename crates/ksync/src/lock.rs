//! Sleeping mutual-exclusion locks.
//!
//! A [`Lock`] is either free or held by exactly one thread. Acquirers that
//! find it held sleep on the lock's channel; `release` wakes all of them
//! and they race for it again under the raised interrupt level.
//!
//! Locks are not recursive. A thread that acquires a lock it already holds
//! sleeps forever.

use alloc::string::String;
use core::cell::Cell;
use core::fmt;

use log::{debug, trace};

use crate::error::SyncError;
use crate::kernel::{Channel, Kernel, ThreadId};
use crate::name;

/// A named sleeping lock with holder tracking.
pub struct Lock<'k, K: Kernel> {
    name: String,
    /// `None` when free. Only touched under an `Spl` from `kernel`.
    holder: Cell<Option<ThreadId>>,
    chan: Channel,
    kernel: &'k K,
}

// SAFETY: `holder` is only accessed while `kernel.splhigh()` is held.
unsafe impl<K: Kernel + Sync> Sync for Lock<'_, K> {}

impl<'k, K: Kernel> Lock<'k, K> {
    /// Create a free lock.
    pub fn create(kernel: &'k K, name: &str) -> Result<Self, SyncError> {
        let name = name::dup(name, "lock name")?;
        let chan = Channel::new();
        debug!("lock '{name}' created on {chan}");
        Ok(Self {
            name,
            holder: Cell::new(None),
            chan,
            kernel,
        })
    }

    /// Destroy the lock.
    ///
    /// # Panics
    /// If the lock is held, or any thread is asleep waiting for it.
    pub fn destroy(self) {
        let mut spl = self.kernel.splhigh();
        if let Some(holder) = self.holder.get() {
            panic!("lock '{}' destroyed while held by {holder}", self.name);
        }
        assert!(
            !self.kernel.has_sleepers(self.chan, &mut spl),
            "lock '{}' destroyed with threads asleep on it",
            self.name
        );
        drop(spl);
        debug!("lock '{}' destroyed", self.name);
    }

    /// Wait until the lock is free, then take it.
    pub fn acquire(&self) {
        let me = self.kernel.current_thread();
        let mut spl = self.kernel.splhigh();
        while let Some(holder) = self.holder.get() {
            trace!("lock '{}' held by {holder}; {me} sleeping", self.name);
            spl = self.kernel.sleep(self.chan, spl);
        }
        self.holder.set(Some(me));
        drop(spl);
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self) -> bool {
        let _spl = self.kernel.splhigh();
        if self.holder.get().is_some() {
            return false;
        }
        self.holder.set(Some(self.kernel.current_thread()));
        true
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&self) -> LockGuard<'_, 'k, K> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Free the lock and wake everyone waiting for it.
    ///
    /// The caller is not checked against the holder. Releasing a lock held
    /// by someone else breaks mutual exclusion for that holder.
    pub fn release(&self) {
        let mut spl = self.kernel.splhigh();
        self.release_locked(&mut spl);
    }

    /// `release` for callers that already raised the interrupt level.
    pub(crate) fn release_locked(&self, spl: &mut K::Spl<'_>) {
        self.holder.set(None);
        self.kernel.wakeup(self.chan, spl);
        trace!("lock '{}' released", self.name);
    }

    /// Whether the calling thread holds this lock.
    pub fn do_i_hold(&self) -> bool {
        let me = self.kernel.current_thread();
        let _spl = self.kernel.splhigh();
        self.holder.get() == Some(me)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wait channel `acquire` sleeps on.
    pub fn channel(&self) -> Channel {
        self.chan
    }

    pub(crate) fn kernel(&self) -> &'k K {
        self.kernel
    }
}

impl<K: Kernel> fmt::Debug for Lock<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("chan", &self.chan)
            .finish_non_exhaustive()
    }
}

/// RAII guard for a held [`Lock`].
///
/// The lock is released when the guard is dropped. The lock itself stays
/// reachable through the guard, so it can be handed to
/// [`Condvar::wait`](crate::Condvar::wait).
#[must_use = "dropping the guard immediately releases the lock"]
pub struct LockGuard<'a, 'k, K: Kernel> {
    lock: &'a Lock<'k, K>,
}

impl<'k, K: Kernel> LockGuard<'_, 'k, K> {
    /// The guarded lock.
    pub fn lock(&self) -> &Lock<'k, K> {
        self.lock
    }
}

impl<K: Kernel> Drop for LockGuard<'_, '_, K> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
