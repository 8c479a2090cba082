//! Counting semaphores.
//!
//! A semaphore is a non-negative counter. `down` (Dijkstra's P) waits until
//! the counter is positive and takes one unit; `up` (V) gives one back and
//! never blocks.
//!
//! The count check and the decision to sleep happen under the same raised
//! interrupt level that `up` needs to increment, so an `up` can never slip
//! in between "count is zero" and "asleep on the channel".

use alloc::string::String;
use core::cell::Cell;
use core::fmt;

use log::{debug, trace};

use crate::error::SyncError;
use crate::kernel::{Channel, Kernel};
use crate::name;

/// A named counting semaphore.
pub struct Semaphore<'k, K: Kernel> {
    name: String,
    /// Only read or written while an `Spl` from `kernel` is held.
    count: Cell<usize>,
    chan: Channel,
    kernel: &'k K,
}

// SAFETY: `count` is the only interior-mutable field and it is accessed
// exclusively under `kernel.splhigh()`, which the `Kernel` contract makes
// exclusive across threads and interrupt handlers.
unsafe impl<K: Kernel + Sync> Sync for Semaphore<'_, K> {}

impl<'k, K: Kernel> Semaphore<'k, K> {
    /// Create a semaphore with `initial_count` units available.
    pub fn create(kernel: &'k K, name: &str, initial_count: usize) -> Result<Self, SyncError> {
        let name = name::dup(name, "semaphore name")?;
        let chan = Channel::new();
        debug!("semaphore '{name}' created on {chan} (count {initial_count})");
        Ok(Self {
            name,
            count: Cell::new(initial_count),
            chan,
            kernel,
        })
    }

    /// Destroy the semaphore.
    ///
    /// Taking `self` by value means no other thread can still hold a
    /// reference. The sleeper check catches kernels that put threads to
    /// sleep on the channel behind the semaphore's back.
    ///
    /// # Panics
    /// If any thread is asleep on the semaphore.
    pub fn destroy(self) {
        let mut spl = self.kernel.splhigh();
        assert!(
            !self.kernel.has_sleepers(self.chan, &mut spl),
            "semaphore '{}' destroyed with threads asleep on it",
            self.name
        );
        drop(spl);
        debug!("semaphore '{}' destroyed", self.name);
    }

    /// P: wait until the count is positive, then decrement it.
    ///
    /// # Panics
    /// If called from an interrupt handler. This is checked even when the
    /// count is positive and no sleep would be needed.
    pub fn down(&self) {
        assert!(
            !self.kernel.in_interrupt(),
            "semaphore '{}': P from interrupt handler",
            self.name
        );

        let mut spl = self.kernel.splhigh();
        while self.count.get() == 0 {
            trace!("semaphore '{}': count 0, sleeping on {}", self.name, self.chan);
            spl = self.kernel.sleep(self.chan, spl);
        }
        let count = self.count.get();
        assert!(count > 0);
        self.count.set(count - 1);
        drop(spl);
    }

    /// Take one unit if one is available, without sleeping.
    ///
    /// Safe to call from interrupt handlers.
    pub fn try_down(&self) -> bool {
        let _spl = self.kernel.splhigh();
        match self.count.get() {
            0 => false,
            count => {
                self.count.set(count - 1);
                true
            }
        }
    }

    /// V: increment the count and wake every sleeper.
    ///
    /// All sleepers are woken, not one; each re-checks the count and all
    /// but the winners go back to sleep.
    ///
    /// # Panics
    /// If the count would overflow.
    pub fn up(&self) {
        let mut spl = self.kernel.splhigh();
        let Some(count) = self.count.get().checked_add(1) else {
            panic!("semaphore '{}': count overflow", self.name);
        };
        self.count.set(count);
        self.kernel.wakeup(self.chan, &mut spl);
        trace!("semaphore '{}': up to {count}", self.name);
    }

    /// Snapshot of the current count. Stale as soon as it is returned.
    pub fn count(&self) -> usize {
        let _spl = self.kernel.splhigh();
        self.count.get()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wait channel `down` sleeps on.
    pub fn channel(&self) -> Channel {
        self.chan
    }
}

impl<K: Kernel> fmt::Debug for Semaphore<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("chan", &self.chan)
            .finish_non_exhaustive()
    }
}
