//! Recoverable errors.
//!
//! Only resource exhaustion is recoverable. Contract violations (waiting on
//! a condition variable without its lock, P from an interrupt handler,
//! destroying a primitive somebody still sleeps on) are kernel bugs and
//! panic instead.

use alloc::collections::TryReserveError;

/// Errors returned by the `create` constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The heap could not satisfy an allocation made while creating a
    /// primitive. Nothing was leaked.
    #[error("out of memory allocating {what}")]
    OutOfMemory {
        /// What was being allocated, e.g. "semaphore name".
        what: &'static str,
        #[source]
        source: TryReserveError,
    },
}
