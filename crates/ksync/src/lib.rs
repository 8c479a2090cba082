// =============================================================================
// ksync: Kernel Synchronization Primitives
// =============================================================================
//
// Sleeping synchronization for a single-core kernel:
//
//   Semaphore  - counting semaphore (P = down, V = up)
//   Lock       - non-recursive sleeping mutex with holder tracking
//   Condvar    - Mesa-style condition variable used with a Lock
//
// FOUNDATION:
//   There is no atomic read-modify-write to build on here. Exclusion comes
//   from raising the interrupt priority level (splhigh); on one core, with
//   interrupts masked, nothing else can run. Blocking comes from the
//   kernel's sleep channels. Both are provided by whoever implements the
//   `Kernel` trait:
//
//     ┌──────────────┐  ┌──────────┐  ┌──────────────┐
//     │  Semaphore   │  │   Lock   │◄─│   Condvar    │
//     └──────┬───────┘  └────┬─────┘  └──────┬───────┘
//            └───────────────┼───────────────┘
//                     ┌──────▼──────┐
//                     │   Kernel    │  splhigh / sleep / wakeup / curthread
//                     └─────────────┘
//
// The pattern every blocking operation follows:
//
//     let mut spl = kernel.splhigh();
//     while !condition() {
//         spl = kernel.sleep(chan, spl);   // gives up spl only while asleep
//     }
//     mutate();
//     drop(spl);                           // splx
//
// LOCK ORDER:
//   Never call into a primitive while holding an Spl. The primitives raise
//   the level themselves and guards do not nest on every Kernel.
//
// =============================================================================

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod arch;
pub mod condvar;
pub mod error;
#[cfg(any(test, feature = "std"))]
pub mod host;
pub mod kernel;
pub mod lock;
mod name;
pub mod semaphore;

pub use condvar::Condvar;
pub use error::SyncError;
pub use kernel::{Channel, Kernel, ThreadId};
pub use lock::{Lock, LockGuard};
pub use semaphore::Semaphore;
