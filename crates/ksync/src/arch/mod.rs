//! Architecture-specific interrupt guards.
//!
//! A bare-metal kernel implements [`Kernel`](crate::Kernel) with one of
//! these as its `Spl` type; the hosted build uses
//! [`HostKernel`](crate::host::HostKernel) instead.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
