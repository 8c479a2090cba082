//! Fallible name duplication.

use alloc::string::String;

use crate::error::SyncError;

/// Copy `name` into a freshly allocated `String`.
///
/// Uses `try_reserve_exact` so heap exhaustion surfaces as an error instead
/// of the global allocation-failure handler halting the kernel.
pub(crate) fn dup(name: &str, what: &'static str) -> Result<String, SyncError> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(name.len())
        .map_err(|source| SyncError::OutOfMemory { what, source })?;
    owned.push_str(name);
    Ok(owned)
}
