// =============================================================================
// ksync: Interrupt Priority Guard (x86_64)
// =============================================================================
//
// x86_64 has no interrupt priority levels in the BSD sense. "splhigh" is
// simply clearing RFLAGS.IF: once CLI executes, no maskable interrupt is
// delivered on this core, and since the scheduler only preempts from the
// timer interrupt, no other thread runs either. On a uniprocessor that is
// full mutual exclusion.
//
// NESTING:
//   The guard remembers whether IF was set when it was raised and only
//   re-enables interrupts on drop if it was. Inner guards therefore leave
//   interrupts masked for the outer guard:
//
//     let a = splhigh();   // IF 1 → 0, remembers "was enabled"
//     let b = splhigh();   // IF 0 → 0, remembers "was disabled"
//     drop(b);             // stays 0
//     drop(a);             // back to 1
//
// NMIs and machine checks are not maskable and are not excluded.
//
// =============================================================================

use ::x86_64::instructions::interrupts;

/// RAII guard for a raised interrupt level.
///
/// Interrupts are masked for the guard's lifetime and restored to their
/// previous state when it is dropped.
#[must_use = "dropping the guard immediately restores the interrupt level"]
pub struct SplHigh {
    /// Whether IF was set before this guard masked interrupts.
    irq_was_enabled: bool,
}

impl SplHigh {
    /// Mask maskable interrupts on this core.
    #[inline(always)]
    pub fn raise() -> Self {
        let irq_was_enabled = interrupts::are_enabled();
        interrupts::disable();
        Self { irq_was_enabled }
    }
}

impl Drop for SplHigh {
    #[inline(always)]
    fn drop(&mut self) {
        if self.irq_was_enabled {
            interrupts::enable();
        }
    }
}

/// Raise the interrupt priority to the maximum.
///
/// Shorthand for [`SplHigh::raise`], named after the classic BSD call.
#[inline(always)]
pub fn splhigh() -> SplHigh {
    SplHigh::raise()
}
