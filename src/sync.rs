//! # Critical Sections
//!
//! Interrupt-safe access to the scheduler state. Everything that can
//! cause a task switch — the tick interrupt, the application interrupts
//! posting events — must be masked while scheduler state is mutated, and
//! this wrapper masks exactly that set by disabling interrupts via
//! PRIMASK.
//!
//! `cortex_m::interrupt::free` saves the prior mask value and restores it
//! on exit, so nesting is safe; the kernel itself never nests critical
//! sections and keeps each one short to bound interrupt latency.

use cortex_m::interrupt;

/// Execute a closure with interrupts masked.
///
/// This is the only mechanism through which kernel and application code
/// may touch shared scheduler state. On Cortex-M the cost is a pair of
/// PRIMASK accesses; keep the enclosed work short.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
