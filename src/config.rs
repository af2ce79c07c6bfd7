//! # Vectos Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — no dynamic allocation. Adjust them together with the
//! task table of the application; a mismatch is caught by the const
//! guards below or by debug assertions at initialization time.

use crate::time::TickCount;

/// Number of configured tasks. Tasks aren't created dynamically; this
/// number of tasks is always existent and alive. Permitted range is
/// 1..=255. The implicit idle task is *not* counted here; it occupies the
/// extra TCB slot at index `NUM_TASKS`.
pub const NUM_TASKS: usize = 5;

/// Number of distinct priority classes. Several tasks may share a class,
/// so this is at most `NUM_TASKS`. Class 0 is the lowest priority; higher
/// class values preempt lower ones.
pub const NUM_PRIO_CLASSES: usize = 3;

/// Upper bound on the number of tasks sharing one priority class. Used to
/// size the statically allocated ready lists; set as low as possible.
pub const MAX_TASKS_IN_PRIO_CLASS: usize = 3;

/// Number of low broadcast event bits reinterpreted as mutex bits.
/// Mutex `i` is event bit `i`. Permitted range 0..=8.
pub const NUM_MUTEX_EVENTS: usize = 2;

/// Number of broadcast event bits, directly above the mutex bits,
/// reinterpreted as counting-semaphore bits. Semaphore `i` is event bit
/// `NUM_MUTEX_EVENTS + i`. Permitted range 0..=8.
pub const NUM_SEMAPHORE_EVENTS: usize = 2;

/// Bind event bit 12 to the application-defined interrupt 0. When set,
/// the application supplies the interrupt enabler hook at start and posts
/// `EVT_ISR_USER_00` from its handler.
pub const USE_APPL_INTERRUPT_00: bool = false;

/// Bind event bit 13 to the application-defined interrupt 1.
pub const USE_APPL_INTERRUPT_01: bool = false;

/// Round-robin time slicing within a priority class, surfaced from the
/// cargo feature so kernel code can branch on a plain const.
pub const ROUND_ROBIN: bool = cfg!(feature = "round-robin");

/// SysTick frequency in Hz. Determines the tick granularity; every timer
/// and timeout in the kernel is expressed in these ticks.
pub const TICK_HZ: u32 = 490;

/// System clock frequency in Hz for the demo target (STM32F4 at 16 MHz
/// HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Stack size in bytes of the internal idle task. It only runs the
/// application idle hook, so the deepest call chain is shallow, but it
/// must still hold a full exception frame plus the saved context.
pub const IDLE_STACK_SIZE: usize = 256;

/// Byte value used to prefill task stacks. The stack-reserve diagnostic
/// scans for the first byte that no longer matches this pattern.
pub const STACK_FILL_BYTE: u8 = 0xa5;

/// Largest timeout a task may pass to a wait operation. The delay counter
/// is armed with `timeout + 1`, so the all-ones value would wrap to zero
/// and never fire.
pub const MAX_TIMEOUT: TickCount = TickCount::MAX - 1;

// Cross-constraints between the constants above. Violations fail the
// build instead of crashing at runtime.
const _: () = {
    assert!(NUM_TASKS >= 1 && NUM_TASKS <= 255);
    assert!(NUM_PRIO_CLASSES >= 1 && NUM_PRIO_CLASSES <= NUM_TASKS);
    assert!(MAX_TASKS_IN_PRIO_CLASS >= 1 && MAX_TASKS_IN_PRIO_CLASS <= 255);
    assert!(NUM_MUTEX_EVENTS <= 8);
    assert!(NUM_SEMAPHORE_EVENTS <= 8);
    // Mutex and semaphore bits are carved out of the 12 broadcast bits.
    assert!(NUM_MUTEX_EVENTS + NUM_SEMAPHORE_EVENTS <= 12);
};
