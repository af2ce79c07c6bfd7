//! # Task Control Block
//!
//! One descriptor per configured task, plus one implicit descriptor for
//! the idle task. The static fields are fixed at initialization; the
//! dynamic fields are written only by the scheduler inside critical
//! sections.
//!
//! A task is always in exactly one of three states:
//!
//! ```text
//!             release (tick / post)
//!   ┌───────────┐ ─────────────────► ┌─────────┐
//!   │ Suspended │                    │  Ready  │
//!   └───────────┘ ◄───────────────── └─────────┘
//!         ▲            (never)         ▲     │ activate
//!         │                    preempt │     ▼
//!         │        wait()            ┌──────────┐
//!         └───────────────────────── │  Active  │
//!                                    └──────────┘
//! ```
//!
//! The state is not stored in the TCB; it is implied by which scheduler
//! index currently holds the task id.

use core::cell::UnsafeCell;

use crate::event::{EventMask, EVT_ABSOLUTE_TIMER, EVT_DELAY_TIMER};
use crate::time::{CyclicTime, TickCount};

/// Task identifier: the index into the scheduler's task array.
pub type TaskId = usize;

/// A statically allocated task stack of `N` bytes.
///
/// Owning the buffer through an `UnsafeCell` lets the application keep
/// the stack in an ordinary (non-`mut`) static while the kernel writes
/// through the raw base pointer. The alignment satisfies the strictest
/// stack alignment of the supported ports.
#[repr(align(8))]
pub struct StackArea<const N: usize> {
    area: UnsafeCell<[u8; N]>,
}

// The kernel only touches the buffer through base() inside critical
// sections or before the scheduler starts.
unsafe impl<const N: usize> Sync for StackArea<N> {}

impl<const N: usize> StackArea<N> {
    /// A fresh stack area. The prefill pattern is applied at kernel
    /// start, not here.
    pub const fn new() -> Self {
        Self {
            area: UnsafeCell::new([0; N]),
        }
    }

    /// Base (lowest) address of the stack buffer.
    pub const fn base(&self) -> *mut u8 {
        self.area.get() as *mut u8
    }

    /// Size of the stack buffer in bytes.
    pub const fn size(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for StackArea<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The type of a task entry function.
///
/// A task function never returns. Its single argument is the event vector
/// of the very combination that made the task run for the first time,
/// typically just the absolute-timer event.
pub type TaskFunction = fn(EventMask) -> !;

/// Task descriptor.
pub struct Task {
    // --- Static configuration, fixed after initialize_task() ---
    /// Priority class. Class 0 is the lowest; higher classes preempt.
    pub(crate) prio_class: u8,

    /// Entry function. `None` only for the idle descriptor.
    pub(crate) entry: Option<TaskFunction>,

    /// Application-owned stack buffer for this task.
    pub(crate) stack_area: *mut u8,

    /// Size of the stack buffer in bytes.
    pub(crate) stack_size: usize,

    /// Round-robin time slice in ticks. Only meaningful with the
    /// `round-robin` feature; 0 disables slicing for this task.
    pub(crate) round_robin_slice: TickCount,

    /// Set once the application has configured this descriptor.
    pub(crate) configured: bool,

    // --- Dynamic scheduling state, owned by the scheduler ---
    /// Saved stack pointer while the task is not running.
    pub(crate) stack_pointer: *mut u32,

    /// Events posted to this task and not yet consumed.
    pub(crate) posted_events: EventMask,

    /// The mask of events that can make this task due. Includes the
    /// delay-timer bit whenever a timeout is armed.
    pub(crate) wait_mask: EventMask,

    /// Whether the whole `wait_mask` is required, or any single bit.
    pub(crate) wait_all: bool,

    /// The system time at which the absolute-timer event fires.
    pub(crate) time_due_at: TickCount,

    /// Downcounter for the delay-timer event; 0 means not armed.
    pub(crate) delay_counter: TickCount,

    /// Remaining round-robin slice of the task while it is active.
    pub(crate) round_robin_counter: TickCount,

    /// Number of detected absolute-timer overruns. Saturates.
    pub(crate) overrun_count: u8,
}

// The raw pointers refer into application-provided static buffers and are
// only dereferenced by the port layer and the stack-reserve scan, always
// inside critical sections.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// An unconfigured descriptor, usable as the repeat element when
    /// building the static task array.
    pub const EMPTY: Task = Task::empty();

    /// An unconfigured descriptor.
    pub const fn empty() -> Self {
        Self {
            prio_class: 0,
            entry: None,
            stack_area: core::ptr::null_mut(),
            stack_size: 0,
            round_robin_slice: 0,
            configured: false,
            stack_pointer: core::ptr::null_mut(),
            posted_events: 0,
            wait_mask: 0,
            wait_all: false,
            time_due_at: 0,
            delay_counter: 0,
            round_robin_counter: 0,
            overrun_count: 0,
        }
    }

    /// Record a wait condition.
    ///
    /// A positive timeout implicitly joins the delay-timer bit into the
    /// mask: the timeout is an alternative release path no matter the
    /// all-flag. The delay counter is armed with `timeout + 1` so that
    /// the delay is a lower bound against the un-synchronized caller.
    /// The absolute due time advances *relative to its previous value*,
    /// which is what makes periodic tasks drift-free: the caller passes
    /// its period, not a sleep.
    pub(crate) fn arm_wait(&mut self, mask: EventMask, all: bool, timeout: TickCount) {
        let mask = if timeout > 0 { mask | EVT_DELAY_TIMER } else { mask };
        if mask & EVT_DELAY_TIMER != 0 {
            self.delay_counter = timeout.wrapping_add(1);
        }
        if mask & EVT_ABSOLUTE_TIMER != 0 {
            self.time_due_at = self.time_due_at.forward(timeout);
        }
        self.wait_mask = mask;
        self.wait_all = all;
    }

    /// True iff the posted events satisfy the recorded wait condition.
    ///
    /// For an all-wait, the delay-timer event releases on its own: a
    /// timeout must not be held hostage by the events it guards.
    pub(crate) fn wait_condition_met(&self) -> bool {
        let got = self.posted_events & self.wait_mask;
        if !self.wait_all {
            got != 0
        } else {
            (got & EVT_DELAY_TIMER) != 0
                || (got | EVT_DELAY_TIMER) == (self.wait_mask | EVT_DELAY_TIMER)
        }
    }

    /// Take the events that satisfied the wait and clear the posted
    /// vector. Called on the task's resumption, never earlier, so that
    /// events arriving between release and dispatch are preserved.
    pub(crate) fn consume_events(&mut self) -> EventMask {
        let got = self.posted_events & self.wait_mask;
        self.posted_events = 0;
        got
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EVT_EVENT_03, EVT_EVENT_04};

    #[test]
    fn test_empty_descriptor() {
        let t = Task::empty();
        assert!(!t.configured);
        assert!(t.entry.is_none());
        assert_eq!(t.posted_events, 0);
    }

    #[test]
    fn test_arm_wait_arms_delay_counter_with_guard_tick() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03, false, 20);
        assert_eq!(t.delay_counter, 21);
        assert_eq!(t.wait_mask, EVT_EVENT_03 | EVT_DELAY_TIMER);
    }

    #[test]
    fn test_arm_wait_zero_timeout_keeps_mask() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03, false, 0);
        assert_eq!(t.delay_counter, 0);
        assert_eq!(t.wait_mask, EVT_EVENT_03);
    }

    #[test]
    fn test_arm_wait_explicit_delay_with_zero_timeout() {
        // delay(0) still suspends until the next tick.
        let mut t = Task::empty();
        t.arm_wait(EVT_DELAY_TIMER, false, 0);
        assert_eq!(t.delay_counter, 1);
    }

    #[test]
    fn test_arm_wait_advances_due_time_relative() {
        let mut t = Task::empty();
        t.time_due_at = 40;
        t.arm_wait(EVT_ABSOLUTE_TIMER, false, 100);
        assert_eq!(t.time_due_at, 140);
        t.arm_wait(EVT_ABSOLUTE_TIMER, false, 100);
        assert_eq!(t.time_due_at, 240);
    }

    #[test]
    fn test_any_wait_releases_on_single_bit() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03 | EVT_EVENT_04, false, 0);
        assert!(!t.wait_condition_met());
        t.posted_events = EVT_EVENT_04;
        assert!(t.wait_condition_met());
    }

    #[test]
    fn test_all_wait_requires_every_bit() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03 | EVT_EVENT_04, true, 0);
        t.posted_events = EVT_EVENT_03;
        assert!(!t.wait_condition_met());
        t.posted_events = EVT_EVENT_03 | EVT_EVENT_04;
        assert!(t.wait_condition_met());
    }

    #[test]
    fn test_all_wait_timeout_is_alternative_release() {
        // The timeout releases an all-wait even though the requested
        // events never arrived; only the delay bit is then consumable.
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03 | EVT_EVENT_04, true, 10);
        t.posted_events = EVT_EVENT_03;
        assert!(!t.wait_condition_met());
        t.posted_events |= EVT_DELAY_TIMER;
        assert!(t.wait_condition_met());
    }

    #[test]
    fn test_all_wait_satisfied_by_events_before_timeout() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03 | EVT_EVENT_04, true, 10);
        t.posted_events = EVT_EVENT_03 | EVT_EVENT_04;
        assert!(t.wait_condition_met());
    }

    #[test]
    fn test_consume_returns_satisfying_bits_and_clears() {
        let mut t = Task::empty();
        t.arm_wait(EVT_EVENT_03, false, 5);
        t.posted_events = EVT_EVENT_03 | EVT_EVENT_04;
        assert_eq!(t.consume_events(), EVT_EVENT_03);
        assert_eq!(t.posted_events, 0);
    }
}
