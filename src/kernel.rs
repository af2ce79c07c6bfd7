//! # Kernel
//!
//! Top-level initialization and the public API of the kernel. This
//! module owns the global [`Scheduler`] instance, wraps every core
//! operation in the critical section, and drives the port when a
//! scheduling decision requires a context switch.
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()                 ← global scheduler
//!         ├─► kernel::init_task()  (×N)      ← task table + start conditions
//!         ├─► kernel::set_semaphore_count()  ← initial balances
//!         └─► kernel::start()                ← no return
//!               ├─► seed every task stack
//!               ├─► run application interrupt enablers
//!               ├─► configure SysTick + priorities
//!               └─► become the idle task
//! ```
//!
//! All tasks begin suspended, armed with their start condition; the tick
//! interrupt releases them onto the time grid. There is no explicit
//! "first task": the CPU enters the idle task and the very first ticks
//! hand it over.

use core::ptr::addr_of_mut;

use crate::arch::cortex_m4;
use crate::config::{
    IDLE_STACK_SIZE, NUM_TASKS, USE_APPL_INTERRUPT_00, USE_APPL_INTERRUPT_01,
};
use crate::event::{EventMask, EVT_DELAY_TIMER};
use crate::scheduler::{Scheduler, WaitOutcome, IDLE_TASK_ID};
use crate::sync;
use crate::task::{StackArea, TaskFunction, TaskId};
use crate::time::TickCount;

// ---------------------------------------------------------------------
// Global kernel state
// ---------------------------------------------------------------------

/// The one scheduler instance.
///
/// # Safety
/// Accessed through [`SCHEDULER_PTR`], which is set during [`init`]. All
/// access is inside critical sections or from the PendSV handler, where
/// interrupts of equal priority are serialized by the hardware.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler for the port layer; the exception
/// handlers cannot go through safe references.
#[no_mangle]
pub static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

/// Stack of the implicit idle task.
static IDLE_STACK: StackArea<IDLE_STACK_SIZE> = StackArea::new();

/// The application's idle hook, installed by [`start`].
static mut IDLE_HOOK: fn() = default_idle_hook;

fn default_idle_hook() {
    cortex_m::asm::wfi();
}

/// Application callbacks consumed by [`start`].
pub struct StartHooks {
    /// Body of the idle loop. Called repeatedly whenever no task is
    /// ready; it may return at any time and must never block on kernel
    /// services — the idle task cannot suspend.
    pub idle: fn(),

    /// Sets up the hardware source of `EVT_ISR_USER_00`. Required iff
    /// `config::USE_APPL_INTERRUPT_00` is set; the handler itself posts
    /// the event via [`set_event_from_isr`].
    pub enable_irq_user_00: Option<fn()>,

    /// Sets up the hardware source of `EVT_ISR_USER_01`.
    pub enable_irq_user_01: Option<fn()>,
}

// ---------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------

/// Initialize the kernel. Must be called exactly once, before any other
/// kernel function.
pub fn init() {
    unsafe {
        SCHEDULER = Scheduler::new();
        SCHEDULER_PTR = addr_of_mut!(SCHEDULER);
    }
}

/// Configure one task. Every index in `0..NUM_TASKS` must be configured
/// exactly once before [`start`].
///
/// `start_event_mask`, `start_by_all_events` and `start_timeout` form
/// the condition under which the task runs for the first time, with the
/// same semantics as [`wait_for_event`]; staggering the start timeouts
/// of periodic tasks spreads them over the time grid.
#[allow(clippy::too_many_arguments)]
pub fn init_task(
    id: TaskId,
    entry: TaskFunction,
    prio_class: u8,
    round_robin_slice: TickCount,
    stack_area: *mut u8,
    stack_size: usize,
    start_event_mask: EventMask,
    start_by_all_events: bool,
    start_timeout: TickCount,
) {
    sync::critical_section(|_| unsafe {
        (*SCHEDULER_PTR).initialize_task(
            id,
            entry,
            prio_class,
            round_robin_slice,
            stack_area,
            stack_size,
            start_event_mask,
            start_by_all_events,
            start_timeout,
        );
    });
}

/// Seed the initial balance of a semaphore. Call before [`start`].
pub fn set_semaphore_count(index: usize, count: u8) {
    sync::critical_section(|_| unsafe {
        (*SCHEDULER_PTR).set_semaphore_count(index, count);
    });
}

/// Start the kernel. **Does not return.**
///
/// Seeds the stack of every configured task and of the idle task, runs
/// the application interrupt enablers, starts the tick interrupt and
/// turns the calling context into the idle task.
pub fn start(mut core_peripherals: cortex_m::Peripherals, hooks: StartHooks) -> ! {
    unsafe {
        IDLE_HOOK = hooks.idle;
    }

    // Nothing may tick before the first context exists.
    cortex_m::interrupt::disable();

    sync::critical_section(|_| unsafe {
        let scheduler = &mut *SCHEDULER_PTR;
        debug_assert!(
            scheduler.all_tasks_configured(),
            "start() with unconfigured tasks"
        );
        for id in 0..NUM_TASKS {
            let area = scheduler.tasks[id].stack_area;
            let size = scheduler.tasks[id].stack_size;
            scheduler.tasks[id].stack_pointer = cortex_m4::prepare_task_stack(area, size);
        }
        let idle = &mut scheduler.tasks[IDLE_TASK_ID];
        idle.entry = Some(idle_task);
        idle.stack_area = IDLE_STACK.base();
        idle.stack_size = IDLE_STACK.size();
        idle.stack_pointer = cortex_m4::prepare_task_stack(idle.stack_area, idle.stack_size);
    });

    if USE_APPL_INTERRUPT_00 {
        match hooks.enable_irq_user_00 {
            Some(enable) => enable(),
            None => debug_assert!(false, "application interrupt 0 without enabler"),
        }
    }
    if USE_APPL_INTERRUPT_01 {
        match hooks.enable_irq_user_01 {
            Some(enable) => enable(),
            None => debug_assert!(false, "application interrupt 1 without enabler"),
        }
    }

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    // The idle task is both active and running; entering it via its
    // seeded frame also re-enables interrupts.
    let idle_sp = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).finish_context_switch() });
    unsafe { cortex_m4::start_first_task(idle_sp) }
}

/// Entry of the implicit idle task: runs the application idle hook
/// forever. The idle task never calls a suspending kernel service.
fn idle_task(_start_events: EventMask) -> ! {
    loop {
        let hook = unsafe { IDLE_HOOK };
        hook();
    }
}

// ---------------------------------------------------------------------
// Task API
// ---------------------------------------------------------------------

/// Suspend the calling task until the event condition is met.
///
/// Returns the event vector that satisfied the wait: with `all` false
/// any posted bit of `mask`, with `all` true the full mask, or just
/// `EVT_DELAY_TIMER` when the timeout expired first. Mutex and semaphore
/// bits in the returned vector signal that the resource was acquired.
///
/// If the mask contains `EVT_ABSOLUTE_TIMER`, `timeout` advances the
/// task's due time relative to its previous due time: passing the period
/// here makes a task exactly periodic, with no drift from its own
/// execution time.
///
/// Must not be called from the idle hook or from interrupt handlers.
pub fn wait_for_event(mask: EventMask, all: bool, timeout: TickCount) -> EventMask {
    let outcome = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).wait(mask, all, timeout) });
    match outcome {
        WaitOutcome::Immediate(events) => events,
        WaitOutcome::Suspended => {
            cortex_m4::trigger_pendsv();
            // The switch is taken right here; execution continues only
            // once the scheduler hands the CPU back to this task.
            sync::critical_section(|_| unsafe {
                let scheduler = &mut *SCHEDULER_PTR;
                let id = scheduler.running_task_id;
                scheduler.consume_resume_events(id)
            })
        }
    }
}

/// Suspend the calling task for at least `timeout` ticks.
///
/// Equivalent to waiting on `EVT_DELAY_TIMER` alone; returns
/// `EVT_DELAY_TIMER`. The actual delay is between `timeout` and
/// `timeout + 1` tick periods, the tick interrupt being asynchronous to
/// the caller.
pub fn delay(timeout: TickCount) -> EventMask {
    wait_for_event(EVT_DELAY_TIMER, false, timeout)
}

/// Post events to all suspended tasks.
///
/// Broadcast bits go to every suspended task; each mutex or semaphore
/// bit is handed to at most one waiter (see [`crate::event`]). If this
/// releases a task of strictly higher priority than the caller, the
/// caller is preempted and the call returns only once it is rescheduled.
pub fn set_event(events: EventMask) {
    let must_yield = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).post(events) });
    if must_yield {
        cortex_m4::trigger_pendsv();
    }
}

/// Post events from an interrupt handler.
///
/// Same semantics as [`set_event`] except that no ownership bookkeeping
/// applies to the anonymous poster. Any required context switch is
/// pended and taken once the interrupt returns.
pub fn set_event_from_isr(events: EventMask) {
    let must_switch =
        sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).post_from_isr(events) });
    if must_switch {
        cortex_m4::trigger_pendsv();
    }
}

// ---------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------

/// Bytes at the low end of a task's stack that were never written —
/// approximate headroom, cheap enough to poll from a monitoring task.
pub fn stack_reserve(id: TaskId) -> usize {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).stack_reserve(id) })
}

/// Number of detected absolute-timer overruns of a task, optionally
/// resetting the counter. Saturates at 255; purely diagnostic.
pub fn task_overrun_count(id: TaskId, reset: bool) -> u8 {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).overrun_count(id, reset) })
}
