//! # Vectos Demo Firmware
//!
//! A small sampling pipeline exercising every coordination primitive of
//! the kernel across three priority classes:
//!
//! | Task | Class | Driven by | Uses |
//! |------|-------|-----------|------|
//! | `sampler_task` | 2 | absolute timer, period 10 | bus mutex, sample semaphore |
//! | `filter_task`  | 1 | sample semaphore          | broadcast batch event |
//! | `display_task` | 1 | batch event or timeout    | bus mutex |
//! | `blink_task`   | 0 | delay timer, period 49    | — |
//! | `monitor_task` | 0 | absolute timer, period 97 | stack/overrun diagnostics |
//!
//! The sampler runs on the rigid time grid and hands its samples down
//! through a counting semaphore; the filter condenses them and
//! broadcasts a batch event; the display task redraws on each batch or,
//! lacking one, on timeout. The two background tasks show a plain
//! delay loop and the diagnostic API.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use vectos::event::{
    mutex_event, semaphore_event, EventMask, EVT_ABSOLUTE_TIMER, EVT_DELAY_TIMER, EVT_EVENT_04,
};
use vectos::kernel::{self, StartHooks};
use vectos::task::StackArea;

/// Event bit guarding the (imaginary) sensor bus.
const EVT_MUTEX_BUS: EventMask = mutex_event(0);

/// Event bit carrying one acquired sample from sampler to filter.
const EVT_SEM_SAMPLE: EventMask = semaphore_event(0);

/// Broadcast event: a batch of filtered samples is ready.
const EVT_BATCH_READY: EventMask = EVT_EVENT_04;

/// Samples folded into one batch.
const BATCH_LEN: u32 = 8;

// ---------------------------------------------------------------------
// Task stacks
// ---------------------------------------------------------------------

static SAMPLER_STACK: StackArea<256> = StackArea::new();
static FILTER_STACK: StackArea<256> = StackArea::new();
static DISPLAY_STACK: StackArea<256> = StackArea::new();
static BLINK_STACK: StackArea<256> = StackArea::new();
static MONITOR_STACK: StackArea<256> = StackArea::new();

// ---------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------

/// **Sampler** (class 2). Strictly periodic: the wait at the loop's end
/// advances the due time by the period, so the sampling grid does not
/// drift with execution time. Each round takes the bus mutex for the
/// (simulated) sensor access and releases one semaphore unit.
fn sampler_task(_start_events: EventMask) -> ! {
    let mut raw: u32 = 0;
    loop {
        kernel::wait_for_event(EVT_MUTEX_BUS, false, 0);
        // Simulated sensor read over the shared bus.
        raw = raw.wrapping_mul(31).wrapping_add(7);
        kernel::set_event(EVT_MUTEX_BUS);

        // Hand the sample to the filter.
        kernel::set_event(EVT_SEM_SAMPLE);

        kernel::wait_for_event(EVT_ABSOLUTE_TIMER, false, 10);
    }
}

/// **Filter** (class 1). Sleeps on the sample semaphore with no timeout;
/// wakes exactly once per posted unit, in FIFO order. Every `BATCH_LEN`
/// samples it broadcasts the batch event.
fn filter_task(_start_events: EventMask) -> ! {
    let mut acc: u32 = 0;
    let mut count: u32 = 0;
    loop {
        kernel::wait_for_event(EVT_SEM_SAMPLE, false, 0);
        acc = acc.wrapping_add(1);
        count += 1;
        if count == BATCH_LEN {
            count = 0;
            acc = 0;
            kernel::set_event(EVT_BATCH_READY);
        }
    }
}

/// **Display** (class 1). Redraws when a batch arrives, or on timeout to
/// keep the screen alive when the pipeline stalls. The returned vector
/// tells the two cases apart.
fn display_task(_start_events: EventMask) -> ! {
    let mut frames: u32 = 0;
    let mut stale_frames: u32 = 0;
    loop {
        let events = kernel::wait_for_event(EVT_BATCH_READY, false, 245);
        if events & EVT_BATCH_READY != 0 {
            frames = frames.wrapping_add(1);
        } else {
            // Timeout: only the delay bit came back.
            stale_frames = stale_frames.wrapping_add(1);
        }
        kernel::wait_for_event(EVT_MUTEX_BUS, false, 0);
        // Simulated frame output over the shared bus.
        kernel::set_event(EVT_MUTEX_BUS);
    }
}

/// **Blinker** (class 0). The plainest possible task: toggle, sleep.
fn blink_task(_start_events: EventMask) -> ! {
    let mut led_on = false;
    loop {
        led_on = !led_on;
        kernel::delay(49);
    }
}

/// **Monitor** (class 0). Polls the kernel diagnostics: untouched stack
/// bytes per task and the overrun counters of the periodic tasks. A real
/// application would log these; the demo just keeps the worst case.
fn monitor_task(_start_events: EventMask) -> ! {
    let mut min_reserve = usize::MAX;
    let mut overruns: u8 = 0;
    loop {
        for id in 0..vectos::config::NUM_TASKS {
            let reserve = kernel::stack_reserve(id);
            if reserve < min_reserve {
                min_reserve = reserve;
            }
        }
        overruns = overruns.max(kernel::task_overrun_count(0, false));
        kernel::wait_for_event(EVT_ABSOLUTE_TIMER, false, 97);
    }
}

/// Idle hook: nothing to do until the next interrupt.
fn idle_hook() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let core_peripherals = cortex_m::Peripherals::take().unwrap();

    kernel::init();

    // The sampler starts on the absolute time grid; the consumers start
    // one tick in, ahead of the first sample; the background tasks are
    // staggered so their first activations do not pile onto one tick.
    kernel::init_task(
        0,
        sampler_task,
        2,
        0,
        SAMPLER_STACK.base(),
        SAMPLER_STACK.size(),
        EVT_ABSOLUTE_TIMER,
        false,
        9,
    );
    kernel::init_task(
        1,
        filter_task,
        1,
        0,
        FILTER_STACK.base(),
        FILTER_STACK.size(),
        EVT_DELAY_TIMER,
        false,
        0,
    );
    kernel::init_task(
        2,
        display_task,
        1,
        0,
        DISPLAY_STACK.base(),
        DISPLAY_STACK.size(),
        EVT_DELAY_TIMER,
        false,
        1,
    );
    kernel::init_task(
        3,
        blink_task,
        0,
        0,
        BLINK_STACK.base(),
        BLINK_STACK.size(),
        EVT_DELAY_TIMER,
        false,
        2,
    );
    kernel::init_task(
        4,
        monitor_task,
        0,
        0,
        MONITOR_STACK.base(),
        MONITOR_STACK.size(),
        EVT_ABSOLUTE_TIMER,
        false,
        97,
    );

    // The sample semaphore starts empty: the filter blocks until the
    // sampler produces.
    kernel::set_semaphore_count(0, 0);

    kernel::start(
        core_peripherals,
        StartHooks {
            idle: idle_hook,
            enable_irq_user_00: None,
            enable_irq_user_01: None,
        },
    )
}
