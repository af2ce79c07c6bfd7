//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, the SysTick tick source, stack seeding
//! and the first-dispatch springboard.
//!
//! ## Context switch contract
//!
//! The Cortex-M4 uses a split-stack model: the kernel and all interrupt
//! handlers run on the main stack (MSP), tasks run on the process stack
//! (PSP). On exception entry the hardware stacks R0–R3, R12, LR, PC and
//! xPSR onto the process stack; the PendSV handler saves and restores
//! R4–R11 around that, which completes the register set.
//!
//! The scheduler core never switches by itself. It only records which
//! task should own the CPU; PendSV realizes the decision by saving the
//! running task's PSP into its descriptor and resuming from the stack
//! pointer the scheduler hands out. A PendSV taken with no pending
//! decision degenerates into resuming the interrupted task.
//!
//! ## Interrupt priorities
//!
//! SysTick and PendSV both run at the lowest priority, so a context
//! switch never preempts an application interrupt handler. An
//! application interrupt that posts events between the two halves of a
//! switch simply re-pends PendSV; the second take finds nothing left to
//! do.

use core::arch::{asm, naked_asm};
use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{STACK_FILL_BYTE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::SCHEDULER_PTR;
use crate::sync;

// ---------------------------------------------------------------------
// SysTick: the system timer tick
// ---------------------------------------------------------------------

/// Configure SysTick as the tick source, firing at `TICK_HZ`.
///
/// Every tick drives [`crate::scheduler::Scheduler::tick`], which serves
/// the per-task timers and may request a context switch.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// SysTick exception handler — the tick service entry point.
///
/// Runs the scheduler tick inside the critical section so that an
/// application interrupt cannot observe a half-updated suspended list,
/// then pends PendSV if the tick picked another task.
#[no_mangle]
pub extern "C" fn SysTick() {
    let must_switch = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).tick() });
    if must_switch {
        trigger_pendsv();
    }
}

// ---------------------------------------------------------------------
// PendSV: the context switch primitive
// ---------------------------------------------------------------------

/// Pend a PendSV exception to perform a context switch.
///
/// PendSV fires once no other exception is active, which defers the
/// switch out of interrupt handlers and out of critical sections.
#[inline]
pub fn trigger_pendsv() {
    // ICSR address 0xE000_ED04, PENDSVSET = bit 28.
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

/// Set PendSV and SysTick to the lowest interrupt priority so that the
/// context switch machinery never preempts application handlers.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3), 0xE000_ED20:
        // bits [23:16] PendSV priority, bits [31:24] SysTick priority.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xff << 16) | (0xff << 24));
    }
}

/// PendSV exception handler — saves the running task's context and
/// resumes the task the scheduler selected.
///
/// ## Sequence
/// 1. Push R4–R11 onto the running task's process stack
/// 2. Store the resulting PSP into the running task's descriptor
/// 3. Commit the scheduler's pending decision, receiving the new PSP
/// 4. Pop R4–R11 from the new task's stack and set PSP
/// 5. Return from exception; hardware restores the remaining registers
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // --- Save the leaving context ---
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save}", // save_running_context(psp)
        // --- Commit the scheduling decision ---
        "bl {next}", // returns the new PSP in r0
        // --- Restore the entering context ---
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        // Return to Thread mode on the process stack.
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        save = sym save_running_context,
        next = sym switch_to_active_context,
    );
}

/// First half of the switch: remember where the running task's registers
/// were saved.
unsafe extern "C" fn save_running_context(psp: *mut u32) {
    let scheduler = &mut *SCHEDULER_PTR;
    scheduler.save_running_stack_pointer(psp);
}

/// Second half of the switch: make the scheduler's chosen task the
/// running one and return its saved stack pointer.
unsafe extern "C" fn switch_to_active_context() -> *mut u32 {
    let scheduler = &mut *SCHEDULER_PTR;
    scheduler.finish_context_switch()
}

// ---------------------------------------------------------------------
// Stack seeding and first dispatch
// ---------------------------------------------------------------------

/// Prefill a task's stack with the reserve-scan pattern and seed the
/// frame that the context restore path will consume on first dispatch.
///
/// ## Frame layout (high addresses at the top, PSP at the bottom)
///
/// ```text
///   xPSR  (Thumb bit set)
///   PC    (task_springboard)
///   LR    (task_return_trap — taken if a task function ever returns)
///   R12, R3, R2, R1, R0   (0)
///   R11 … R4              (0)   <- seeded stack pointer
/// ```
///
/// The springboard, not the task function, is entered first: it fetches
/// the start-event vector from the scheduler and calls the entry
/// function with it, which keeps the frame format independent of the
/// argument-passing details.
pub fn prepare_task_stack(stack_area: *mut u8, stack_size: usize) -> *mut u32 {
    unsafe {
        for i in 0..stack_size {
            stack_area.add(i).write_volatile(STACK_FILL_BYTE);
        }
    }

    // AAPCS requires 8-byte stack alignment at the exception frame.
    let top = (stack_area as usize + stack_size) & !0x7;
    let frame = (top - 16 * 4) as *mut u32;
    unsafe {
        for i in 0..13 {
            frame.add(i).write(0); // R4-R11, R0-R3, R12
        }
        frame.add(13).write(task_return_trap as usize as u32); // LR
        frame.add(14).write(task_springboard as usize as u32); // PC
        frame.add(15).write(0x0100_0000); // xPSR, Thumb state
    }
    frame
}

/// Entered by the seeded frame on a task's first dispatch. Fetches the
/// event vector that released the task and hands it to the entry
/// function as its start argument.
extern "C" fn task_springboard() -> ! {
    let (entry, start_events) = sync::critical_section(|_| unsafe {
        let scheduler = &mut *SCHEDULER_PTR;
        let id = scheduler.running_task_id;
        (scheduler.task_entry(id), scheduler.consume_resume_events(id))
    });
    match entry {
        Some(run) => run(start_events),
        // Unreachable for a seeded frame; park rather than run wild.
        None => task_return_trap(),
    }
}

/// Target of the seeded link register. Task functions never return; if
/// one does anyway, park the CPU in a breakpoint loop instead of letting
/// it execute whatever the stack decays into.
extern "C" fn task_return_trap() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}

/// Switch to the process stack and enter the first task via its seeded
/// frame. Called once at the end of kernel startup; never returns.
///
/// # Safety
/// `psp` must point at a frame produced by [`prepare_task_stack`], and
/// the scheduler must already name the owning task as running.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the seeded R4-R11; their values do not matter for the
        // very first entry.
        "adds r0, #32",
        "msr psp, r0",
        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",
        // Unstack the seeded exception frame by hand.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}", // LR slot (the return trap; unused here)
        "pop {{r5}}", // PC slot (the springboard)
        "pop {{r6}}", // xPSR slot
        "cpsie i",
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}
