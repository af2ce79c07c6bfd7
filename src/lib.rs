//! # Vectos — an event-vector real-time kernel
//!
//! A small preemptive RTOS core for single-core microcontrollers with a few
//! kilobytes of RAM. A fixed, statically configured set of tasks is
//! multiplexed onto the CPU by priority class, optionally time-sliced within
//! a class, and coordinated through a single 16-bit *event vector* that
//! subsumes timers, broadcast signals, mutexes and semaphores.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                  │
//! │   init() · init_task() · start() · wait_for_event()    │
//! │           set_event() · delay() · diagnostics          │
//! ├──────────────┬───────────────────┬─────────────────────┤
//! │  Scheduler   │  Event registry   │  Critical sections  │
//! │ scheduler.rs │  event.rs         │  sync.rs            │
//! │  ─ tick()    │  ─ broadcast bits │  ─ critical_section │
//! │  ─ wait()    │  ─ mutex bits     │                     │
//! │  ─ post()    │  ─ semaphore bits │                     │
//! ├──────────────┴───────────────────┴─────────────────────┤
//! │             Task model (task.rs, time.rs)              │
//! │        TCB · wait condition · cyclic tick time         │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch port (arch/cortex_m4.rs)               │
//! │   PendSV · SysTick · stack seeding · first dispatch    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Event vector
//!
//! Every task suspension names a 16-bit mask of events that may resume it.
//! Bits 0..11 are broadcast events posted with `set_event`; a configurable
//! low prefix of them is reinterpreted as mutex bits and the next range as
//! semaphore bits. Bits 12..13 can be bound to two application interrupts.
//! Bit 14 is the per-task absolute timer, bit 15 the per-task delay timer;
//! these two assignments are a stable ABI.
//!
//! ## Memory model
//!
//! - No heap, no `alloc`: all kernel state is statically allocated.
//! - Fixed TCB array `[Task; NUM_TASKS + 1]`; the extra slot is the
//!   implicit idle task.
//! - Task stacks are application-owned byte buffers, prefilled with a
//!   known pattern for the stack-reserve diagnostic.
//! - All shared state is mutated inside `cortex_m::interrupt::free`
//!   critical sections.
//!
//! The scheduler core is architecture-independent and is unit-tested on
//! the host. Enable the `port-cortex-m4` feature for the Cortex-M4 port
//! layer and the demo firmware.

#![no_std]

pub mod config;
pub mod event;
pub mod time;
pub mod task;
pub mod scheduler;
pub mod sync;
pub mod arch;

#[cfg(feature = "port-cortex-m4")]
pub mod kernel;
