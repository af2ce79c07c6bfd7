//! # Scheduler
//!
//! The architecture-independent core of the kernel: the task table, the
//! ready and suspended indexes, the cyclic system time, the mutex owner
//! map and the semaphore counters — all process-wide state behind one
//! `Scheduler` object.
//!
//! ## State discipline
//!
//! Every configured task id is held by exactly one place: the active
//! slot, one per-class ready list, or the flat suspended list. The active
//! task is *not* stored in a ready list. A preempted task re-enters its
//! class at the head (it is the oldest runnable task of that class); a
//! task whose round-robin slice expires re-enters at the tail; a released
//! task appends at the tail. Within a class the order is therefore FIFO
//! of becoming ready.
//!
//! ## Who calls what
//!
//! All methods must run inside the critical section; the wrappers in
//! `kernel.rs` and the SysTick handler take care of that. The methods
//! only compute the scheduling decision — `active_task_id` — and report
//! whether it differs from the task whose context is on the CPU
//! (`running_task_id`). Realizing the decision is the port's job: PendSV
//! saves the running task's stack pointer, asks for
//! [`Scheduler::finish_context_switch`] and resumes the returned context.
//! This keeps the core testable on the host, where a test plays the role
//! of the port.

use crate::config::{
    MAX_TASKS_IN_PRIO_CLASS, MAX_TIMEOUT, NUM_MUTEX_EVENTS, NUM_PRIO_CLASSES,
    NUM_SEMAPHORE_EVENTS, NUM_TASKS, ROUND_ROBIN, STACK_FILL_BYTE,
};
use crate::event::{
    mutex_index, semaphore_index, EventMask, EVT_ABSOLUTE_TIMER, EVT_DELAY_TIMER,
    MUTEX_EVENTS_MASK, SEMAPHORE_EVENTS_MASK, TIMER_EVENTS_MASK,
};
use crate::task::{Task, TaskFunction, TaskId};
use crate::time::{CyclicTime, TickCount};

/// The task id of the implicit idle task, one past the configured tasks.
pub const IDLE_TASK_ID: TaskId = NUM_TASKS;

/// Result of a wait request, as seen by the caller of the kernel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The wait condition was satisfiable without suspending — a free
    /// mutex or a positive semaphore counter. The satisfying event
    /// vector has already been consumed.
    Immediate(EventMask),
    /// The caller has been moved to the suspended list and a new active
    /// task has been picked; the port must perform the context switch.
    /// The satisfying vector is consumed on resumption.
    Suspended,
}

/// The central scheduler state. One instance exists for the lifetime of
/// the system; the port accesses it through a raw pointer from ISR
/// context, everything else through the `kernel` wrappers.
pub struct Scheduler {
    /// All task descriptors. Index `NUM_TASKS` is the idle task.
    pub(crate) tasks: [Task; NUM_TASKS + 1],

    /// Ready task ids per priority class, oldest first.
    ready_ids: [[TaskId; MAX_TASKS_IN_PRIO_CLASS]; NUM_PRIO_CLASSES],

    /// Number of ready tasks per priority class.
    ready_len: [usize; NUM_PRIO_CLASSES],

    /// Ids of all currently suspended tasks, in suspension order.
    suspended_ids: [TaskId; NUM_TASKS],

    /// Number of currently suspended tasks.
    suspended_len: usize,

    /// The cyclic system time. Starts one tick before zero so that the
    /// very first tick service observes 0.
    time: TickCount,

    /// The task the scheduler wants on the CPU.
    active_task_id: TaskId,

    /// The task whose context actually is on the CPU. Trails
    /// `active_task_id` until the port performs the switch.
    pub(crate) running_task_id: TaskId,

    /// Owner of each mutex event bit, or `None` while it is free.
    mutex_owner: [Option<TaskId>; NUM_MUTEX_EVENTS],

    /// Available units of each semaphore event bit.
    semaphore_count: [u8; NUM_SEMAPHORE_EVENTS],
}

impl Scheduler {
    /// A scheduler with no configured tasks; only idle can run.
    pub const fn new() -> Self {
        Self {
            tasks: [Task::EMPTY; NUM_TASKS + 1],
            ready_ids: [[0; MAX_TASKS_IN_PRIO_CLASS]; NUM_PRIO_CLASSES],
            ready_len: [0; NUM_PRIO_CLASSES],
            suspended_ids: [0; NUM_TASKS],
            suspended_len: 0,
            time: TickCount::BEFORE_ZERO,
            active_task_id: IDLE_TASK_ID,
            running_task_id: IDLE_TASK_ID,
            mutex_owner: [None; NUM_MUTEX_EVENTS],
            semaphore_count: [0; NUM_SEMAPHORE_EVENTS],
        }
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    /// Configure one task descriptor and place the task in the suspended
    /// list, armed with its start condition. The task will run for the
    /// first time once the start events fire; staggering the start
    /// timeouts spreads the tasks over the time grid.
    ///
    /// Contract violations (index out of range, class out of range, null
    /// or empty stack, double configuration) are debug assertions; a
    /// release build will crash later in undefined ways.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_task(
        &mut self,
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
        debug_assert!(id < NUM_TASKS, "task index out of range");
        debug_assert!(
            (prio_class as usize) < NUM_PRIO_CLASSES,
            "priority class out of range"
        );
        debug_assert!(!stack_area.is_null(), "task without stack area");
        debug_assert!(stack_size > 0, "task without stack area");
        debug_assert!(!self.tasks[id].configured, "task configured twice");
        debug_assert!(
            start_event_mask != 0,
            "task without a start condition would never run"
        );

        let t = &mut self.tasks[id];
        t.prio_class = prio_class;
        t.entry = Some(entry);
        t.stack_area = stack_area;
        t.stack_size = stack_size;
        t.round_robin_slice = round_robin_slice;
        t.configured = true;
        t.arm_wait(start_event_mask, start_by_all_events, start_timeout);

        self.append_suspended(id);
    }

    /// Seed the initial balance of semaphore `index`. To be called before
    /// the kernel starts; posting and waiting maintain the counter from
    /// then on.
    pub fn set_semaphore_count(&mut self, index: usize, count: u8) {
        debug_assert!(index < NUM_SEMAPHORE_EVENTS, "semaphore index out of range");
        self.semaphore_count[index] = count;
    }

    // -----------------------------------------------------------------
    // Wait service
    // -----------------------------------------------------------------

    /// Suspend the active task until `mask` is satisfied.
    ///
    /// With `all` false any posted bit of the mask releases the task;
    /// with `all` true the entire mask is required. A positive `timeout`
    /// arms the delay timer as an alternative release path either way.
    /// If the mask contains the absolute-timer bit, `timeout` instead
    /// advances the task's due time relative to its previous value — the
    /// caller passes its period, not a sleep.
    ///
    /// Free mutexes and positive semaphore counters named in the mask are
    /// consumed right away; if that alone satisfies the condition the
    /// call returns [`WaitOutcome::Immediate`] without suspending.
    pub fn wait(&mut self, mask: EventMask, all: bool, timeout: TickCount) -> WaitOutcome {
        let caller = self.active_task_id;
        debug_assert!(caller != IDLE_TASK_ID, "the idle task must not suspend");
        debug_assert!(mask != 0 || timeout > 0, "wait without any release path");
        debug_assert!(timeout <= MAX_TIMEOUT, "timeout out of range");

        self.tasks[caller].arm_wait(mask, all, timeout);

        // The task declares a due time that already lies in the past: it
        // finished its period late. Detectable only while the lateness is
        // below half the time cycle.
        let t = &self.tasks[caller];
        if t.wait_mask & EVT_ABSOLUTE_TIMER != 0 && self.time.is_after(t.time_due_at) {
            let t = &mut self.tasks[caller];
            t.overrun_count = t.overrun_count.saturating_add(1);
        }

        self.try_acquire_resources(caller);

        if self.tasks[caller].wait_condition_met() {
            return WaitOutcome::Immediate(self.tasks[caller].consume_events());
        }

        self.append_suspended(caller);
        self.select_active_from_ready();
        WaitOutcome::Suspended
    }

    /// Acquire every free mutex and every positive semaphore named in the
    /// caller's wait mask, before deciding whether it has to block.
    fn try_acquire_resources(&mut self, caller: TaskId) {
        let mask = self.tasks[caller].wait_mask;

        let mut m = mask & MUTEX_EVENTS_MASK;
        while m != 0 {
            let bit = m & m.wrapping_neg();
            m &= m - 1;
            let idx = mutex_index(bit);
            debug_assert!(
                self.mutex_owner[idx] != Some(caller),
                "mutex re-acquired by its owner"
            );
            if self.mutex_owner[idx].is_none() {
                self.mutex_owner[idx] = Some(caller);
                self.tasks[caller].posted_events |= bit;
            }
        }

        let mut s = mask & SEMAPHORE_EVENTS_MASK;
        while s != 0 {
            let bit = s & s.wrapping_neg();
            s &= s - 1;
            let idx = semaphore_index(bit);
            if self.tasks[caller].posted_events & bit == 0 && self.semaphore_count[idx] > 0 {
                self.semaphore_count[idx] -= 1;
                self.tasks[caller].posted_events |= bit;
            }
        }
    }

    // -----------------------------------------------------------------
    // Post service
    // -----------------------------------------------------------------

    /// Post events on behalf of the active task.
    ///
    /// Returns true iff the post released a task that preempts the
    /// caller; the port must then switch and the call effectively
    /// returns only once the caller is rescheduled.
    pub fn post(&mut self, events: EventMask) -> bool {
        let poster = self.active_task_id;
        self.post_from(events, Some(poster))
    }

    /// Post events from an interrupt handler. No ownership bookkeeping is
    /// possible for the anonymous poster; mutex bits hand over or free
    /// the mutex exactly as a task-context post would.
    pub fn post_from_isr(&mut self, events: EventMask) -> bool {
        self.post_from(events, None)
    }

    fn post_from(&mut self, events: EventMask, poster: Option<TaskId>) -> bool {
        debug_assert!(
            events & TIMER_EVENTS_MASK == 0,
            "timer events are per-task and cannot be posted"
        );
        let events = events & !TIMER_EVENTS_MASK;

        // Mutex bits: each hands ownership to the best waiter, or frees
        // the mutex. At most one task per mutex per post.
        let mut m = events & MUTEX_EVENTS_MASK;
        while m != 0 {
            let bit = m & m.wrapping_neg();
            m &= m - 1;
            let idx = mutex_index(bit);
            if let Some(p) = poster {
                // Releasing a mutex one does not hold is tolerated in
                // release builds; posting a free mutex is legal and makes
                // it available.
                debug_assert!(
                    self.mutex_owner[idx].is_none() || self.mutex_owner[idx] == Some(p),
                    "mutex released by a task that does not own it"
                );
            }
            match self.find_waiter(bit) {
                Some(id) => {
                    self.mutex_owner[idx] = Some(id);
                    self.tasks[id].posted_events |= bit;
                }
                None => self.mutex_owner[idx] = None,
            }
        }

        // Semaphore bits: transfer the unit to the best waiter, or bank
        // it in the counter.
        let mut s = events & SEMAPHORE_EVENTS_MASK;
        while s != 0 {
            let bit = s & s.wrapping_neg();
            s &= s - 1;
            let idx = semaphore_index(bit);
            match self.find_waiter(bit) {
                Some(id) => self.tasks[id].posted_events |= bit,
                None => {
                    debug_assert!(
                        self.semaphore_count[idx] < u8::MAX,
                        "semaphore counter overflow"
                    );
                    self.semaphore_count[idx] = self.semaphore_count[idx].saturating_add(1);
                }
            }
        }

        // Everything else is broadcast to all suspended tasks.
        let broadcast = events & !(MUTEX_EVENTS_MASK | SEMAPHORE_EVENTS_MASK);
        if broadcast != 0 {
            for i in 0..self.suspended_len {
                self.tasks[self.suspended_ids[i]].posted_events |= broadcast;
            }
        }

        self.release_due_tasks();
        self.select_active_preemptive();
        self.switch_pending()
    }

    /// The task a mutex or semaphore unit is handed to: among the
    /// suspended tasks waiting on `bit` and not already holding it, the
    /// oldest waiter within the highest priority class present.
    fn find_waiter(&self, bit: EventMask) -> Option<TaskId> {
        let mut best: Option<TaskId> = None;
        for i in 0..self.suspended_len {
            let id = self.suspended_ids[i];
            let t = &self.tasks[id];
            if t.wait_mask & bit != 0 && t.posted_events & bit == 0 {
                match best {
                    Some(b) if t.prio_class <= self.tasks[b].prio_class => {}
                    _ => best = Some(id),
                }
            }
        }
        best
    }

    // -----------------------------------------------------------------
    // Tick service
    // -----------------------------------------------------------------

    /// Advance the system time by one tick and serve the timers of all
    /// suspended tasks. Called from the timer interrupt, inside the
    /// critical section.
    ///
    /// Returns true iff the port must perform a context switch — at most
    /// one, at the end of the tick.
    pub fn tick(&mut self) -> bool {
        self.time = self.time.next();

        for i in 0..self.suspended_len {
            let t = &mut self.tasks[self.suspended_ids[i]];

            // Absolute timer: fires on equality with the due time.
            // Setting the bit when it is already set is no overrun
            // indication: under an any-wait the first match releases the
            // task immediately, and under an all-wait it is the other,
            // still missing events that block the task — not lateness.
            if self.time == t.time_due_at {
                t.posted_events |= EVT_ABSOLUTE_TIMER;
            }

            // Delay timer: a simple downcounter, armed by the wait
            // service. The common case of an idle counter stays cheap.
            if t.delay_counter > 0 {
                t.delay_counter -= 1;
                if t.delay_counter == 0 {
                    t.posted_events |= EVT_DELAY_TIMER;
                }
            }
        }

        self.release_due_tasks();

        if ROUND_ROBIN && self.rotate_expired_slice() {
            self.select_active_from_ready();
        } else {
            self.select_active_preemptive();
        }
        self.switch_pending()
    }

    /// Round-robin accounting for the active task. Returns true iff the
    /// task's slice expired and it was moved to the tail of its class,
    /// vacating the active slot.
    fn rotate_expired_slice(&mut self) -> bool {
        let cur = self.active_task_id;
        if cur == IDLE_TASK_ID {
            return false;
        }
        let t = &mut self.tasks[cur];
        if t.round_robin_slice == 0 {
            return false;
        }
        if t.round_robin_counter > 0 {
            t.round_robin_counter -= 1;
        }
        if t.round_robin_counter > 0 {
            return false;
        }
        // Slice elapsed. Without a ready peer in the class the task just
        // keeps running on a fresh slice.
        let class = t.prio_class as usize;
        if self.ready_len[class] == 0 {
            t.round_robin_counter = t.round_robin_slice;
            return false;
        }
        self.append_ready(cur);
        true
    }

    // -----------------------------------------------------------------
    // Release and selection
    // -----------------------------------------------------------------

    /// Move every suspended task whose wait condition is now satisfied to
    /// the ready list of its priority class.
    fn release_due_tasks(&mut self) {
        let mut i = 0;
        while i < self.suspended_len {
            let id = self.suspended_ids[i];
            if self.tasks[id].wait_condition_met() {
                self.remove_suspended_at(i);
                self.append_ready(id);
            } else {
                i += 1;
            }
        }
    }

    /// Pick the new active task after the active slot was vacated (the
    /// previous holder suspended itself or was rotated away): the head of
    /// the first non-empty ready list, scanning classes from the highest,
    /// or idle.
    fn select_active_from_ready(&mut self) {
        for class in (0..NUM_PRIO_CLASSES).rev() {
            if self.ready_len[class] > 0 {
                let id = self.take_ready_head(class);
                self.activate(id);
                return;
            }
        }
        self.activate(IDLE_TASK_ID);
    }

    /// Preempt the active task iff some ready task belongs to a strictly
    /// higher priority class. A released task of the same class never
    /// preempts; it waits its FIFO turn. The preempted task re-enters its
    /// class at the head.
    fn select_active_preemptive(&mut self) {
        let cur = self.active_task_id;
        let floor = if cur == IDLE_TASK_ID {
            0
        } else {
            self.tasks[cur].prio_class as usize + 1
        };
        for class in (floor..NUM_PRIO_CLASSES).rev() {
            if self.ready_len[class] > 0 {
                let id = self.take_ready_head(class);
                if cur != IDLE_TASK_ID {
                    self.insert_ready_head(cur);
                }
                self.activate(id);
                return;
            }
        }
    }

    fn activate(&mut self, id: TaskId) {
        self.active_task_id = id;
        if ROUND_ROBIN && id != IDLE_TASK_ID {
            self.tasks[id].round_robin_counter = self.tasks[id].round_robin_slice;
        }
    }

    // -----------------------------------------------------------------
    // Index plumbing
    // -----------------------------------------------------------------

    fn append_suspended(&mut self, id: TaskId) {
        debug_assert!(self.suspended_len < NUM_TASKS, "suspended list overflow");
        self.suspended_ids[self.suspended_len] = id;
        self.suspended_len += 1;
    }

    fn remove_suspended_at(&mut self, index: usize) {
        self.suspended_len -= 1;
        for u in index..self.suspended_len {
            self.suspended_ids[u] = self.suspended_ids[u + 1];
        }
    }

    fn append_ready(&mut self, id: TaskId) {
        let class = self.tasks[id].prio_class as usize;
        debug_assert!(
            self.ready_len[class] < MAX_TASKS_IN_PRIO_CLASS,
            "too many ready tasks in one priority class"
        );
        self.ready_ids[class][self.ready_len[class]] = id;
        self.ready_len[class] += 1;
    }

    fn insert_ready_head(&mut self, id: TaskId) {
        let class = self.tasks[id].prio_class as usize;
        debug_assert!(
            self.ready_len[class] < MAX_TASKS_IN_PRIO_CLASS,
            "too many ready tasks in one priority class"
        );
        let len = self.ready_len[class];
        let mut u = len;
        while u > 0 {
            self.ready_ids[class][u] = self.ready_ids[class][u - 1];
            u -= 1;
        }
        self.ready_ids[class][0] = id;
        self.ready_len[class] = len + 1;
    }

    fn take_ready_head(&mut self, class: usize) -> TaskId {
        debug_assert!(self.ready_len[class] > 0);
        let id = self.ready_ids[class][0];
        self.ready_len[class] -= 1;
        for u in 0..self.ready_len[class] {
            self.ready_ids[class][u] = self.ready_ids[class][u + 1];
        }
        id
    }

    // -----------------------------------------------------------------
    // Port interface
    // -----------------------------------------------------------------

    /// True iff the scheduling decision is not yet realized on the CPU.
    pub fn switch_pending(&self) -> bool {
        self.active_task_id != self.running_task_id
    }

    /// Store the saved stack pointer of the task leaving the CPU. Called
    /// by the context-switch handler.
    pub fn save_running_stack_pointer(&mut self, sp: *mut u32) {
        self.tasks[self.running_task_id].stack_pointer = sp;
    }

    /// Commit the pending scheduling decision and hand out the stack
    /// pointer to resume. Called by the context-switch handler after
    /// [`Scheduler::save_running_stack_pointer`].
    pub fn finish_context_switch(&mut self) -> *mut u32 {
        self.running_task_id = self.active_task_id;
        self.tasks[self.running_task_id].stack_pointer
    }

    /// Take the event vector that satisfied the wait of task `id` and
    /// clear its posted events. Called on the task's resumption and by
    /// the first-dispatch springboard.
    pub fn consume_resume_events(&mut self, id: TaskId) -> EventMask {
        self.tasks[id].consume_events()
    }

    /// Entry function of task `id`; `None` for the idle descriptor until
    /// the kernel installs the idle loop.
    pub fn task_entry(&self, id: TaskId) -> Option<TaskFunction> {
        self.tasks[id].entry
    }

    // -----------------------------------------------------------------
    // Accessors and diagnostics
    // -----------------------------------------------------------------

    /// The task currently chosen to run (possibly idle).
    pub fn active_task(&self) -> TaskId {
        self.active_task_id
    }

    /// The current cyclic system time.
    pub fn system_time(&self) -> TickCount {
        self.time
    }

    /// Number of bytes at the low end of the stack of task `id` that
    /// still carry the prefill pattern — an approximate but cheap measure
    /// of the stack headroom that was never touched.
    pub fn stack_reserve(&self, id: TaskId) -> usize {
        let t = &self.tasks[id];
        if t.stack_area.is_null() {
            return 0;
        }
        let mut unused = 0;
        while unused < t.stack_size {
            let byte = unsafe { t.stack_area.add(unused).read_volatile() };
            if byte != STACK_FILL_BYTE {
                break;
            }
            unused += 1;
        }
        unused
    }

    /// Number of detected absolute-timer overruns of task `id`,
    /// optionally resetting the counter. The counter saturates at 255 and
    /// is a diagnostic, not a correctness gate: lateness beyond half the
    /// time cycle goes unrecognized.
    pub fn overrun_count(&mut self, id: TaskId, reset: bool) -> u8 {
        debug_assert!(id < NUM_TASKS, "task index out of range");
        let count = self.tasks[id].overrun_count;
        if reset {
            self.tasks[id].overrun_count = 0;
        }
        count
    }

    /// Current owner of mutex `index`, `None` while it is free.
    pub fn mutex_owner(&self, index: usize) -> Option<TaskId> {
        debug_assert!(index < NUM_MUTEX_EVENTS, "mutex index out of range");
        self.mutex_owner[index]
    }

    /// Current balance of semaphore `index`.
    pub fn semaphore_count(&self, index: usize) -> u8 {
        debug_assert!(index < NUM_SEMAPHORE_EVENTS, "semaphore index out of range");
        self.semaphore_count[index]
    }

    /// Whether every task descriptor has been configured. The kernel
    /// checks this before seeding stacks and starting the tick interrupt.
    pub fn all_tasks_configured(&self) -> bool {
        self.tasks[..NUM_TASKS].iter().all(|t| t.configured)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{mutex_event, semaphore_event, EVT_EVENT_04, EVT_EVENT_05};

    fn nowhere() -> *mut u8 {
        // Scheduler logic never dereferences the stack area; only the
        // stack-reserve test needs a real buffer.
        core::ptr::NonNull::<u8>::dangling().as_ptr()
    }

    fn parked(_: EventMask) -> ! {
        unreachable!("host tests never dispatch task functions")
    }

    fn add_task(
        s: &mut Scheduler,
        id: TaskId,
        prio_class: u8,
        start_mask: EventMask,
        start_all: bool,
        start_timeout: TickCount,
    ) {
        s.initialize_task(
            id,
            parked,
            prio_class,
            0,
            nowhere(),
            64,
            start_mask,
            start_all,
            start_timeout,
        );
    }

    /// Drive one tick and, like the port would, immediately commit any
    /// pending switch.
    fn tick(s: &mut Scheduler) {
        s.tick();
        s.finish_context_switch();
    }

    /// The invariants that must hold at every critical-section exit.
    fn check_invariants(s: &Scheduler) {
        let mut seen = [0u8; NUM_TASKS];
        if s.active_task_id != IDLE_TASK_ID {
            seen[s.active_task_id] += 1;
        }
        for class in 0..NUM_PRIO_CLASSES {
            assert!(s.ready_len[class] <= MAX_TASKS_IN_PRIO_CLASS);
            for i in 0..s.ready_len[class] {
                let id = s.ready_ids[class][i];
                assert_eq!(s.tasks[id].prio_class as usize, class);
                seen[id] += 1;
            }
        }
        for i in 0..s.suspended_len {
            let id = s.suspended_ids[i];
            assert!(
                !s.tasks[id].wait_condition_met(),
                "a satisfied task must not remain suspended"
            );
            seen[id] += 1;
        }
        for id in 0..NUM_TASKS {
            let expected = if s.tasks[id].configured { 1 } else { 0 };
            assert_eq!(seen[id], expected, "task {} state multiplicity", id);
        }
        // A mutex bit is posted to at most one task, and only its owner.
        for idx in 0..NUM_MUTEX_EVENTS {
            let bit = mutex_event(idx);
            let mut holder = None;
            for id in 0..NUM_TASKS {
                if s.tasks[id].posted_events & bit != 0 {
                    assert!(holder.is_none(), "mutex granted twice");
                    holder = Some(id);
                }
            }
            if holder.is_some() {
                assert_eq!(s.mutex_owner[idx], holder);
            }
        }
    }

    #[test]
    fn test_initial_state_is_idle() {
        let s = Scheduler::new();
        assert_eq!(s.active_task(), IDLE_TASK_ID);
        assert!(!s.switch_pending());
        assert_eq!(s.system_time(), TickCount::BEFORE_ZERO);
    }

    #[test]
    fn test_first_tick_observes_time_zero() {
        let mut s = Scheduler::new();
        s.tick();
        assert_eq!(s.system_time(), 0);
    }

    #[test]
    fn test_task_released_by_start_condition() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_ABSOLUTE_TIMER, false, 1);
        tick(&mut s); // time 0
        assert_eq!(s.active_task(), IDLE_TASK_ID);
        tick(&mut s); // time 1 == due
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_idle_only_system_ticks_without_switching() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 0, EVT_EVENT_04, false, 0);
        for _ in 0..100 {
            assert!(!s.tick());
            assert_eq!(s.active_task(), IDLE_TASK_ID);
        }
        check_invariants(&s);
    }

    #[test]
    #[should_panic(expected = "idle task")]
    fn test_idle_wait_is_a_contract_violation() {
        let mut s = Scheduler::new();
        s.wait(EVT_EVENT_04, false, 0);
    }

    #[test]
    fn test_timeout_path_wakes_one_tick_late_and_returns_delay_bit() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        s.consume_resume_events(0);

        // Wait on a broadcast event with timeout 20; nobody posts it.
        assert_eq!(s.wait(EVT_EVENT_04, false, 20), WaitOutcome::Suspended);
        s.finish_context_switch();
        for _ in 0..20 {
            tick(&mut s);
            assert_eq!(s.active_task(), IDLE_TASK_ID);
        }
        // The +1 guard makes the delay a lower bound: release on tick 21.
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.consume_resume_events(0), EVT_DELAY_TIMER);
        assert_eq!(s.overrun_count(0, false), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_delay_zero_suspends_until_next_tick() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);
        assert_eq!(s.wait(EVT_DELAY_TIMER, false, 0), WaitOutcome::Suspended);
        s.finish_context_switch();
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.consume_resume_events(0), EVT_DELAY_TIMER);
    }

    #[test]
    fn test_two_periodic_tasks_different_priorities() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 2, EVT_ABSOLUTE_TIMER, false, 9); // period 10
        add_task(&mut s, 1, 1, EVT_ABSOLUTE_TIMER, false, 99); // period 100

        let mut high_runs = 0u32;
        let mut low_runs = 0u32;
        for _ in 0..1000 {
            tick(&mut s);
            while s.active_task() != IDLE_TASK_ID {
                let id = s.active_task();
                let events = s.consume_resume_events(id);
                assert!(events & EVT_ABSOLUTE_TIMER != 0);
                if id == 0 {
                    high_runs += 1;
                    s.wait(EVT_ABSOLUTE_TIMER, false, 10);
                } else {
                    low_runs += 1;
                    s.wait(EVT_ABSOLUTE_TIMER, false, 100);
                }
                s.finish_context_switch();
            }
            check_invariants(&s);
        }
        assert_eq!(high_runs, 100);
        assert_eq!(low_runs, 10);
        assert_eq!(s.overrun_count(0, false), 0);
        assert_eq!(s.overrun_count(1, false), 0);
    }

    #[test]
    fn test_priority_decides_who_runs_first_on_shared_tick() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 0, EVT_ABSOLUTE_TIMER, false, 1);
        add_task(&mut s, 1, 2, EVT_ABSOLUTE_TIMER, false, 1);
        tick(&mut s); // time 0
        tick(&mut s); // both due at time 1
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        s.wait(EVT_ABSOLUTE_TIMER, false, 50);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_fifo_order_within_one_class() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 1); // due on tick 2
        add_task(&mut s, 1, 1, EVT_DELAY_TIMER, false, 0); // due on tick 1
        tick(&mut s);
        assert_eq!(s.active_task(), 1);
        tick(&mut s);
        // Task 0 became ready later and must not displace task 1.
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_preemptive_post_yields_to_released_waiter() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 0, EVT_DELAY_TIMER, false, 0); // low
        add_task(&mut s, 1, 2, EVT_EVENT_04, false, 0); // high, waits for E
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        s.consume_resume_events(0);

        // The low task posts the event the high task waits on: the post
        // must not return to the low task before the high one suspends.
        assert!(s.post(EVT_EVENT_04));
        s.finish_context_switch();
        assert_eq!(s.active_task(), 1);
        check_invariants(&s);

        assert_eq!(s.consume_resume_events(1), EVT_EVENT_04);
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();
        // The preempted task resumes ahead of any same-class newcomer.
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_same_priority_release_does_not_preempt() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        add_task(&mut s, 1, 1, EVT_EVENT_04, false, 0);
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        s.consume_resume_events(0);
        assert!(!s.post(EVT_EVENT_04));
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_post_broadcast_is_idempotent() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_EVENT_04 | EVT_EVENT_05, true, 0);
        tick(&mut s);
        assert_eq!(s.active_task(), IDLE_TASK_ID);

        s.post_from_isr(EVT_EVENT_04);
        let posted_once = s.tasks[0].posted_events;
        assert_eq!(s.active_task(), IDLE_TASK_ID);
        s.post_from_isr(EVT_EVENT_04);
        assert_eq!(s.tasks[0].posted_events, posted_once);
        assert_eq!(s.active_task(), IDLE_TASK_ID);

        // The all-wait completes only once the second event arrives.
        s.post_from_isr(EVT_EVENT_05);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        assert_eq!(
            s.consume_resume_events(0),
            EVT_EVENT_04 | EVT_EVENT_05
        );
        check_invariants(&s);
    }

    #[test]
    fn test_events_outside_the_wait_mask_are_discarded() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        // The stale due time of 0 matches the very first tick, so the
        // absolute-timer bit is posted alongside the delay bit; only the
        // waited-for delay bit may be returned.
        tick(&mut s);
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.consume_resume_events(0), EVT_DELAY_TIMER);
    }

    // -----------------------------------------------------------------
    // Mutexes
    // -----------------------------------------------------------------

    #[test]
    fn test_free_mutex_is_acquired_without_blocking() {
        let mutex = mutex_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);

        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Immediate(mutex));
        assert_eq!(s.mutex_owner(0), Some(0));
        assert_eq!(s.active_task(), 0);
        check_invariants(&s);
    }

    #[test]
    fn test_posted_mutex_with_no_waiter_stays_free() {
        let mutex = mutex_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);

        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Immediate(mutex));
        assert!(!s.post(mutex));
        assert_eq!(s.mutex_owner(0), None);
        // Round trip: the next wait acquires immediately again.
        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Immediate(mutex));
        check_invariants(&s);
    }

    #[test]
    fn test_mutex_handoff_wakes_exactly_one_waiter() {
        let mutex = mutex_event(0);
        let mut s = Scheduler::new();
        // Three tasks of equal priority contending for the mutex.
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        add_task(&mut s, 1, 1, EVT_DELAY_TIMER, false, 1);
        add_task(&mut s, 2, 1, EVT_DELAY_TIMER, false, 2);
        tick(&mut s);

        // T0 takes the mutex and then parks on an unrelated event.
        assert_eq!(s.active_task(), 0);
        s.consume_resume_events(0);
        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Immediate(mutex));
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();

        // T1 blocks on the mutex, T2 parks on something else entirely.
        tick(&mut s);
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Suspended);
        s.finish_context_switch();
        tick(&mut s);
        assert_eq!(s.active_task(), 2);
        s.consume_resume_events(2);
        s.wait(EVT_EVENT_05, false, 0);
        s.finish_context_switch();
        assert_eq!(s.active_task(), IDLE_TASK_ID);

        // Wake T0 so it can release the mutex.
        s.post_from_isr(EVT_EVENT_04);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.consume_resume_events(0), EVT_EVENT_04);

        // Releasing hands the mutex to T1 atomically within the post;
        // equal priority, so T0 keeps running. T2 is untouched.
        assert!(!s.post(mutex));
        assert_eq!(s.mutex_owner(0), Some(1));
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.tasks[2].posted_events & mutex, 0);
        check_invariants(&s);

        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 1);
        assert_eq!(s.consume_resume_events(1), mutex);
    }

    #[test]
    fn test_mutex_prefers_highest_class_then_oldest_waiter() {
        let mutex = mutex_event(1);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 0, EVT_DELAY_TIMER, false, 0); // will hold
        add_task(&mut s, 1, 0, EVT_DELAY_TIMER, false, 1); // low waiter, older
        add_task(&mut s, 2, 2, EVT_DELAY_TIMER, false, 2); // high waiter, younger
        tick(&mut s);
        s.consume_resume_events(0);
        assert_eq!(s.wait(mutex, false, 0), WaitOutcome::Immediate(mutex));
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();

        tick(&mut s);
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        s.wait(mutex, false, 0);
        s.finish_context_switch();
        tick(&mut s);
        assert_eq!(s.active_task(), 2);
        s.consume_resume_events(2);
        s.wait(mutex, false, 0);
        s.finish_context_switch();

        s.post_from_isr(EVT_EVENT_04);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        s.consume_resume_events(0);
        // The younger but higher-priority waiter wins the hand-off and,
        // being of a strictly higher class, preempts the releaser.
        assert!(s.post(mutex));
        s.finish_context_switch();
        assert_eq!(s.mutex_owner(1), Some(2));
        assert_eq!(s.active_task(), 2);
        check_invariants(&s);
    }

    #[test]
    #[should_panic(expected = "does not own")]
    fn test_mutex_release_by_non_owner_asserts_in_debug() {
        let mutex = mutex_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        add_task(&mut s, 1, 1, EVT_DELAY_TIMER, false, 1);
        tick(&mut s);
        s.consume_resume_events(0);
        s.wait(mutex, false, 0); // T0 owns the mutex
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();
        tick(&mut s);
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        s.post(mutex); // T1 releases a mutex it never acquired
    }

    // -----------------------------------------------------------------
    // Semaphores
    // -----------------------------------------------------------------

    #[test]
    fn test_semaphore_producer_consumer_capacity_zero() {
        let sem = semaphore_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0); // consumer
        tick(&mut s);
        s.consume_resume_events(0);
        assert_eq!(s.wait(sem, false, 0), WaitOutcome::Suspended);
        s.finish_context_switch();

        for _ in 0..10 {
            // 50 producer-less ticks: the consumer stays asleep and the
            // counter never goes above zero.
            for _ in 0..50 {
                tick(&mut s);
                assert_eq!(s.active_task(), IDLE_TASK_ID);
                assert_eq!(s.semaphore_count(0), 0);
            }
            s.post_from_isr(sem);
            s.finish_context_switch();
            assert_eq!(s.active_task(), 0);
            assert_eq!(s.consume_resume_events(0), sem);
            assert_eq!(s.semaphore_count(0), 0);
            assert_eq!(s.wait(sem, false, 0), WaitOutcome::Suspended);
            s.finish_context_switch();
            check_invariants(&s);
        }
    }

    #[test]
    fn test_semaphore_banks_units_when_nobody_waits() {
        let sem = semaphore_event(1);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);

        s.post_from_isr(sem);
        s.post_from_isr(sem);
        assert_eq!(s.semaphore_count(1), 2);

        // Banked units satisfy waits without blocking, one per wait.
        assert_eq!(s.wait(sem, false, 0), WaitOutcome::Immediate(sem));
        assert_eq!(s.semaphore_count(1), 1);
        assert_eq!(s.wait(sem, false, 0), WaitOutcome::Immediate(sem));
        assert_eq!(s.semaphore_count(1), 0);
        assert_eq!(s.wait(sem, false, 0), WaitOutcome::Suspended);
        check_invariants(&s);
    }

    #[test]
    fn test_semaphore_initial_balance() {
        let sem = semaphore_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        s.set_semaphore_count(0, 3);
        tick(&mut s);
        s.consume_resume_events(0);
        assert_eq!(s.wait(sem, false, 0), WaitOutcome::Immediate(sem));
        assert_eq!(s.semaphore_count(0), 2);
    }

    #[test]
    fn test_semaphore_transfer_is_fifo_among_equal_waiters() {
        let sem = semaphore_event(0);
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        add_task(&mut s, 1, 1, EVT_DELAY_TIMER, false, 1);
        tick(&mut s);
        s.consume_resume_events(0);
        s.wait(sem, false, 0);
        s.finish_context_switch();
        tick(&mut s);
        assert_eq!(s.active_task(), 1);
        s.consume_resume_events(1);
        s.wait(sem, false, 0);
        s.finish_context_switch();

        // T0 suspended first and must be served first.
        s.post_from_isr(sem);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 0);
        assert_eq!(s.tasks[1].posted_events & sem, 0);
        s.consume_resume_events(0);
        s.wait(EVT_EVENT_04, false, 0);
        s.finish_context_switch();

        s.post_from_isr(sem);
        s.finish_context_switch();
        assert_eq!(s.active_task(), 1);
        check_invariants(&s);
    }

    // -----------------------------------------------------------------
    // Overrun diagnostics
    // -----------------------------------------------------------------

    #[test]
    fn test_overrun_counted_when_period_is_exceeded() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);
        s.wait(EVT_ABSOLUTE_TIMER, false, 100);
        s.finish_context_switch();
        while s.active_task() != 0 {
            tick(&mut s);
        }
        s.consume_resume_events(0); // woke at due time 100

        // The task body takes 150 ticks, 50 longer than the period.
        for _ in 0..150 {
            tick(&mut s);
        }
        s.wait(EVT_ABSOLUTE_TIMER, false, 100); // due 200 lies 50 in the past
        assert_eq!(s.overrun_count(0, false), 1);

        // Reading with reset clears the counter.
        assert_eq!(s.overrun_count(0, true), 1);
        assert_eq!(s.overrun_count(0, false), 0);
    }

    #[cfg(feature = "tick-8bit")]
    #[test]
    fn test_overrun_beyond_half_cycle_goes_unrecognized() {
        let mut s = Scheduler::new();
        add_task(&mut s, 0, 1, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        s.consume_resume_events(0);
        s.wait(EVT_ABSOLUTE_TIMER, false, 100);
        s.finish_context_switch();
        while s.active_task() != 0 {
            tick(&mut s);
        }
        s.consume_resume_events(0);

        // 300 ticks of lateness fold back onto the 8-bit cycle: the due
        // time appears to lie ahead and the overrun is missed.
        for _ in 0..300 {
            tick(&mut s);
        }
        s.wait(EVT_ABSOLUTE_TIMER, false, 100);
        assert_eq!(s.overrun_count(0, false), 0);
    }

    // -----------------------------------------------------------------
    // Capacity and diagnostics
    // -----------------------------------------------------------------

    #[test]
    #[should_panic(expected = "too many ready tasks")]
    fn test_ready_list_overflow_detected_in_debug() {
        let mut s = Scheduler::new();
        // One more task than the class can hold, all released together.
        for id in 0..4 {
            add_task(&mut s, id, 1, EVT_DELAY_TIMER, false, 0);
        }
        s.tick();
    }

    #[test]
    fn test_stack_reserve_reports_untouched_bytes() {
        let mut buffer = [STACK_FILL_BYTE; 64];
        // Simulate a task having used the upper 24 bytes of its stack.
        for byte in &mut buffer[40..] {
            *byte = 0x11;
        }
        let mut s = Scheduler::new();
        s.initialize_task(
            0,
            parked,
            1,
            0,
            buffer.as_mut_ptr(),
            buffer.len(),
            EVT_DELAY_TIMER,
            false,
            0,
        );
        assert_eq!(s.stack_reserve(0), 40);
    }

    // -----------------------------------------------------------------
    // Round robin
    // -----------------------------------------------------------------

    #[cfg(feature = "round-robin")]
    #[test]
    fn test_round_robin_rotates_within_class() {
        let mut s = Scheduler::new();
        let slice = 3;
        s.initialize_task(0, parked, 1, slice, nowhere(), 64, EVT_DELAY_TIMER, false, 0);
        s.initialize_task(1, parked, 1, slice, nowhere(), 64, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        let first = s.active_task();
        let second = 1 - first;

        // The peer is ready, so after `slice` ticks the head rotates to
        // the tail of its class.
        for _ in 0..slice - 1 {
            tick(&mut s);
            assert_eq!(s.active_task(), first);
        }
        tick(&mut s);
        assert_eq!(s.active_task(), second);
        for _ in 0..slice {
            tick(&mut s);
        }
        assert_eq!(s.active_task(), first);
        check_invariants(&s);
    }

    #[cfg(feature = "round-robin")]
    #[test]
    fn test_round_robin_without_peer_keeps_running() {
        let mut s = Scheduler::new();
        s.initialize_task(0, parked, 1, 2, nowhere(), 64, EVT_DELAY_TIMER, false, 0);
        tick(&mut s);
        for _ in 0..10 {
            tick(&mut s);
            assert_eq!(s.active_task(), 0);
        }
    }
}
