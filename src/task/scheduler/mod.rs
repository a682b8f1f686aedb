//! Single-CPU cooperative-preemptive scheduler (§4.C, §5).
//!
//! Grounded in the teacher's submodule/re-export layout
//! (`task/scheduler/mod.rs` pulling in `run_queue`, `wait`, `fork`,
//! `lifecycle` and re-exporting their public API) and its
//! `static SCHEDULER: Spinlock<Option<Scheduler>>` singleton idiom, with
//! the per-CPU machinery dropped entirely — this kernel targets exactly
//! one CPU (§1's Non-goals exclude SMP), so there is one run queue and
//! one "current thread" rather than one per core.
//!
//! `lock_scheduler`/`unlock_scheduler` are the recursive critical-section
//! primitive §4.C calls for: on a single CPU the only concurrent writer to
//! scheduler state is a timer interrupt landing on top of whatever the
//! current thread was doing, so the lock is simply "disable interrupts,
//! but let the same call stack nest without deadlocking." The run queue
//! itself still sits behind its own [`Spinlock`] for the borrow checker's
//! sake, but because interrupts are already off whenever that lock is
//! taken, it never actually contends.

mod run_queue;
pub mod exec;
pub mod fork;
pub mod lifecycle;
pub mod wait;

pub use exec::*;
pub use fork::*;
pub use lifecycle::*;
pub use wait::*;

use crate::sync::spinlock::Spinlock;
use crate::task::thread::ThreadState;
use core::sync::atomic::{AtomicU32, Ordering};
use run_queue::RunQueue;

static SCHEDULER: Spinlock<Option<RunQueue>> = Spinlock::new(None);

/// tid of the thread currently executing, 0 if the scheduler hasn't
/// picked one yet (boot, before [`init`]).
static CURRENT_TID: AtomicU32 = AtomicU32::new(0);

static LOCK_DEPTH: AtomicU32 = AtomicU32::new(0);
static mut LOCK_SAVED_IRQ: bool = false;

pub fn init() {
    *SCHEDULER.lock() = Some(RunQueue::new());
}

/// Acquire the recursive scheduler lock. Disables interrupts on the
/// outermost call only; nested calls from the same flow of control just
/// bump a depth counter.
pub fn lock_scheduler() {
    if LOCK_DEPTH.load(Ordering::Relaxed) == 0 {
        let was_enabled = crate::arch::hal::save_and_disable_interrupts();
        unsafe {
            LOCK_SAVED_IRQ = was_enabled;
        }
    }
    LOCK_DEPTH.fetch_add(1, Ordering::Relaxed);
}

/// Release one level of the recursive scheduler lock. Restores the
/// caller's original interrupt-enable state only once the outermost
/// `lock_scheduler` call has been matched.
pub fn unlock_scheduler() {
    let prev = LOCK_DEPTH.fetch_sub(1, Ordering::Relaxed);
    debug_assert!(prev >= 1, "unlock_scheduler called without a matching lock_scheduler");
    if prev == 1 {
        crate::arch::hal::restore_interrupt_state(unsafe { LOCK_SAVED_IRQ });
    }
}

/// tid of the thread currently running, or `None` before the first pick.
pub fn current_tid() -> Option<u32> {
    match CURRENT_TID.load(Ordering::Relaxed) {
        0 => None,
        tid => Some(tid),
    }
}

/// Enqueue `tid` at `priority` (§4.C). Caller must hold the scheduler lock
/// and must not enqueue a tid already present in the run queue.
pub fn queue(tid: u32, priority: u8) {
    if let Some(rq) = SCHEDULER.lock().as_mut() {
        rq.enqueue(tid, priority);
    }
}

/// Remove `tid` from the run queue without examining its thread state —
/// used when a thread transitions out of Ready via a path other than
/// being picked (blocking, termination).
pub fn dequeue(tid: u32) {
    if let Some(rq) = SCHEDULER.lock().as_mut() {
        rq.remove(tid);
    }
}

pub fn run_queue_len() -> usize {
    SCHEDULER.lock().as_ref().map_or(0, |rq| rq.total_count())
}

/// Re-evaluate a thread's priority in the run queue: remove then
/// re-enqueue at the new level if it's currently queued. A no-op if the
/// thread isn't in the Ready state.
pub fn update_priority(tid: u32, new_priority: u8) {
    lock_scheduler();
    if let Some(thread) = crate::task::table::lookup_thread(tid) {
        let mut t = thread.lock();
        t.priority = new_priority;
        if t.state == ThreadState::Ready {
            dequeue(tid);
            queue(tid, new_priority);
        }
    }
    unlock_scheduler();
}

/// Pick the next Ready thread and context-switch into it. Puts the
/// outgoing thread back on the run queue if it's still Ready/Running
/// (§4.C); a thread that has transitioned to Waiting/Terminated is left
/// off the queue by whoever made that transition.
///
/// Grounded in the teacher's `schedule_inner`, collapsed to the
/// single-CPU case: no per-CPU state, no work stealing, no preemption
/// bookkeeping beyond picking a tid and swapping stacks.
///
/// `unlock_scheduler()` runs *after* `context_switch` returns rather than
/// before, deliberately: for a thread resuming an earlier `schedule()`
/// call, "returning" from `context_switch` is the moment it is actually
/// running again, and only then is it safe to let interrupts back in. A
/// brand-new thread (seeded by [`crate::task::table::create_kernel_thread`]
/// or [`crate::task::table::create_user_thread`]) never reaches this
/// line at all — its trampoline calls `unlock_scheduler()` itself (see
/// [`crate::task::trapframe::user_thread_elf_entry`]), inheriting the
/// extra recursion level its creator left open.
pub fn schedule() {
    lock_scheduler();

    let outgoing_tid = current_tid();
    if let Some(tid) = outgoing_tid {
        if let Some(thread) = crate::task::table::lookup_thread(tid) {
            let mut t = thread.lock();
            if t.state == ThreadState::Running {
                t.state = ThreadState::Ready;
                let pri = t.priority;
                drop(t);
                queue(tid, pri);
            }
        }
    }

    let next_tid = SCHEDULER.lock().as_mut().and_then(|rq| rq.dequeue_highest());
    let next_tid = match next_tid {
        Some(tid) => tid,
        None => {
            // Nothing runnable: the outgoing thread (if any) simply keeps
            // running past this call.
            unlock_scheduler();
            return;
        }
    };

    let next = match crate::task::table::lookup_thread(next_tid) {
        Some(t) => t,
        None => {
            unlock_scheduler();
            return;
        }
    };

    if Some(next_tid) == outgoing_tid {
        // Already current — nothing to switch.
        next.lock().state = ThreadState::Running;
        unlock_scheduler();
        return;
    }

    let new_esp = {
        let mut next_guard = next.lock();
        next_guard.state = ThreadState::Running;
        next_guard.kernel_esp
    };
    CURRENT_TID.store(next_tid, Ordering::Relaxed);

    static mut SCRATCH_ESP: u32 = 0;
    let old_esp_ptr: *mut u32 = match outgoing_tid.and_then(crate::task::table::lookup_thread) {
        Some(out) => {
            let out_guard = out.lock();
            let ptr = &out_guard.kernel_esp as *const u32 as *mut u32;
            // Released without restoring interrupts: the incoming
            // thread's own saved state determines what happens next, not
            // the outgoing thread's (see `release_no_irq_restore`'s doc).
            out_guard.release_no_irq_restore();
            ptr
        }
        None => unsafe { core::ptr::addr_of_mut!(SCRATCH_ESP) },
    };

    unsafe {
        crate::task::context::context_switch(old_esp_ptr, new_esp);
    }

    unlock_scheduler();
}
