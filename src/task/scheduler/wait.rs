//! Blocking primitives built on top of the scheduler (§4.C, §5): a generic
//! `WaitQueue` for `wait_event`/`wake_up`, and the one-shot sleep timer
//! `waitpid`, `sigsuspend`, and the run queue itself all share.
//!
//! Grounded in the teacher's `task/scheduler/wait.rs` — a per-call poll
//! loop (`block_current_thread`) that sets the thread to `Waiting`, drops
//! it from the run queue, and calls `schedule()` — generalized into a
//! reusable queue type rather than one bespoke loop per blocking syscall,
//! since this crate's signal/`waitpid` surface needs the same shape in
//! three places (`child_wait`, `sigsuspend`, sleep).

use alloc::vec::Vec;

use crate::sync::spinlock::Spinlock;
use crate::task::table;
use crate::task::thread::ThreadState;

use super::{current_tid, dequeue, lock_scheduler, queue, schedule, unlock_scheduler};

/// A queue of tids blocked on some condition outside the scheduler's own
/// knowledge (a child exiting, a file becoming readable, ...). Wakes are
/// non-sticky (§5): `wake_up` only readies whoever was queued *at the time
/// it ran* and each woken thread re-checks its own condition on resume, so
/// a wake racing a fresh waiter never gets silently swallowed by one
/// thread's single `Ready` transition.
pub struct WaitQueue(Spinlock<Vec<u32>>);

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue(Spinlock::new(Vec::new()))
    }

    /// Block the calling thread until `cond` returns true. Re-evaluates
    /// `cond` after every wake-up rather than trusting the wake to mean
    /// "now true" (§5's non-sticky contract) — a waiter can be readied by a
    /// `wake_up` that turns out to have been for something else.
    pub fn wait_event(&self, mut cond: impl FnMut() -> bool) {
        lock_scheduler();
        loop {
            if cond() {
                break;
            }
            let Some(tid) = current_tid() else { break };
            self.0.lock().push(tid);
            if let Some(thread) = table::lookup_thread(tid) {
                thread.lock().state = ThreadState::Waiting;
            }
            dequeue(tid);
            schedule();
        }
        unlock_scheduler();
    }

    /// Ready every thread queued on `self` at the moment of the call. A
    /// woken thread that finds its condition still false (see
    /// `wait_event`) simply re-enqueues itself on its next iteration.
    pub fn wake_up(&self) {
        lock_scheduler();
        let waiters = core::mem::take(&mut *self.0.lock());
        for tid in waiters {
            if let Some(thread) = table::lookup_thread(tid) {
                let mut t = thread.lock();
                if t.state == ThreadState::Waiting {
                    let priority = t.priority;
                    t.state = ThreadState::Ready;
                    drop(t);
                    queue(tid, priority);
                }
            }
        }
        unlock_scheduler();
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Put the calling thread to sleep until `deadline_ms` (absolute, per
/// `arch::hal::ticks_ms`). Woken by [`sweep_sleepers`], not by a
/// `WaitQueue` — a timer deadline has no condition to re-check, just a
/// clock to compare against.
pub fn sleep_until(deadline_ms: u64) {
    lock_scheduler();
    if let Some(tid) = current_tid() {
        if let Some(thread) = table::lookup_thread(tid) {
            let mut t = thread.lock();
            t.sleep_deadline = Some(deadline_ms);
            t.state = ThreadState::Waiting;
        }
        dequeue(tid);
        schedule();
    }
    unlock_scheduler();
}

pub fn sleep_ms(duration_ms: u64) {
    let now = crate::arch::hal::ticks_ms() as u64;
    sleep_until(now + duration_ms);
}

/// Tick-driven wake sweep (§4.C/§5): called from the timer interrupt path
/// to ready every thread whose `sleep_deadline` has passed. A linear scan
/// over every live thread rather than a deadline-ordered timer wheel —
/// this kernel's scale (§1: no SMP, a handful of processes) doesn't need
/// the machinery a deadline heap would bring.
pub fn sweep_sleepers() {
    let now = crate::arch::hal::ticks_ms() as u64;
    lock_scheduler();
    for tid in table::all_tids() {
        let Some(thread) = table::lookup_thread(tid) else { continue };
        let mut t = thread.lock();
        if t.state != ThreadState::Waiting {
            continue;
        }
        let Some(deadline) = t.sleep_deadline else { continue };
        if now < deadline {
            continue;
        }
        t.sleep_deadline = None;
        let priority = t.priority;
        t.state = ThreadState::Ready;
        drop(t);
        queue(tid, priority);
    }
    unlock_scheduler();
}
