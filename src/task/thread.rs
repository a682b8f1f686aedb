//! Schedulable execution context (§3, §4.C, §4.D).
//!
//! Grounded in the teacher's `task/thread.rs` shape — a heap-allocated
//! kernel stack plus a `Ready/Running/.../Terminated` state machine, fixed
//! per-thread fields rather than a dynamic bag — generalized for this
//! crate's trap-frame-based context switch (no `CpuContext` register
//! snapshot; the trap frame at the top of the kernel stack carries that
//! role, see [`crate::task::trapframe`]) and for address spaces shared
//! across multiple threads of one process, per the Design Notes' resolved
//! split between `Process` (owns the `Mm`) and `Thread` (references it).
//!
//! The run queue (`task::scheduler::run_queue`) stores bare `tid`s in its
//! FIFO levels the same way the teacher's `RunQueue` does, so a thread
//! carries no intrusive run-queue link of its own — table lookup by tid
//! is how the scheduler gets back to a `Thread`.

use crate::signal::frame::InterruptRegisters;
use crate::signal::SignalSet;
use crate::sync::spinlock::Spinlock;
use crate::task::process::Process;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Returns a fresh, globally unique tid.
pub fn alloc_tid() -> u32 {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

/// Execution state of a thread (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Waiting,
    Terminated,
}

/// Scheduling policy. Only one is implemented (§1/§9: preemptive quantum
/// enforcement and priority inheritance are out of scope), kept as an enum
/// rather than a bare priority number so the run queue's dispatch switch
/// has somewhere to grow without widening every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    Normal,
}

const KERNEL_STACK_SIZE: usize = crate::config::KERNEL_STACK_SIZE as usize;

/// A schedulable thread of control.
pub struct Thread {
    pub tid: u32,
    pub process: Arc<Spinlock<Process>>,
    pub state: ThreadState,
    pub policy: SchedPolicy,
    pub priority: u8,
    kernel_stack: Box<[u8]>,
    /// Saved kernel-mode stack pointer — the address a context switch
    /// restores into `esp` to resume this thread (points at a
    /// [`crate::task::trapframe::TrapFrame`] the first time it runs).
    pub kernel_esp: u32,
    /// Saved user-mode register snapshot, written on trap entry and
    /// restored on trap exit (or consumed directly by `fork`'s resume
    /// trampoline, see [`crate::task::trapframe::user_thread_entry`]).
    pub user_regs: InterruptRegisters,
    pub pending: SignalSet,
    pub blocked: SignalSet,
    /// Set while a handler for a non-reentrant signal is running on this
    /// thread's behalf (§4.F's `signaling` field; prevents the same signal
    /// from recursively interrupting its own handler before `sigreturn`).
    pub signaling: bool,
    /// Wake tick for a one-shot sleep (`thread_sleep`), `None` when not
    /// sleeping.
    pub sleep_deadline: Option<u64>,
}

impl Thread {
    /// Allocate a fresh thread with its own kernel stack, attached to
    /// `process`. The kernel stack pointer is left at the very top — the
    /// caller must seed a trap frame via
    /// [`crate::task::trapframe::TrapFrameBuilder`] before this thread can
    /// be scheduled.
    pub fn new(process: Arc<Spinlock<Process>>, priority: u8) -> Self {
        let kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
        let kernel_esp = kernel_stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
        Thread {
            tid: alloc_tid(),
            process,
            state: ThreadState::Ready,
            policy: SchedPolicy::Normal,
            priority,
            kernel_stack,
            kernel_esp,
            user_regs: InterruptRegisters::default(),
            pending: SignalSet::EMPTY,
            blocked: SignalSet::EMPTY,
            signaling: false,
            sleep_deadline: None,
        }
    }

    /// Top (highest address, exclusive) of this thread's kernel stack —
    /// where a fresh trap frame is seeded.
    pub fn kernel_stack_top(&self) -> u32 {
        self.kernel_stack.as_ptr() as u32 + self.kernel_stack.len() as u32
    }

    pub fn kernel_stack_bottom(&self) -> u32 {
        self.kernel_stack.as_ptr() as u32
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;
    use crate::memory::vma::Mm;

    fn sample_process() -> Arc<Spinlock<Process>> {
        let mm = Mm::new(PhysAddr::new(0x1000), 0x0804_8000);
        Arc::new(Spinlock::new(Process::new(1, "init", mm)))
    }

    #[test]
    fn new_thread_starts_ready_with_top_of_stack_esp() {
        let t = Thread::new(sample_process(), 10);
        assert_eq!(t.state, ThreadState::Ready);
        assert_eq!(t.kernel_esp, t.kernel_stack_top());
        assert!(t.kernel_stack_top() > t.kernel_stack_bottom());
    }

    #[test]
    fn tids_are_unique_and_increasing() {
        let p = sample_process();
        let a = Thread::new(p.clone(), 1);
        let b = Thread::new(p, 1);
        assert!(b.tid > a.tid);
    }
}
