//! `do_kill` dispatch and the return-from-trap signal delivery algorithm,
//! plus `sigreturn` (§4.F, the orchestration half of the signal
//! subsystem that needs the process table and scheduler — see this
//! module's parent doc comment for why it sits above `task` rather than
//! below it).
//!
//! Ported from `do_kill`/`signal_handler`/`handle_signal`/`sigreturn` in
//! `original_source/src/kernel/ipc/signal.c`. Where that C diverges from
//! the spec's resolved open questions (`do_kill(pid == 0)`'s gid-as-pid
//! recursion), this module follows DESIGN.md's decision instead.

use alloc::sync::Arc;

use super::frame::{InterruptRegisters, SignalFrame, SYSCALL_INT_VECTOR};
use super::{
    is_ignored, is_stop_signal, next_signal, Handler, SignalSet, STOP_SET_MASK, SIGCONT, SIGKILL,
};
use crate::error::{Errno, KResult};
use crate::sync::spinlock::Spinlock;
use crate::task::process::ProcessFlags;
use crate::task::scheduler::{self, lifecycle};
use crate::task::table;
use crate::task::thread::{Thread, ThreadState};

/// `do_kill(pid, sig)` per §4.F. `pid` follows the usual POSIX kill
/// encoding: `>0` a single target, `0` the caller's process group, `-1`
/// every process but init, `<-1` the group `-pid`.
pub fn do_kill(caller_tid: u32, pid: i32, sig: u32) -> KResult<()> {
    if sig == 0 {
        return Ok(());
    }
    if sig > super::NSIG as u32 {
        return Err(Errno::Inval);
    }

    if pid > 0 {
        return send_to_process(pid as u32, sig);
    }

    let caller_thread = table::lookup_thread(caller_tid).ok_or(Errno::Srch)?;
    let caller_process = caller_thread.lock().process.clone();
    let caller_pgid = caller_process.lock().pgid;

    let target_pgid = match pid {
        0 => caller_pgid,
        -1 => 0, // unused: the pid==-1 arm below doesn't filter by group
        p => (-p) as u32,
    };

    for candidate_pid in table::all_pids() {
        if pid == -1 && candidate_pid <= crate::config::INIT_PID {
            continue;
        }
        if pid != -1 {
            let Some(candidate) = table::lookup_process(candidate_pid) else { continue };
            if candidate.lock().pgid != target_pgid {
                continue;
            }
        }
        let _ = send_to_process(candidate_pid, sig);
    }
    Ok(())
}

/// Signal delivery to a single process (the `pid > 0` arm of `do_kill`,
/// and the per-member body of its broadcast forms).
fn send_to_process(target_pid: u32, sig: u32) -> KResult<()> {
    let process_arc = table::lookup_process(target_pid).ok_or(Errno::Srch)?;
    let thread_arc = table::find_thread_of_process(target_pid).ok_or(Errno::Srch)?;

    let (handler, blocked) = {
        let handler = process_arc.lock().sighand[(sig - 1) as usize].handler;
        let blocked = thread_arc.lock().blocked;
        (handler, blocked)
    };
    if is_ignored(blocked, handler, sig) {
        return Ok(());
    }

    let parent_pid = process_arc.lock().parent;

    if sig == SIGCONT {
        thread_arc.lock().pending.0 &= !STOP_SET_MASK;
        {
            let mut p = process_arc.lock();
            p.flags.insert(ProcessFlags::CONTINUED);
            p.flags.remove(ProcessFlags::STOPPED);
        }
        if let Some(parent_pid) = parent_pid {
            lifecycle::notify_parent(parent_pid);
        }
    } else if is_stop_signal(sig) {
        thread_arc.lock().pending.remove(SIGCONT);
        {
            let mut p = process_arc.lock();
            p.flags.insert(ProcessFlags::STOPPED);
            p.flags.remove(ProcessFlags::CONTINUED);
        }
        if let Some(parent_pid) = parent_pid {
            lifecycle::notify_parent(parent_pid);
        }
    }

    thread_arc.lock().pending.insert(sig);

    if sig == SIGCONT || sig == SIGKILL {
        let target_tid = thread_arc.lock().tid;
        if scheduler::current_tid() != Some(target_tid) {
            ready_thread(&thread_arc);
        }
    }

    Ok(())
}

fn ready_thread(thread_arc: &Arc<Spinlock<Thread>>) {
    scheduler::lock_scheduler();
    let (tid, priority, state) = {
        let t = thread_arc.lock();
        (t.tid, t.priority, t.state)
    };
    if state != ThreadState::Terminated {
        let mut t = thread_arc.lock();
        t.state = ThreadState::Ready;
        t.sleep_deadline = None;
        drop(t);
        scheduler::dequeue(tid);
        scheduler::queue(tid, priority);
    }
    scheduler::unlock_scheduler();
}

/// Return-from-trap signal check (§4.F's numbered delivery algorithm),
/// called by the out-of-scope trap layer only when `regs` sits at the
/// very outermost interrupt level of the current thread's kernel stack.
///
/// Returns `true` if a user handler's address was spliced into `regs.eip`
/// (the caller must IRET into the handler, not the originally interrupted
/// instruction) — `false` if nothing was delivered, or if the default
/// coredump action ran (which never returns to userspace: the thread is
/// terminated and rescheduled away before this function returns).
pub fn check_pending_signals(tid: u32, regs: &mut InterruptRegisters) -> bool {
    let Some(thread_arc) = table::lookup_thread(tid) else { return false };
    let process_arc = thread_arc.lock().process.clone();

    let (pending, blocked, signaling) = {
        let t = thread_arc.lock();
        (t.pending, t.blocked, t.signaling)
    };
    if pending.is_empty() || signaling {
        return false;
    }

    let sig = next_signal(pending, blocked);
    if sig == 0 {
        return false;
    }
    thread_arc.lock().pending.remove(sig);

    let from_syscall = regs.int_no == SYSCALL_INT_VECTOR;
    if from_syscall {
        regs.eax = Errno::Intr.abi() as u32;
    }

    let handler = process_arc.lock().sighand[(sig - 1) as usize].handler;
    match handler {
        Handler::Default => {
            // §4.F step 2: default action for a deliverable, non-ignored
            // signal is always coredump (STOP/CONT/IGNORE_SET members are
            // filtered out before ever reaching `pending`, either dropped
            // by `is_ignored` at send time or handled by their own
            // STOP/CONT branch in `send_to_process`).
            let mut p = process_arc.lock();
            p.caused_signal = sig;
            p.flags.insert(ProcessFlags::TERMINATED);
            p.flags.remove(ProcessFlags::CONTINUED | ProcessFlags::STOPPED);
            drop(p);
            thread_arc.lock().pending = SignalSet::EMPTY;
            lifecycle::do_exit(tid, sig as i32);
            false
        }
        Handler::Ignore => false,
        Handler::User(handler_addr) => {
            let prev_signaling = signaling;
            let prev_blocked = blocked;
            let sa_mask = process_arc.lock().sighand[(sig - 1) as usize].mask;

            let frame_size = core::mem::size_of::<SignalFrame>() as u32;
            let new_esp = regs.useresp - frame_size;
            let frame = SignalFrame::new(sigreturn_trampoline as usize as u32, sig, prev_signaling, prev_blocked, *regs);
            unsafe {
                frame.write_to(new_esp);
            }
            regs.useresp = new_esp;
            regs.eip = handler_addr;

            let mut t = thread_arc.lock();
            t.user_regs = *regs;
            t.blocked = SignalSet(prev_blocked.0 | SignalSet::single(sig).0 | sa_mask.0);
            t.signaling = true;
            true
        }
    }
}

/// Placeholder address the out-of-scope trap layer recognizes as "jump to
/// `sigreturn`" — the real trampoline is a tiny assembly stub living in
/// the boot layer that raises the `sigreturn` syscall; this crate only
/// needs its address to stash in the signal frame, not its body.
extern "C" fn sigreturn_trampoline() {}

/// `sigreturn()` per §4.F: the exact inverse of `check_pending_signals`'s
/// user-handler branch. Reads the signal frame back out of the user stack
/// at `regs.useresp`, restores the saved registers, `blocked` mask and
/// `signaling` flag, and hands back the fully-restored register snapshot
/// for the caller to IRET with.
pub fn sigreturn(tid: u32, regs: &InterruptRegisters) -> KResult<InterruptRegisters> {
    let thread_arc = table::lookup_thread(tid).ok_or(Errno::Srch)?;
    let frame = unsafe { SignalFrame::read_from(regs.useresp) };

    let mut t = thread_arc.lock();
    t.blocked = frame.prev_blocked();
    t.signaling = frame.prev_signaling();
    t.user_regs = frame.uregs;
    Ok(frame.uregs)
}

/// `sigsuspend(mask)` (§6): atomically install `mask` as the blocked set
/// and sleep until a signal is delivered, then restore the prior mask and
/// report the interrupted syscall. There's no dedicated wait queue for "a
/// signal became deliverable" — it's driven by whichever `do_kill` call
/// sets a pending bit — so the mask swap and the first deliverability
/// check happen under the scheduler lock (same shape as
/// [`super::super::task::scheduler::wait::WaitQueue::wait_event`]), so a
/// signal posted from an interrupt handler between the two can't be
/// missed.
pub fn sigsuspend(tid: u32, mask: SignalSet) -> KResult<()> {
    let thread_arc = table::lookup_thread(tid).ok_or(Errno::Srch)?;

    scheduler::lock_scheduler();
    let prev_blocked = {
        let mut t = thread_arc.lock();
        let prev = t.blocked;
        t.blocked = mask;
        prev
    };
    loop {
        let (pending, blocked) = {
            let t = thread_arc.lock();
            (t.pending, t.blocked)
        };
        if next_signal(pending, blocked) != 0 {
            break;
        }
        scheduler::schedule();
    }
    scheduler::unlock_scheduler();

    thread_arc.lock().blocked = prev_blocked;
    Err(Errno::Intr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;
    use crate::memory::vma::Mm;
    use crate::signal::{SigAction, SIGCHLD, SIGSEGV, SIGSTOP, SIGTERM, SIGUSR1};
    use crate::task::process::ProcessFlags;

    extern "C" fn noop_entry() {}

    fn blank_mm() -> Mm {
        Mm::new(PhysAddr::new(0x1000), 0x0804_8000)
    }

    #[test]
    fn do_kill_unknown_single_target_is_srch() {
        let caller = table::create_process("dk-caller", blank_mm(), None);
        let caller_tid = table::create_kernel_thread(caller, 1, noop_entry).lock().tid;
        assert_eq!(do_kill(caller_tid, 999_999, SIGTERM), Err(Errno::Srch));
    }

    #[test]
    fn do_kill_sets_pending_bit_on_target() {
        let target = table::create_process("dk-target", blank_mm(), None);
        let target_pid = target.lock().pid;
        let target_thread = table::create_kernel_thread(target, 1, noop_entry);
        let caller_tid = target_thread.lock().tid;

        do_kill(caller_tid, target_pid as i32, SIGTERM).unwrap();
        assert!(target_thread.lock().pending.contains(SIGTERM));
    }

    #[test]
    fn do_kill_drops_ignored_signal_without_setting_pending() {
        let target = table::create_process("dk-ignored", blank_mm(), None);
        let target_pid = target.lock().pid;
        target.lock().sighand[(SIGTERM - 1) as usize] = SigAction {
            handler: Handler::Ignore,
            mask: SignalSet::EMPTY,
            flags: 0,
        };
        let target_thread = table::create_kernel_thread(target, 1, noop_entry);
        let caller_tid = target_thread.lock().tid;

        do_kill(caller_tid, target_pid as i32, SIGTERM).unwrap();
        assert!(!target_thread.lock().pending.contains(SIGTERM));
    }

    #[test]
    fn do_kill_stop_then_cont_flips_flags_and_readies_target() {
        let parent = table::create_process("dk-parent", blank_mm(), None);
        let parent_pid = parent.lock().pid;
        let parent_thread = table::create_kernel_thread(parent.clone(), 1, noop_entry);
        let child = table::create_process("dk-child", blank_mm(), Some(parent_pid));
        let child_pid = child.lock().pid;
        let child_thread = table::create_kernel_thread(child.clone(), 1, noop_entry);
        let child_tid = child_thread.lock().tid;

        do_kill(parent_thread.lock().tid, child_pid as i32, SIGSTOP).unwrap();
        assert!(child.lock().flags.contains(ProcessFlags::STOPPED));
        assert!(!child.lock().flags.contains(ProcessFlags::CONTINUED));
        assert!(parent_thread.lock().pending.contains(SIGCHLD));

        child_thread.lock().state = ThreadState::Waiting;
        scheduler::dequeue(child_tid);

        do_kill(parent_thread.lock().tid, child_pid as i32, SIGCONT).unwrap();
        assert!(child.lock().flags.contains(ProcessFlags::CONTINUED));
        assert!(!child.lock().flags.contains(ProcessFlags::STOPPED));
        assert_eq!(child_thread.lock().state, ThreadState::Ready);
    }

    #[test]
    fn do_kill_group_broadcast_reaches_every_member() {
        let leader = table::create_process("dk-leader", blank_mm(), None);
        let leader_pid = leader.lock().pid;
        let leader_thread = table::create_kernel_thread(leader.clone(), 1, noop_entry);
        let member = table::create_process("dk-member", blank_mm(), None);
        member.lock().pgid = leader_pid;
        let member_thread = table::create_kernel_thread(member, 1, noop_entry);

        do_kill(leader_thread.lock().tid, 0, SIGTERM).unwrap();

        assert!(leader_thread.lock().pending.contains(SIGTERM));
        assert!(member_thread.lock().pending.contains(SIGTERM));
    }

    #[test]
    fn check_pending_signals_default_coredump_terminates_process() {
        let process = table::create_process("dlv-coredump", blank_mm(), None);
        let thread = table::create_kernel_thread(process.clone(), 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().pending.insert(SIGSEGV);

        let mut regs = InterruptRegisters::default();
        let delivered_to_handler = check_pending_signals(tid, &mut regs);

        assert!(!delivered_to_handler);
        assert_eq!(process.lock().caused_signal, SIGSEGV);
        assert!(process.lock().flags.contains(ProcessFlags::TERMINATED));
    }

    #[test]
    fn check_pending_signals_user_handler_round_trips_through_sigreturn() {
        let process = table::create_process("dlv-handler", blank_mm(), None);
        process.lock().sighand[(SIGUSR1 - 1) as usize] = SigAction {
            handler: Handler::User(0x0804_9000),
            mask: SignalSet::EMPTY,
            flags: 0,
        };
        let thread = table::create_kernel_thread(process, 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().pending.insert(SIGUSR1);

        // A user stack the frame can actually be written to/read from.
        let mut stack = alloc::vec![0u8; 4096];
        let stack_top = stack.as_mut_ptr() as u32 + 4096;

        let mut regs = InterruptRegisters {
            eip: 0x0804_8123,
            useresp: stack_top,
            eax: 0x42,
            ..Default::default()
        };
        let delivered = check_pending_signals(tid, &mut regs);
        assert!(delivered);
        assert_eq!(regs.eip, 0x0804_9000);
        assert!(thread.lock().blocked.contains(SIGUSR1));
        assert!(thread.lock().signaling);

        // Handler "returns" through the sigreturn trampoline: regs.useresp
        // still points at the frame sigreturn must consume.
        let restored = sigreturn(tid, &regs).unwrap();
        assert_eq!(restored.eip, 0x0804_8123);
        assert_eq!(restored.eax, 0x42);
        assert!(!thread.lock().blocked.contains(SIGUSR1));
        assert!(!thread.lock().signaling);

        core::mem::forget(stack);
    }

    #[test]
    fn check_pending_signals_sets_eintr_for_interrupted_syscall() {
        let process = table::create_process("dlv-eintr", blank_mm(), None);
        process.lock().sighand[(SIGUSR1 - 1) as usize] = SigAction {
            handler: Handler::User(0x0804_9000),
            mask: SignalSet::EMPTY,
            flags: 0,
        };
        let thread = table::create_kernel_thread(process, 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().pending.insert(SIGUSR1);

        let mut stack = alloc::vec![0u8; 4096];
        let stack_top = stack.as_mut_ptr() as u32 + 4096;
        let mut regs = InterruptRegisters {
            useresp: stack_top,
            int_no: SYSCALL_INT_VECTOR,
            ..Default::default()
        };
        check_pending_signals(tid, &mut regs);
        assert_eq!(regs.eax, Errno::Intr.abi() as u32);
        core::mem::forget(stack);
    }

    #[test]
    fn sigsuspend_returns_eintr_and_restores_prior_mask_once_a_signal_is_pending() {
        let process = table::create_process("dlv-suspend", blank_mm(), None);
        let thread = table::create_kernel_thread(process, 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().blocked = SignalSet::single(SIGTERM);
        thread.lock().pending.insert(SIGUSR1);

        let result = sigsuspend(tid, SignalSet::EMPTY);

        assert_eq!(result, Err(Errno::Intr));
        assert!(thread.lock().blocked.contains(SIGTERM));
        assert!(!thread.lock().blocked.contains(SIGUSR1));
    }

    #[test]
    fn check_pending_signals_is_noop_while_already_signaling() {
        let process = table::create_process("dlv-reentry", blank_mm(), None);
        let thread = table::create_kernel_thread(process, 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().pending.insert(SIGUSR1);
        thread.lock().signaling = true;

        let mut regs = InterruptRegisters::default();
        assert!(!check_pending_signals(tid, &mut regs));
    }
}
