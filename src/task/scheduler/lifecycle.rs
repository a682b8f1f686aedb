//! Process termination and reaping: `do_exit`, `waitpid`, `getpid`,
//! `getppid` (§4.E).
//!
//! Grounded in the teacher's `task/scheduler/lifecycle.rs` exit/reap split
//! and `original_source`'s `do_exit`/`sys_waitpid` (orphan reparenting to
//! pid 1, a zombie `Process` surviving in the table until its parent
//! collects its exit code). Ownership release follows §4.E's fixed order:
//! mm, then fs, then files, then sighand, then the thread itself — recorded
//! here as plain field resets rather than explicit drops, since nothing in
//! this crate's `Process`/`Thread` needs an actual destructor order beyond
//! "address space freed before the table entry disappears".

use alloc::string::String;
use alloc::sync::Arc;

use crate::config::INIT_PID;
use crate::error::{Errno, KResult};
use crate::memory::virtual_mem;
use crate::signal::SIGCHLD;
use crate::sync::spinlock::Spinlock;
use crate::task::process::{Process, ProcessFlags};
use crate::task::table;
use crate::task::thread::ThreadState;

use super::{dequeue, lock_scheduler, unlock_scheduler};

pub fn getpid(tid: u32) -> KResult<u32> {
    let thread = table::lookup_thread(tid).ok_or(Errno::Srch)?;
    let process = thread.lock().process.clone();
    Ok(process.lock().pid)
}

pub fn getppid(tid: u32) -> KResult<u32> {
    let thread = table::lookup_thread(tid).ok_or(Errno::Srch)?;
    let process = thread.lock().process.clone();
    Ok(process.lock().parent.unwrap_or(0))
}

/// Terminate the process owning `tid` with `code` (§4.E): reparent its
/// children to `init`, release its address space, mark it a zombie, and
/// wake its parent's `waitpid`.
pub fn do_exit(tid: u32, code: i32) {
    lock_scheduler();

    let Some(thread_arc) = table::lookup_thread(tid) else {
        unlock_scheduler();
        return;
    };
    let process_arc = thread_arc.lock().process.clone();

    let (pid, parent_pid, children) = {
        let p = process_arc.lock();
        (p.pid, p.parent, p.children.clone())
    };

    for child_pid in children {
        if let Some(child_arc) = table::lookup_process(child_pid) {
            child_arc.lock().parent = Some(INIT_PID);
        }
        if let Some(init_arc) = table::lookup_process(INIT_PID) {
            init_arc.lock().children.push(child_pid);
        }
    }

    {
        let mut p = process_arc.lock();
        virtual_mem::destroy_user_page_directory(p.mm.pd);
        p.mm.vmas.clear();
        p.files = Default::default();
        p.fs = Default::default();
        p.sighand = crate::signal::default_sighand();
        p.flags.insert(ProcessFlags::TERMINATED);
        p.exit_code = code;
    }
    thread_arc.lock().state = ThreadState::Terminated;
    dequeue(tid);

    if let Some(parent_pid) = parent_pid {
        notify_parent(parent_pid);
    }
    let _ = pid;
    unlock_scheduler();
}

/// Wake a parent's `waitpid` and post it `SIGCHLD`. Shared by `do_exit`
/// and the signal subsystem's STOP/CONT handling (§4.F), both of which
/// need to notify a parent the same way when a child's run state changes.
pub(crate) fn notify_parent(parent_pid: u32) {
    let Some(parent_proc) = table::lookup_process(parent_pid) else { return };
    parent_proc.lock().child_wait.wake_up();
    if let Some(parent_thread) = table::find_thread_of_process(parent_pid) {
        parent_thread.lock().pending.insert(SIGCHLD);
    }
}

fn reapable_child(process: &Arc<Spinlock<Process>>, target: i32) -> Option<(u32, i32)> {
    let p = process.lock();
    for &child_pid in &p.children {
        let Some(child_arc) = table::lookup_process(child_pid) else { continue };
        let child = child_arc.lock();
        let matches = match target {
            t if t > 0 => child_pid == t as u32,
            0 => child.pgid == p.pgid,
            -1 => true,
            t => child.pgid == (-t) as u32,
        };
        if matches && child.flags.contains(ProcessFlags::TERMINATED) {
            return Some((child_pid, child.exit_code));
        }
    }
    None
}

fn has_matching_child(process: &Arc<Spinlock<Process>>, target: i32) -> bool {
    let p = process.lock();
    p.children.iter().any(|&child_pid| {
        table::lookup_process(child_pid).is_some_and(|c| {
            let c = c.lock();
            match target {
                t if t > 0 => child_pid == t as u32,
                0 => c.pgid == p.pgid,
                -1 => true,
                t => c.pgid == (-t) as u32,
            }
        })
    })
}

/// Block until a matching child of `caller_tid` has exited, then reap it
/// and return `(pid, exit_code)`. `target` follows `waitpid`'s usual
/// encoding: `>0` a specific pid, `0` the caller's own process group, `-1`
/// any child, `< -1` the group `-target`.
///
/// `options` is accepted for ABI compatibility (§6) but `WNOHANG` is not
/// distinguished from a blocking wait in this crate — see DESIGN.md.
pub fn waitpid(caller_tid: u32, target: i32, _options: u32) -> KResult<(u32, i32)> {
    let caller_thread = table::lookup_thread(caller_tid).ok_or(Errno::Srch)?;
    let process = caller_thread.lock().process.clone();

    if !has_matching_child(&process, target) {
        return Err(Errno::Srch);
    }

    loop {
        if let Some((pid, code)) = reapable_child(&process, target) {
            process.lock().children.retain(|&p| p != pid);
            table::remove_process(pid);
            if let Some(zombie_thread) = table::find_thread_of_process(pid) {
                table::remove_thread(zombie_thread.lock().tid);
            }
            return Ok((pid, code));
        }

        // Safe to take a raw pointer to the queue here: `process` (an
        // `Arc`) is held for the rest of this function, so the `Process`
        // it points at — and the `WaitQueue` embedded in it — stays at a
        // fixed heap address for as long as the pointer below is used.
        let wq_ptr: *const crate::task::scheduler::wait::WaitQueue = {
            let p = process.lock();
            &p.child_wait
        };
        let wq = unsafe { &*wq_ptr };
        wq.wait_event(|| reapable_child(&process, target).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;
    use crate::memory::vma::Mm;

    extern "C" fn noop_entry() {}

    fn blank_mm() -> Mm {
        Mm::new(PhysAddr::new(0x1000), 0x0804_8000)
    }

    #[test]
    fn getpid_and_getppid_reflect_the_owning_process() {
        let parent = table::create_process("lc-parent", blank_mm(), None);
        let parent_pid = parent.lock().pid;
        let child = table::create_process("lc-child", blank_mm(), Some(parent_pid));
        let child_tid = table::create_kernel_thread(child, 1, noop_entry).lock().tid;

        assert_eq!(getppid(child_tid), Ok(parent_pid));
    }

    #[test]
    fn do_exit_marks_process_terminated_and_reparents_children() {
        let grandparent = table::create_process("lc-gp", blank_mm(), None);
        let gp_pid = grandparent.lock().pid;
        let parent = table::create_process("lc-p", blank_mm(), Some(gp_pid));
        let parent_pid = parent.lock().pid;
        let parent_tid = table::create_kernel_thread(parent.clone(), 1, noop_entry).lock().tid;
        let child = table::create_process("lc-c", blank_mm(), Some(parent_pid));
        let child_pid = child.lock().pid;

        do_exit(parent_tid, 7);

        assert!(parent.lock().flags.contains(ProcessFlags::TERMINATED));
        assert_eq!(parent.lock().exit_code, 7);
        assert_eq!(child.lock().parent, Some(crate::config::INIT_PID));
    }

    #[test]
    fn do_exit_delivers_sigchld_to_the_parents_thread() {
        let parent = table::create_process("lc-p2", blank_mm(), None);
        let parent_pid = parent.lock().pid;
        let parent_thread = table::create_kernel_thread(parent, 1, noop_entry);
        let child = table::create_process("lc-c2", blank_mm(), Some(parent_pid));
        let child_tid = table::create_kernel_thread(child, 1, noop_entry).lock().tid;

        do_exit(child_tid, 0);

        assert!(parent_thread.lock().pending.contains(SIGCHLD));
    }

    #[test]
    fn waitpid_reaps_an_already_terminated_child() {
        let parent = table::create_process("lc-p3", blank_mm(), None);
        let parent_pid = parent.lock().pid;
        let parent_tid = table::create_kernel_thread(parent.clone(), 1, noop_entry).lock().tid;
        let child = table::create_process("lc-c3", blank_mm(), Some(parent_pid));
        let child_pid = child.lock().pid;
        let child_tid = table::create_kernel_thread(child, 1, noop_entry).lock().tid;

        do_exit(child_tid, 5);

        let (reaped_pid, code) = waitpid(parent_tid, child_pid as i32, 0).unwrap();
        assert_eq!(reaped_pid, child_pid);
        assert_eq!(code, 5);
        assert!(!parent.lock().children.contains(&child_pid));
        assert!(table::lookup_process(child_pid).is_none());
    }

    #[test]
    fn waitpid_rejects_an_unrelated_pid() {
        let parent = table::create_process("lc-p4", blank_mm(), None);
        let parent_tid = table::create_kernel_thread(parent, 1, noop_entry).lock().tid;
        assert_eq!(waitpid(parent_tid, 999_999, 0), Err(Errno::Srch));
    }
}
