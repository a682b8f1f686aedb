//! `fork()` (§4.E, §8's named test location). Duplicates the calling
//! thread's process: new pid, copied address space, shared files, cloned
//! signal-handler table, single new thread resuming with a zeroed return
//! value.
//!
//! Grounded in `original_source`'s `process_fork` (`struct task_struct`
//! duplicate-then-patch shape) combined with the teacher's
//! `task/scheduler/fork.rs` trampoline-seeding idiom: the child's kernel
//! stack is seeded directly with a resume frame
//! ([`crate::task::trapframe::build_fork_resume_frame`]) rather than routed
//! through either of the two normal entry trampolines, since a forked
//! thread has no `entry` function and no ELF image to load — it simply
//! continues where the parent was interrupted.

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{Errno, KResult};
use crate::memory::vma::Mm;
use crate::memory::virtual_mem;
use crate::sync::spinlock::Spinlock;
use crate::task::process::Process;
use crate::task::table;
use crate::task::thread::Thread;
use crate::task::trapframe;

use super::{lock_scheduler, unlock_scheduler};

/// Duplicate the process owning `parent_tid`, returning the new pid to the
/// caller (the child itself never observes this return value — its first
/// instruction after resuming is whatever came after the syscall that
/// invoked `fork`, with `eax` forced to 0).
pub fn fork(parent_tid: u32) -> KResult<u32> {
    lock_scheduler();
    let result = fork_inner(parent_tid);
    unlock_scheduler();
    result
}

fn fork_inner(parent_tid: u32) -> KResult<u32> {
    let parent_thread = table::lookup_thread(parent_tid).ok_or(Errno::Srch)?;
    let parent_process = parent_thread.lock().process.clone();

    let (name, files, fs, sighand, pgid, sid, parent_pid, priority, mut regs, src_pd, brk, end_brk, free_area_cache, vmas) = {
        let p = parent_process.lock();
        let t = parent_thread.lock();
        (
            String::from(p.name_str()),
            p.files.clone_for_fork(),
            p.fs.clone(),
            p.sighand,
            p.pgid,
            p.sid,
            p.pid,
            t.priority,
            t.user_regs,
            p.mm.pd,
            p.mm.brk,
            p.mm.end_brk,
            p.mm.free_area_cache,
            p.mm.vmas.clone(),
        )
    };

    let child_pd = virtual_mem::clone_user_page_directory(src_pd).ok_or(Errno::NoMem)?;
    let child_mm = Mm {
        brk,
        end_brk,
        free_area_cache,
        vmas,
        pd: child_pd,
    };

    let child_process = table::create_process(&name, child_mm, Some(parent_pid));
    {
        let mut cp = child_process.lock();
        cp.pgid = pgid;
        cp.sid = sid;
        cp.files = files;
        cp.fs = fs;
        cp.sighand = sighand;
    }
    let child_pid = child_process.lock().pid;

    regs.eax = 0;
    let mut child_thread = Thread::new(child_process, priority);
    child_thread.user_regs = regs;
    let stack_top = child_thread.kernel_stack_top();
    child_thread.kernel_esp = unsafe {
        trapframe::build_fork_resume_frame(stack_top, &mut child_thread as *mut Thread as u32)
    };
    table::register_thread(child_thread);

    Ok(child_pid)
}
