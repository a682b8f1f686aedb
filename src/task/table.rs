//! Global process/thread table (§3, §4.A).
//!
//! Grounded in the teacher's `Scheduler { threads: Vec<Box<Thread>> }`
//! ownership idiom — one authoritative collection threads and processes
//! live in, looked up by id rather than passed around by raw pointer —
//! generalized to two maps (pid → `Process`, tid → `Thread`) since this
//! crate splits those concerns (see [`crate::task::process`],
//! [`crate::task::thread`]). `BTreeMap` takes the place of the teacher's
//! `Vec` + linear `find_idx` scan: lookups are by id only here (no
//! per-CPU run-queue scan needed), so the ordered map's O(log n) lookup
//! is the simpler idiom.

use crate::config::INIT_PID;
use crate::error::{Errno, KResult};
use crate::memory::vma::Mm;
use crate::sync::spinlock::Spinlock;
use crate::task::process::Process;
use crate::task::thread::Thread;
use crate::task::trapframe::{self, KernelEntry, UserSetupHook};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

struct Table {
    processes: BTreeMap<u32, Arc<Spinlock<Process>>>,
    threads: BTreeMap<u32, Arc<Spinlock<Thread>>>,
}

impl Table {
    const fn new() -> Self {
        Table { processes: BTreeMap::new(), threads: BTreeMap::new() }
    }
}

static TABLE: Spinlock<Table> = Spinlock::new(Table::new());
static NEXT_PID: AtomicU32 = AtomicU32::new(INIT_PID);

pub fn lookup_process(pid: u32) -> Option<Arc<Spinlock<Process>>> {
    TABLE.lock().processes.get(&pid).cloned()
}

pub fn lookup_thread(tid: u32) -> Option<Arc<Spinlock<Thread>>> {
    TABLE.lock().threads.get(&tid).cloned()
}

/// Snapshot of every live pid, for `do_kill`'s broadcast forms and
/// `waitpid`'s reaping sweep. A snapshot rather than a live iterator since
/// both callers take per-process locks while walking it, which would
/// deadlock against a held `TABLE` lock.
pub fn all_pids() -> Vec<u32> {
    TABLE.lock().processes.keys().copied().collect()
}

pub fn all_tids() -> Vec<u32> {
    TABLE.lock().threads.keys().copied().collect()
}

/// Remove a process from the table once it has been fully reaped (§4.E's
/// ownership-release order: mm → fs → files → sighand → thread).
pub fn remove_process(pid: u32) -> Option<Arc<Spinlock<Process>>> {
    TABLE.lock().processes.remove(&pid)
}

pub fn remove_thread(tid: u32) -> Option<Arc<Spinlock<Thread>>> {
    TABLE.lock().threads.remove(&tid)
}

/// Find the thread belonging to `pid` (§3's single-threaded process model:
/// every live process owns exactly one thread, so this lookup is total over
/// live processes). Used by signal delivery and `waitpid`, both of which
/// need to reach a process's thread without a process storing its own tid
/// back-reference.
pub fn find_thread_of_process(pid: u32) -> Option<Arc<Spinlock<Thread>>> {
    TABLE
        .lock()
        .threads
        .values()
        .find(|t| t.lock().process.lock().pid == pid)
        .cloned()
}

/// Register an already-built thread (kernel stack seeded, trap frame
/// written) and queue it ready to run. The one piece of [`create_kernel_thread`]/
/// [`create_user_thread`]'s second half that `fork` also needs, since fork
/// builds its child's trap frame with [`trapframe::build_fork_resume_frame`]
/// rather than one of the two entry trampolines those functions use.
pub fn register_thread(thread: Thread) -> Arc<Spinlock<Thread>> {
    crate::task::scheduler::lock_scheduler();
    let tid = thread.tid;
    let priority = thread.priority;
    let arc = Arc::new(Spinlock::new(thread));
    TABLE.lock().threads.insert(tid, arc.clone());
    crate::task::scheduler::queue(tid, priority);
    crate::task::scheduler::unlock_scheduler();
    arc
}

/// Create a new process with a fresh pid, optionally attaching it as a
/// child of `parent`. Does not create any thread — callers follow up
/// with [`create_kernel_thread`] or [`create_user_thread`].
pub fn create_process(name: &str, mm: Mm, parent: Option<u32>) -> Arc<Spinlock<Process>> {
    crate::task::scheduler::lock_scheduler();
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let mut process = Process::new(pid, name, mm);
    process.parent = parent;
    if let Some(parent_pid) = parent {
        if let Some(parent_arc) = lookup_process(parent_pid) {
            let mut parent = parent_arc.lock();
            process.pgid = parent.pgid;
            process.sid = parent.sid;
            parent.children.push(pid);
        }
    }
    let arc = Arc::new(Spinlock::new(process));
    TABLE.lock().processes.insert(pid, arc.clone());
    crate::task::scheduler::unlock_scheduler();
    arc
}

/// Create a kernel thread inside `process`, seeded to start at `entry`
/// (§4.D's kernel-thread trampoline). The new thread is enqueued ready to
/// run.
pub fn create_kernel_thread(
    process: Arc<Spinlock<Process>>,
    priority: u8,
    entry: KernelEntry,
) -> Arc<Spinlock<Thread>> {
    crate::task::scheduler::lock_scheduler();
    let mut thread = Thread::new(process, priority);
    let tid = thread.tid;
    let stack_top = thread.kernel_stack_top();
    thread.kernel_esp = unsafe {
        trapframe::build_kernel_thread_frame(stack_top, &mut thread as *mut Thread as u32, entry)
    };
    let arc = Arc::new(Spinlock::new(thread));
    TABLE.lock().threads.insert(tid, arc.clone());
    crate::task::scheduler::queue(tid, priority);
    crate::task::scheduler::unlock_scheduler();
    arc
}

/// Leak an owned, NUL-terminated copy of `path` onto the kernel heap —
/// the trampoline needs a pointer that outlives the creating call, the
/// same way `original_source`'s `create_user_thread` keeps a `strdup`ed
/// path alive for its trampoline.
fn leak_cstr(path: &str) -> *const u8 {
    let mut bytes = Vec::with_capacity(path.len() + 1);
    bytes.extend_from_slice(path.as_bytes());
    bytes.push(0);
    Box::leak(bytes.into_boxed_slice()).as_ptr()
}

/// Create a user thread inside `process` that will load and jump into the
/// ELF image at `path` on first dispatch (§4.D, §4.E).
///
/// Leaves the scheduler lock held on return — one extra recursion level
/// that [`trapframe::user_thread_elf_entry`] releases itself the first
/// time this thread actually runs, so nothing can observe the new thread
/// half-built or start running ahead of it before its image is loaded.
/// Callers must treat this as the last scheduler-sensitive action of
/// their own critical section: the next matching `unlock_scheduler()`
/// belongs to the trampoline, not to them.
pub fn create_user_thread(
    process: Arc<Spinlock<Process>>,
    priority: u8,
    path: &str,
    setup: Option<UserSetupHook>,
) -> KResult<Arc<Spinlock<Thread>>> {
    if path.is_empty() {
        return Err(Errno::Inval);
    }
    crate::task::scheduler::lock_scheduler();
    let mut thread = Thread::new(process, priority);
    let tid = thread.tid;
    let stack_top = thread.kernel_stack_top();
    let path_ptr = leak_cstr(path) as u32;
    thread.kernel_esp = unsafe {
        trapframe::build_user_thread_frame(
            stack_top,
            &mut thread as *mut Thread as u32,
            path_ptr,
            setup,
        )
    };
    let arc = Arc::new(Spinlock::new(thread));
    TABLE.lock().threads.insert(tid, arc.clone());
    crate::task::scheduler::queue(tid, priority);
    // No unlock_scheduler() here: see doc comment above.
    Ok(arc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;

    fn blank_mm() -> Mm {
        Mm::new(PhysAddr::new(0x1000), 0x0804_8000)
    }

    #[test]
    fn create_process_without_parent_has_no_children_link() {
        let p = create_process("orphan-test", blank_mm(), None);
        assert!(p.lock().parent.is_none());
    }

    #[test]
    fn create_process_with_parent_links_child() {
        let parent = create_process("parent-test", blank_mm(), None);
        let parent_pid = parent.lock().pid;
        let child = create_process("child-test", blank_mm(), Some(parent_pid));
        let child_pid = child.lock().pid;
        assert!(parent.lock().children.contains(&child_pid));
        assert_eq!(child.lock().pgid, parent.lock().pgid);
    }

    #[test]
    fn lookup_process_finds_inserted_entry() {
        let p = create_process("lookup-test", blank_mm(), None);
        let pid = p.lock().pid;
        assert!(lookup_process(pid).is_some());
        assert!(lookup_process(pid + 1_000_000).is_none());
    }
}
