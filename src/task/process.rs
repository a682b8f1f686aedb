//! Process identity, address space ownership, and group/session state
//! (§3, §4.A).
//!
//! The teacher's own `task/process.rs` pairs a process 1:1 with a single
//! address space and thread list, which is the right shape here too, but
//! it carries no VMA manager, no signal-handler table, and no POSIX
//! group/session fields — this module keeps the teacher's "process owns
//! the address space" idiom (`page_directory`, fixed-size `name` buffer,
//! `name_str()`) and builds the rest from `original_source`'s
//! `struct task_struct` (`pid`, `gid`/`pgid`, `sid`, `parent`, `children`,
//! `mm`, `files`, `sighand`).

use crate::memory::vma::Mm;
use crate::signal::{default_sighand, SigHand};
use crate::task::fdtable::FdTable;
use crate::task::scheduler::wait::WaitQueue;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// Process lifecycle flags (§3). Distinct from [`crate::task::thread::ThreadState`]:
    /// a stopped process still has threads occupying table slots, just not
    /// runnable, whereas `TERMINATED` here mirrors a zombie awaiting `waitpid`.
    #[derive(Default)]
    pub struct ProcessFlags: u32 {
        const STOPPED    = 1 << 0;
        const CONTINUED  = 1 << 1;
        const TERMINATED = 1 << 2;
    }
}

/// Minimal filesystem-context record (§3's "fs-context record"): the
/// filesystem itself is an out-of-scope external collaborator (§1), so
/// this is only the handful of fields a process keeps locally rather than
/// asking the VFS for on every lookup.
#[derive(Debug, Clone)]
pub struct FsContext {
    pub cwd: String,
    pub umask: u16,
}

impl Default for FsContext {
    fn default() -> Self {
        FsContext { cwd: String::from("/"), umask: 0o022 }
    }
}

/// A process: the unit that owns an address space, a file descriptor
/// table, and a signal-handler table. Threads (§3, `task::thread::Thread`)
/// reference their owning process rather than duplicating this state.
pub struct Process {
    pub pid: u32,
    pub pgid: u32,
    pub sid: u32,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub name: [u8; 64],
    pub mm: Mm,
    pub files: FdTable,
    pub fs: FsContext,
    pub sighand: SigHand,
    pub flags: ProcessFlags,
    /// The signal number that stopped or killed this process (§4.F's
    /// `caused_signal`), 0 if the process is neither stopped nor a zombie
    /// for signal-related reasons.
    pub caused_signal: u32,
    pub exit_code: i32,
    /// Where a parent blocks in `waitpid` until one of its children exits
    /// or stops/continues (§4.E, §4.F). Lives on the child's own `Process`
    /// record's *parent*, not the child — `do_exit`/`do_kill`'s STOP/CONT
    /// paths reach it via `table::lookup_process(parent_pid)`.
    pub child_wait: WaitQueue,
}

impl Process {
    pub fn new(pid: u32, name: &str, mm: Mm) -> Self {
        let mut name_buf = [0u8; 64];
        let bytes = name.as_bytes();
        let len = bytes.len().min(63);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        Process {
            pid,
            pgid: pid,
            sid: pid,
            parent: None,
            children: Vec::new(),
            name: name_buf,
            mm,
            files: FdTable::new(),
            fs: FsContext::default(),
            sighand: default_sighand(),
            flags: ProcessFlags::empty(),
            caused_signal: 0,
            exit_code: 0,
            child_wait: WaitQueue::new(),
        }
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(64);
        core::str::from_utf8(&self.name[..len]).unwrap_or("???")
    }

    pub fn is_session_leader(&self) -> bool {
        self.sid == self.pid
    }

    pub fn is_group_leader(&self) -> bool {
        self.pgid == self.pid
    }

    /// `setsid` (§4.A supplement): a process that is already a group
    /// leader cannot start a new session (POSIX). On success the process
    /// becomes both session leader and group leader of a brand new group,
    /// with no controlling terminal — out of scope here, so only the
    /// id bookkeeping happens.
    pub fn setsid(&mut self) -> crate::error::KResult<u32> {
        if self.is_group_leader() {
            return Err(crate::error::Errno::Perm);
        }
        self.sid = self.pid;
        self.pgid = self.pid;
        Ok(self.sid)
    }

    /// `setpgid` (§4.A supplement): move this process into group `pgid`
    /// (or make it its own group leader if `pgid == 0`). Restricted to the
    /// same session, matching POSIX's cross-session prohibition.
    pub fn setpgid(&mut self, pgid: u32, group_exists_in_session: bool) -> crate::error::KResult<()> {
        let target = if pgid == 0 { self.pid } else { pgid };
        if target != self.pid && !group_exists_in_session {
            return Err(crate::error::Errno::Perm);
        }
        self.pgid = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;

    fn blank_mm() -> Mm {
        Mm::new(PhysAddr::new(0x1000), 0x0804_8000)
    }

    #[test]
    fn new_process_is_its_own_group_and_session_leader() {
        let p = Process::new(7, "init", blank_mm());
        assert!(p.is_group_leader());
        assert!(p.is_session_leader());
        assert_eq!(p.name_str(), "init");
    }

    #[test]
    fn setsid_rejects_existing_group_leader() {
        let mut p = Process::new(7, "init", blank_mm());
        assert_eq!(p.setsid(), Err(crate::error::Errno::Perm));
    }

    #[test]
    fn setsid_succeeds_once_group_leadership_is_lost() {
        let mut p = Process::new(7, "init", blank_mm());
        p.pgid = 1; // simulate having joined another process's group
        assert_eq!(p.setsid(), Ok(7));
        assert!(p.is_group_leader());
        assert!(p.is_session_leader());
    }

    #[test]
    fn setpgid_zero_makes_self_group_leader() {
        let mut p = Process::new(7, "child", blank_mm());
        p.pgid = 3;
        p.setpgid(0, true).unwrap();
        assert_eq!(p.pgid, 7);
    }

    #[test]
    fn setpgid_rejects_unknown_group_outside_session() {
        let mut p = Process::new(7, "child", blank_mm());
        assert_eq!(p.setpgid(99, false), Err(crate::error::Errno::Perm));
    }
}
