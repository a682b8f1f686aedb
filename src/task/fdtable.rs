//! Per-process file descriptor table.
//!
//! The VFS owns the actual open-file objects (§1: filesystem is an
//! out-of-scope external collaborator); this table only tracks, per fd
//! slot, the opaque `u32` handle the VFS handed back from `open`, mirroring
//! the `FileBacking.handle` convention already used by
//! [`crate::memory::vma`]. Refcounting the underlying object on `dup`/
//! `fork` is the VFS's job too, so this table calls out through a
//! registered hook rather than tracking refcounts itself.

use crate::error::{Errno, KResult};
use alloc::vec::Vec;

/// Largest fd a process may hold open. Fixed-size table, no dynamic
/// resizing — matches the kernel's other fixed-capacity tables
/// (`SigHand`, priority levels) rather than reaching for an unbounded
/// `Vec` where the original C uses a fixed array.
pub const NUM_FDS: usize = 64;

/// Hook the VFS registers so `dup`/`fork` can bump the open-file refcount
/// it owns. `None` means "not wired up yet" (unit tests exercise the
/// table without a live VFS).
pub type FileRefHook = fn(handle: u32);

static mut ON_REF: Option<FileRefHook> = None;
static mut ON_UNREF: Option<FileRefHook> = None;

/// Register the VFS's refcount hooks. Called once by the out-of-scope
/// filesystem bring-up.
pub fn set_ref_hooks(on_ref: FileRefHook, on_unref: FileRefHook) {
    unsafe {
        ON_REF = Some(on_ref);
        ON_UNREF = Some(on_unref);
    }
}

/// A process's open file descriptors.
#[derive(Debug, Clone)]
pub struct FdTable {
    slots: Vec<Option<u32>>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { slots: alloc::vec![None; NUM_FDS] }
    }

    /// Install `handle` at the lowest free fd, POSIX-style.
    pub fn install(&mut self, handle: u32) -> KResult<usize> {
        let fd = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(Errno::Inval)?;
        self.slots[fd] = Some(handle);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> KResult<u32> {
        self.slots.get(fd).copied().flatten().ok_or(Errno::Inval)
    }

    /// Close `fd`, releasing the VFS's reference to the underlying handle.
    pub fn close(&mut self, fd: usize) -> KResult<()> {
        let slot = self.slots.get_mut(fd).ok_or(Errno::Inval)?;
        let handle = slot.take().ok_or(Errno::Inval)?;
        if let Some(hook) = unsafe { ON_UNREF } {
            hook(handle);
        }
        Ok(())
    }

    /// Clone the whole table for `fork` (§4.E): every open handle is
    /// shared with the child, so each survives with its VFS refcount
    /// bumped rather than being duplicated.
    pub fn clone_for_fork(&self) -> Self {
        for slot in self.slots.iter().flatten() {
            if let Some(hook) = unsafe { ON_REF } {
                hook(*slot);
            }
        }
        FdTable { slots: self.slots.clone() }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static REF_COUNT: AtomicU32 = AtomicU32::new(0);

    fn bump_ref(_h: u32) {
        REF_COUNT.fetch_add(1, Ordering::SeqCst);
    }
    fn drop_ref(_h: u32) {
        REF_COUNT.fetch_sub(1, Ordering::SeqCst);
    }

    #[test]
    fn install_picks_lowest_free_fd() {
        let mut table = FdTable::new();
        assert_eq!(table.install(100).unwrap(), 0);
        assert_eq!(table.install(200).unwrap(), 1);
        table.close(0).unwrap();
        assert_eq!(table.install(300).unwrap(), 0);
    }

    #[test]
    fn get_on_empty_slot_is_inval() {
        let table = FdTable::new();
        assert_eq!(table.get(3), Err(Errno::Inval));
    }

    #[test]
    fn close_on_empty_slot_is_inval() {
        let mut table = FdTable::new();
        assert_eq!(table.close(0), Err(Errno::Inval));
    }

    #[test]
    fn fork_clone_bumps_refcount_per_open_handle() {
        set_ref_hooks(bump_ref, drop_ref);
        let mut table = FdTable::new();
        table.install(42).unwrap();
        table.install(43).unwrap();
        let before = REF_COUNT.load(Ordering::SeqCst);
        let _child = table.clone_for_fork();
        assert_eq!(REF_COUNT.load(Ordering::SeqCst), before + 2);
    }
}
