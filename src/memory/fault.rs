//! Page-fault handling (§4.B's "Page-fault interaction"): the seam where
//! a hardware trap (int 14, out of scope per §1) hands off to the VMA
//! manager. A fault inside a known VMA lazily backs the faulting page
//! with a fresh physical frame; a fault outside every VMA is fatal.
//!
//! `original_source`'s `thread_page_fault` is declared `extern` in
//! `proc/task.c` but its body lives outside the retrieved sources, so
//! this module is grounded directly in SPEC_FULL.md §4.B's text and the
//! VMA primitives it names (`find_vma`, the same `page_in` closure shape
//! `vma::do_mmap`/`do_brk` already use for lazy frame allocation).

use crate::memory::address::VirtAddr;
use crate::memory::vma::find_vma;
use crate::memory::{physical, virtual_mem};
use crate::signal::SIGSEGV;
use crate::task::table;

/// Handle a page fault at `addr` on behalf of the process owning `tid`.
/// Returns `true` if the fault was resolved by mapping in a fresh frame
/// (the faulting instruction should be retried), `false` if the address
/// lies outside every VMA and `SIGSEGV` was posted to the thread instead
/// (delivered at the next return-from-trap, per §4.F).
pub fn handle_page_fault(tid: u32, addr: u32) -> bool {
    let Some(thread_arc) = table::lookup_thread(tid) else { return false };
    let process_arc = thread_arc.lock().process.clone();
    let mut process = process_arc.lock();

    let page = crate::config::page_align_down(addr);
    let Some(vma) = find_vma(&process.mm, addr) else {
        drop(process);
        let _ = crate::signal::delivery::do_kill(tid, process_arc.lock().pid as i32, SIGSEGV);
        return false;
    };
    if virtual_mem::is_page_mapped(process.mm.pd, VirtAddr::new(page)) {
        // Already mapped: this fault is a protection violation (e.g. a
        // write to a read-only page), not an absent-page fault. This
        // crate doesn't implement COW or RO-data faulting (§1's
        // Non-goals exclude demand-paged swap, and no VMA in this
        // design is ever read-only-with-a-writable-alias), so treat it
        // the same as an out-of-VMA access: fatal.
        drop(process);
        let pid = process_arc.lock().pid;
        let _ = crate::signal::delivery::do_kill(tid, pid as i32, SIGSEGV);
        return false;
    }

    let pd = process.mm.pd;
    let Some(frame) = physical::alloc_frame() else {
        drop(process);
        let pid = process_arc.lock().pid;
        let _ = crate::signal::delivery::do_kill(tid, pid as i32, SIGSEGV);
        return false;
    };
    let flags = virtual_mem::PTE_PRESENT
        | virtual_mem::PTE_USER
        | if vma.flags.contains(crate::memory::vma::VmaFlags::WRITE) {
            virtual_mem::PTE_WRITABLE
        } else {
            0
        };
    virtual_mem::map_page(pd, VirtAddr::new(page), frame, flags);
    true
}
