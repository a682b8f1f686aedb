//! 32-bit, non-PAE, two-level page-table binding.
//!
//! Grounded on the `PhysAddr`/`VirtAddr` split in `memory/address.rs` and
//! the `map_page`/`unmap_page`/`read_pte`/`is_page_mapped` call surface the
//! teacher's `sys_mmap`/`sys_munmap`/`sys_sbrk` handlers use
//! (`syscall/handlers/process.rs`). Page-directory and page-table frames
//! are assumed identity-mapped in kernel space below the kernel/user split
//! (`config::USER_ADDR_MAX`) — a simplification the out-of-scope boot layer
//! is responsible for setting up, and one common to small teaching kernels
//! at this scale (including `original_source`'s `mos`). Copy-on-write is
//! explicitly not implemented (see SPEC_FULL.md §4.B): `clone_user_page_directory`
//! performs a full copy.

use crate::config::PAGE_SIZE;
use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::physical;

pub const PTE_PRESENT: u32 = 1 << 0;
pub const PTE_WRITABLE: u32 = 1 << 1;
pub const PTE_USER: u32 = 1 << 2;

const ENTRIES_PER_TABLE: usize = 1024;

#[inline]
fn phys_as_table(addr: PhysAddr) -> *mut u32 {
    addr.as_u32() as *mut u32
}

/// The physical address of the kernel's own page directory, set once by
/// [`init`]. All process page directories share the same kernel-half
/// entries (mappings above `USER_ADDR_MAX`) so a syscall entered from any
/// process can still see kernel code/data after a `cr3` switch.
static mut KERNEL_PD: u32 = 0;

/// Record the physical address of the already-built kernel page directory
/// (built by the out-of-scope boot layer). Must be called before any
/// other function in this module.
pub fn init(kernel_pd: PhysAddr) {
    unsafe {
        KERNEL_PD = kernel_pd.as_u32();
    }
}

pub fn kernel_cr3() -> u32 {
    unsafe { KERNEL_PD }
}

fn pd_index(v: VirtAddr) -> usize {
    v.page_directory_index()
}

fn pt_index(v: VirtAddr) -> usize {
    v.page_table_index()
}

/// Allocate a fresh page directory whose upper (kernel) half is copied
/// from the kernel page directory and whose lower (user) half is empty.
pub fn create_user_page_directory() -> Option<PhysAddr> {
    let pd_frame = physical::alloc_frame()?;
    let pd = phys_as_table(pd_frame);
    let kernel_pd = phys_as_table(PhysAddr::new(kernel_cr3()));
    unsafe {
        for i in 0..ENTRIES_PER_TABLE {
            let v = VirtAddr::new((i as u32) << 22);
            *pd.add(i) = if v.as_u32() >= crate::config::USER_ADDR_MAX {
                *kernel_pd.add(i)
            } else {
                0
            };
        }
    }
    Some(pd_frame)
}

/// Map a single 4 KiB page into `pd`, allocating a page table if the
/// covering page-directory entry is not yet present.
pub fn map_page(pd: PhysAddr, vaddr: VirtAddr, paddr: PhysAddr, flags: u32) -> bool {
    let pd_ptr = phys_as_table(pd);
    let pdi = pd_index(vaddr);
    unsafe {
        let pde = *pd_ptr.add(pdi);
        let pt_phys = if pde & PTE_PRESENT != 0 {
            pde & !(PAGE_SIZE - 1)
        } else {
            let Some(new_pt) = physical::alloc_frame() else {
                return false;
            };
            let pt_ptr = phys_as_table(new_pt);
            for i in 0..ENTRIES_PER_TABLE {
                *pt_ptr.add(i) = 0;
            }
            *pd_ptr.add(pdi) = new_pt.as_u32() | PTE_PRESENT | PTE_WRITABLE | PTE_USER;
            new_pt.as_u32()
        };
        let pt_ptr = phys_as_table(PhysAddr::new(pt_phys));
        let pti = pt_index(vaddr);
        *pt_ptr.add(pti) = paddr.frame_align_down().as_u32() | (flags & !(PAGE_SIZE - 1)) | PTE_PRESENT;
    }
    crate::arch::hal::flush_tlb(vaddr.as_u32());
    true
}

/// Read the raw page-table entry for `vaddr`, or 0 if its page-directory
/// entry isn't present (never mapped at that 4 MiB granularity).
pub fn read_pte(pd: PhysAddr, vaddr: VirtAddr) -> u32 {
    let pd_ptr = phys_as_table(pd);
    let pdi = pd_index(vaddr);
    unsafe {
        let pde = *pd_ptr.add(pdi);
        if pde & PTE_PRESENT == 0 {
            return 0;
        }
        let pt_ptr = phys_as_table(PhysAddr::new(pde & !(PAGE_SIZE - 1)));
        *pt_ptr.add(pt_index(vaddr))
    }
}

pub fn is_page_mapped(pd: PhysAddr, vaddr: VirtAddr) -> bool {
    read_pte(pd, vaddr) & PTE_PRESENT != 0
}

/// Clear the page-table entry for `vaddr`. Does not free the frame it
/// pointed at — callers free the physical frame themselves once they know
/// no one else holds a reference to it.
pub fn unmap_page(pd: PhysAddr, vaddr: VirtAddr) {
    let pd_ptr = phys_as_table(pd);
    let pdi = pd_index(vaddr);
    unsafe {
        let pde = *pd_ptr.add(pdi);
        if pde & PTE_PRESENT == 0 {
            return;
        }
        let pt_ptr = phys_as_table(PhysAddr::new(pde & !(PAGE_SIZE - 1)));
        *pt_ptr.add(pt_index(vaddr)) = 0;
    }
    crate::arch::hal::flush_tlb(vaddr.as_u32());
}

/// Full (non-copy-on-write) copy of `src`'s user half into a freshly
/// allocated page directory: every present user page gets its own frame
/// with the parent's contents copied in. See the module doc comment for
/// why this is not copy-on-write.
pub fn clone_user_page_directory(src: PhysAddr) -> Option<PhysAddr> {
    let dst = create_user_page_directory()?;
    let src_pd = phys_as_table(src);
    for pdi in 0..pd_index(VirtAddr::new(crate::config::USER_ADDR_MAX)) {
        let pde = unsafe { *src_pd.add(pdi) };
        if pde & PTE_PRESENT == 0 {
            continue;
        }
        let src_pt = phys_as_table(PhysAddr::new(pde & !(PAGE_SIZE - 1)));
        for pti in 0..ENTRIES_PER_TABLE {
            let pte = unsafe { *src_pt.add(pti) };
            if pte & PTE_PRESENT == 0 {
                continue;
            }
            let vaddr = VirtAddr::new(((pdi as u32) << 22) | ((pti as u32) << 12));
            let src_frame = PhysAddr::new(pte & !(PAGE_SIZE - 1));
            let Some(new_frame) = physical::alloc_frame() else {
                destroy_user_page_directory(dst);
                return None;
            };
            unsafe {
                core::ptr::copy_nonoverlapping(
                    src_frame.as_u32() as *const u8,
                    new_frame.as_u32() as *mut u8,
                    PAGE_SIZE as usize,
                );
            }
            let flags = pte & (PAGE_SIZE - 1);
            map_page(dst, vaddr, new_frame, flags);
        }
    }
    Some(dst)
}

/// Free every user-space frame and page table mapped in `pd`, plus `pd`
/// itself. Kernel-half entries (shared with every process) are left
/// alone.
pub fn destroy_user_page_directory(pd: PhysAddr) {
    let pd_ptr = phys_as_table(pd);
    for pdi in 0..pd_index(VirtAddr::new(crate::config::USER_ADDR_MAX)) {
        let pde = unsafe { *pd_ptr.add(pdi) };
        if pde & PTE_PRESENT == 0 {
            continue;
        }
        let pt_phys = PhysAddr::new(pde & !(PAGE_SIZE - 1));
        let pt_ptr = phys_as_table(pt_phys);
        for pti in 0..ENTRIES_PER_TABLE {
            let pte = unsafe { *pt_ptr.add(pti) };
            if pte & PTE_PRESENT != 0 {
                physical::free_frame(PhysAddr::new(pte & !(PAGE_SIZE - 1)));
            }
        }
        physical::free_frame(pt_phys);
    }
    physical::free_frame(pd);
}
