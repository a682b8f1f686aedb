//! Kernel heap: a first-fit, address-sorted free-list allocator backing
//! `extern crate alloc`'s `Vec`/`BTreeMap`/`Arc` used throughout `task`,
//! `memory::vma` and `signal`.
//!
//! Ported from `kernel/src/memory/heap.rs`'s free-list shape (in-place
//! `FreeBlock { size, next }` headers, address-sorted insertion with
//! neighbor coalescing on free). Demand-paged growth is dropped: this
//! crate eagerly maps every frame a growth step commits, since the page
//! fault handler's job here is user-space lazy allocation (§4.B), not
//! heap bookkeeping, and the scale of a teaching kernel's heap does not
//! need to defer frame allocation the way the teacher's 512 MiB desktop
//! heap does.

use crate::config::PAGE_SIZE;
use crate::memory::address::VirtAddr;
use crate::memory::virtual_mem::{self, PTE_PRESENT, PTE_WRITABLE};
use crate::memory::{physical, PhysAddr};
use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Virtual base of the kernel heap, above the kernel/user split.
const HEAP_START: u32 = 0xD000_0000;
const HEAP_INITIAL_SIZE: usize = 1024 * 1024;
const HEAP_MAX_SIZE: usize = 16 * 1024 * 1024;
const GROW_CHUNK: usize = 1024 * 1024;

static HEAP_COMMITTED: AtomicUsize = AtomicUsize::new(0);

#[cfg_attr(not(test), global_allocator)]
static HEAP_ALLOCATOR: LockedHeap = LockedHeap::new();

struct LockedHeap {
    lock: AtomicBool,
}

#[repr(C)]
struct FreeBlock {
    size: usize,
    next: *mut FreeBlock,
}

static mut HEAP_FREE_LIST: *mut FreeBlock = core::ptr::null_mut();
static mut HEAP_INITIALIZED: bool = false;
/// Page directory new allocations are mapped into. Kernel-half mappings
/// are shared across every process page directory (see `virtual_mem`),
/// so any process's `pd` would do; the kernel's own is used directly.
static mut HEAP_PD: u32 = 0;

impl LockedHeap {
    const fn new() -> Self {
        LockedHeap { lock: AtomicBool::new(false) }
    }

    fn acquire(&self) -> bool {
        let was_enabled = crate::arch::hal::save_and_disable_interrupts();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        was_enabled
    }

    fn release(&self, was_enabled: bool) {
        self.lock.store(false, Ordering::Release);
        crate::arch::hal::restore_interrupt_state(was_enabled);
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !HEAP_INITIALIZED {
            return core::ptr::null_mut();
        }
        let saved = self.acquire();
        let mut result = alloc_inner(layout);
        if result.is_null() {
            let needed = align_up(
                layout.size().max(core::mem::size_of::<FreeBlock>()),
                layout.align().max(16),
            );
            if grow_heap(needed) {
                result = alloc_inner(layout);
            }
        }
        self.release(saved);
        result
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let saved = self.acquire();
        dealloc_inner(ptr, layout);
        self.release(saved);
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn is_in_heap(addr: usize) -> bool {
    let start = HEAP_START as usize;
    addr >= start && addr < start + HEAP_COMMITTED.load(Ordering::Relaxed)
}

unsafe fn alloc_inner(layout: Layout) -> *mut u8 {
    let size = align_up(
        layout.size().max(core::mem::size_of::<FreeBlock>()),
        layout.align().max(16),
    );
    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = HEAP_FREE_LIST;
    while !current.is_null() {
        let block_size = (*current).size;
        if block_size >= size {
            if block_size >= size + core::mem::size_of::<FreeBlock>() + 8 {
                let new_block = (current as *mut u8).add(size) as *mut FreeBlock;
                (*new_block).size = block_size - size;
                (*new_block).next = (*current).next;
                if prev.is_null() {
                    HEAP_FREE_LIST = new_block;
                } else {
                    (*prev).next = new_block;
                }
            } else if prev.is_null() {
                HEAP_FREE_LIST = (*current).next;
            } else {
                (*prev).next = (*current).next;
            }
            return current as *mut u8;
        }
        prev = current;
        current = (*current).next;
    }
    core::ptr::null_mut()
}

/// Grow the committed heap by at least `min_bytes`, eagerly mapping every
/// frame the growth spans.
unsafe fn grow_heap(min_bytes: usize) -> bool {
    let growth = align_up(min_bytes.max(GROW_CHUNK), PAGE_SIZE as usize);
    let old_committed = HEAP_COMMITTED.load(Ordering::Acquire);
    let growth = growth.min(HEAP_MAX_SIZE.saturating_sub(old_committed));
    if growth == 0 {
        return false;
    }

    let base = HEAP_START as usize + old_committed;
    let mut mapped = 0usize;
    while mapped < growth {
        let Some(frame) = physical::alloc_frame() else {
            break;
        };
        let vaddr = VirtAddr::new((base + mapped) as u32);
        virtual_mem::map_page(PhysAddr::new(HEAP_PD), vaddr, frame, PTE_PRESENT | PTE_WRITABLE);
        mapped += PAGE_SIZE as usize;
    }
    if mapped == 0 {
        return false;
    }

    HEAP_COMMITTED.store(old_committed + mapped, Ordering::Release);
    insert_free_block(base as *mut FreeBlock, mapped);
    true
}

unsafe fn insert_free_block(block: *mut FreeBlock, size: usize) {
    (*block).size = size;
    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = HEAP_FREE_LIST;
    while !current.is_null() && (current as usize) < (block as usize) {
        prev = current;
        current = (*current).next;
    }
    (*block).next = current;
    if prev.is_null() {
        HEAP_FREE_LIST = block;
    } else {
        (*prev).next = block;
    }
    coalesce_with_neighbors(prev, block);
}

unsafe fn coalesce_with_neighbors(prev: *mut FreeBlock, block: *mut FreeBlock) {
    if !(*block).next.is_null() {
        let next = (*block).next;
        if (block as *mut u8).add((*block).size) == next as *mut u8 {
            (*block).size += (*next).size;
            (*block).next = (*next).next;
        }
    }
    if !prev.is_null() && (prev as *mut u8).add((*prev).size) == block as *mut u8 {
        (*prev).size += (*block).size;
        (*prev).next = (*block).next;
    }
}

unsafe fn dealloc_inner(ptr: *mut u8, layout: Layout) {
    let size = align_up(
        layout.size().max(core::mem::size_of::<FreeBlock>()),
        layout.align().max(16),
    );
    if !is_in_heap(ptr as usize) {
        return;
    }
    let block = ptr as *mut FreeBlock;
    insert_free_block(block, size);
}

/// Initialize the kernel heap. Must run after `physical::init` and
/// `virtual_mem::init`.
pub fn init(kernel_pd: PhysAddr) {
    unsafe {
        HEAP_PD = kernel_pd.as_u32();
        let mapped_pages = HEAP_INITIAL_SIZE / PAGE_SIZE as usize;
        for i in 0..mapped_pages {
            let Some(frame) = physical::alloc_frame() else {
                break;
            };
            let vaddr = VirtAddr::new(HEAP_START + (i as u32) * PAGE_SIZE);
            virtual_mem::map_page(kernel_pd, vaddr, frame, PTE_PRESENT | PTE_WRITABLE);
        }
        let block = HEAP_START as *mut FreeBlock;
        (*block).size = HEAP_INITIAL_SIZE;
        (*block).next = core::ptr::null_mut();
        HEAP_FREE_LIST = block;
        HEAP_COMMITTED.store(HEAP_INITIAL_SIZE, Ordering::Release);
        HEAP_INITIALIZED = true;
    }
}
