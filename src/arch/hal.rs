//! Hardware Abstraction Layer: the seam between this crate's core and the
//! out-of-scope boot/GDT/IDT/PIC/PIT/TSS bring-up.
//!
//! Everything below this line is already wired up by the time
//! `kernel_main` runs (trap vectors installed, PIT ticking, TSS loaded);
//! this module only exposes the handful of primitives the core needs to
//! call into that layer: interrupt masking, halt, CR3 access, TLB
//! invalidation, and a millisecond tick counter. None of it programs a
//! controller — that bring-up is the external collaborator's job.

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(target_arch = "x86")]
use core::arch::asm;

/// Disable maskable interrupts.
#[inline]
pub fn disable_interrupts() {
    #[cfg(target_arch = "x86")]
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Enable maskable interrupts.
#[inline]
pub fn enable_interrupts() {
    #[cfg(target_arch = "x86")]
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Read the interrupt flag out of `eflags` without modifying it.
#[inline]
pub fn interrupts_enabled() -> bool {
    #[cfg(target_arch = "x86")]
    {
        let flags: u32;
        unsafe {
            asm!("pushfd; pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & (1 << 9) != 0
    }
    #[cfg(not(target_arch = "x86"))]
    {
        true
    }
}

/// Disable interrupts, returning the prior enabled/disabled state so it
/// can be handed to [`restore_interrupt_state`].
#[inline]
pub fn save_and_disable_interrupts() -> bool {
    let was_enabled = interrupts_enabled();
    disable_interrupts();
    was_enabled
}

/// Restore a saved interrupt-enable state from [`save_and_disable_interrupts`].
#[inline]
pub fn restore_interrupt_state(was_enabled: bool) {
    if was_enabled {
        enable_interrupts();
    }
}

/// Halt the CPU until the next interrupt.
#[inline]
pub fn halt() {
    #[cfg(target_arch = "x86")]
    unsafe {
        asm!("hlt", options(nomem, nostack));
    }
}

/// Read the current page-directory base (CR3).
#[inline]
pub fn current_page_table() -> u32 {
    #[cfg(target_arch = "x86")]
    {
        let cr3: u32;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        cr3
    }
    #[cfg(not(target_arch = "x86"))]
    {
        0
    }
}

/// Load a new page-directory base into CR3.
///
/// # Safety
/// `phys_addr` must be the physical address of a valid, fully-populated
/// page directory, or subsequent memory accesses fault unpredictably.
#[inline]
pub unsafe fn switch_page_table(phys_addr: u32) {
    #[cfg(target_arch = "x86")]
    asm!("mov cr3, {}", in(reg) phys_addr, options(nostack, preserves_flags));
    #[cfg(not(target_arch = "x86"))]
    let _ = phys_addr;
}

/// Invalidate the TLB entry for a single virtual address.
#[inline]
pub fn flush_tlb(vaddr: u32) {
    #[cfg(target_arch = "x86")]
    unsafe {
        asm!("invlpg [{}]", in(reg) vaddr, options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = vaddr;
}

/// Millisecond tick count since boot, maintained by the out-of-scope timer
/// IRQ calling [`tick`]. Sleep timers and serial log timestamps read this.
static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Called by the (external, out-of-scope) timer IRQ handler once per tick.
pub fn tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Current tick count, in milliseconds since boot.
pub fn ticks_ms() -> u32 {
    TICK_COUNT.load(Ordering::Relaxed)
}
