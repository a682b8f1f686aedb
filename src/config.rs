//! Kernel-wide compile-time constants.
//!
//! Consolidates values that the teacher scatters as bare `const`s across
//! `memory/vma.rs`, `task/thread.rs`, and `syscall/handlers/*.rs` into one
//! place, since the process/VMA/signal components all reference them.

/// Hardware page size on i386.
pub const PAGE_SIZE: u32 = 4096;

/// Per-thread kernel stack size.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Magic value written at the bottom of a kernel stack to detect overflow.
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

/// Base of the anonymous mmap region. Placed above a generous brk/heap
/// ceiling, well below the user stack.
pub const MMAP_BASE: u32 = 0x4000_0000;

/// Exclusive upper bound of the mmap region.
pub const MMAP_LIMIT: u32 = 0xB000_0000;

/// Top of user-mode address space (kernel/user split on non-PAE i386).
pub const USER_ADDR_MAX: u32 = 0xC000_0000;

/// Highest signal number classified by the fixed masks in `signal`.
/// Numbers at or above this are real-time signals and are never subject
/// to KERNEL_ONLY/STOP_SET/COREDUMP_SET/IGNORE_SET classification.
pub const SIGRTMIN: u32 = 32;

/// Number of signal-handler slots per process (indices 0..31 map to
/// signal numbers 1..32).
pub const NSIG: usize = 32;

/// Number of priority levels in the run queue (higher numeric value =
/// higher priority, matching the teacher's `NUM_PRIORITIES` run-queue).
pub const NUM_PRIORITIES: usize = 32;

/// pid reserved for the init process; exit() reparents orphans to it and
/// `kill(-1, sig)` spares it.
pub const INIT_PID: u32 = 1;

pub const fn page_align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

pub const fn page_align_up(addr: u32) -> u32 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: u32) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_page() {
        assert_eq!(page_align_up(1), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }

    #[test]
    fn align_down_truncates() {
        assert_eq!(page_align_down(PAGE_SIZE + 100), PAGE_SIZE);
    }
}
