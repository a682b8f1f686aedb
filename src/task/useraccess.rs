//! User-memory access primitives.
//!
//! A stated-interface boundary (§1, §9): the actual page-fault-trapped
//! copy ("gate through the same user-access primitives used by syscall
//! argument copying, with fault-trapped stores") depends on the
//! out-of-scope trap layer's exception-table machinery. This crate's
//! small scale runs signal-frame synthesis with the target process's page
//! directory already loaded (the thread being signaled is always either
//! current or about to become current), so a direct copy through the
//! linear address is correct; only the fault-trapping wrapper around it
//! is left as the seam to the boot layer.

/// Copy `src` into user memory starting at `dst`.
///
/// # Safety
/// `dst` must be a valid, writable address in the currently-loaded
/// address space for `src.len()` bytes.
pub unsafe fn copy_to_user(dst: u32, src: &[u8]) {
    core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
}

/// Copy from user memory starting at `src` into `dst`.
///
/// # Safety
/// `src` must be a valid, readable address in the currently-loaded
/// address space for `dst.len()` bytes.
pub unsafe fn copy_from_user(dst: &mut [u8], src: u32) {
    core::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
}
