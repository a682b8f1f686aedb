//! Raw kernel stack pointer swap — the bottom half of a context switch.
//!
//! Grounded in the teacher's `task/context.rs` idiom (an `extern "C"`
//! declaration backed by a small hand-written routine, rather than inline
//! `asm!` scattered at call sites) but this crate carries no separate
//! `CpuContext` register struct: every thread's register state already
//! lives at the top of its kernel stack as a
//! [`crate::task::trapframe::TrapFrame`], seeded in exactly PUSHA order
//! (`edi,esi,ebp,esp,ebx,edx,ecx,eax`) followed by `eip`. `context_switch`
//! is therefore just `pusha; mov [old], esp; mov esp, new; popa; ret` —
//! the `ret` lands on the incoming thread's `eip` field the first time it
//! runs, or resumes a previously-interrupted `schedule()` call on every
//! later switch.

/// Save the current stack pointer to `*old_esp`, then load `esp` from
/// `new_esp` and resume whatever trap frame or suspended call is seeded
/// there. Never returns to its caller in the usual sense — "returning"
/// here means some *other* thread's context switch brought control back
/// to this call site.
///
/// # Safety
/// `old_esp` must be a valid pointer the outgoing thread owns exclusively,
/// and `new_esp` must be a kernel stack pointer previously saved by this
/// same function or seeded by
/// [`crate::task::trapframe::TrapFrameBuilder::write`].
#[cfg(target_arch = "x86")]
pub unsafe fn context_switch(old_esp: *mut u32, new_esp: u32) {
    core::arch::asm!(
        "pusha",
        "mov [{old}], esp",
        "mov esp, {new}",
        "popa",
        "ret",
        old = in(reg) old_esp,
        new = in(reg) new_esp,
        options(noreturn),
    );
}

// Host-test builds never actually switch stacks (there is nothing else to
// switch to); this stand-in lets the pure run-queue/scheduler logic under
// test link without assembling real x86 code for the test host's arch.
#[cfg(not(target_arch = "x86"))]
pub unsafe fn context_switch(old_esp: *mut u32, new_esp: u32) {
    *old_esp = new_esp;
}
