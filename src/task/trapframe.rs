//! Kernel-stack trap-frame layout and the two entry trampolines (§4.D,
//! 15% of the core). Ported from `create_kernel_thread`/`create_user_thread`/
//! `process_fork`'s trap-frame seeding and `kernel_thread_entry`/
//! `user_thread_elf_entry`/`user_thread_entry` in
//! `original_source/src/kernel/proc/task.c`; the teacher's own
//! `task/context.rs` is an x86-64 callee-saved-register context (no trap
//! frame at all, since its trampoline is pure Rust calling convention) and
//! doesn't carry this shape.
//!
//! The field layout is fixed by §6: `edi, esi, ebp, esp, ebx, edx, ecx,
//! eax, eip, return_address, parameter1..3`, top of stack downward. A
//! single builder encapsulates it with a `static_assert`-style size check,
//! per the Design Notes' recommendation, rather than ad hoc pointer
//! arithmetic at each of the three call sites that seed one (kernel
//! thread, user ELF thread, forked thread).

use crate::signal::frame::InterruptRegisters;
use crate::task::thread::Thread;

/// Out-of-scope collaborators (§1: "Boot, GDT/IDT, PIC, PIT, TSS bring-up"):
/// the actual mode switch and TSS kernel-stack-pointer update are privileged
/// instruction sequences owned by that layer, declared here only as the
/// call surface the trampolines need. Mirrors `original_source`'s `extern
/// void enter_usermode(...)`/`extern void return_usermode(...)`.
extern "C" {
    fn enter_usermode(eip: u32, esp: u32, failed_address: u32) -> !;
    fn return_usermode(regs: *const InterruptRegisters) -> !;
    fn tss_set_kernel_stack(stack_top: u32);
}

/// Sentinel return address baked into every trap frame. If a trampoline
/// ever executes a plain `ret` instead of diverging (`schedule()`,
/// `enter_usermode`), execution lands here and must fault — this address
/// is never mapped.
pub const TRAPPED_PAGE_FAULT: u32 = 0xFFFF_FFF0;

/// The seed layout of a thread's kernel stack (§6, §4.D).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub return_address: u32,
    pub parameter1: u32,
    pub parameter2: u32,
    pub parameter3: u32,
}

const _: () = assert!(core::mem::size_of::<TrapFrame>() == 13 * 4);

/// Builds a `TrapFrame` field by field, then writes it at the top of a
/// kernel stack so that the next context switch into this thread "returns"
/// into `eip` with `parameter1..3` in place for its calling convention.
pub struct TrapFrameBuilder {
    frame: TrapFrame,
}

impl TrapFrameBuilder {
    pub fn new(eip: u32) -> Self {
        TrapFrameBuilder {
            frame: TrapFrame {
                eip,
                return_address: TRAPPED_PAGE_FAULT,
                ..Default::default()
            },
        }
    }

    pub fn param1(mut self, v: u32) -> Self {
        self.frame.parameter1 = v;
        self
    }

    pub fn param2(mut self, v: u32) -> Self {
        self.frame.parameter2 = v;
        self
    }

    pub fn param3(mut self, v: u32) -> Self {
        self.frame.parameter3 = v;
        self
    }

    /// Write the frame at the top of `stack_top` (the stack's highest
    /// address) and return the new kernel stack pointer — `stack_top -
    /// size_of::<TrapFrame>()` — to store as the thread's saved `esp`.
    ///
    /// # Safety
    /// `stack_top` must be the aligned top of a kernel stack at least
    /// `size_of::<TrapFrame>()` bytes long that nothing else is using.
    pub unsafe fn write(self, stack_top: u32) -> u32 {
        let esp = stack_top - core::mem::size_of::<TrapFrame>() as u32;
        core::ptr::write(esp as *mut TrapFrame, self.frame);
        esp
    }
}

/// Kernel-thread entry function pointer: `void flow()` in the original.
pub type KernelEntry = extern "C" fn();

/// Kernel-thread trampoline (§4.D): invokes `entry`, then yields forever
/// via `schedule()`. Never returns — if `entry` itself returns, falling
/// through to `schedule()` means the thread is simply rescheduled away
/// and reaped like any other terminated thread would be, matching the
/// original's `flow(); schedule();` shape.
///
/// Called with `parameter1 = &mut Thread`, `parameter2 = entry` per the
/// trap frame built by [`build_kernel_thread_frame`].
pub extern "C" fn kernel_thread_entry(_t: *mut Thread, entry: KernelEntry) -> ! {
    entry();
    crate::task::scheduler::schedule();
    loop {
        crate::arch::hal::halt();
    }
}

/// Seed a fresh kernel stack with a trap frame that, on first dispatch,
/// calls [`kernel_thread_entry`] with `(thread, entry)`.
///
/// # Safety
/// See [`TrapFrameBuilder::write`].
pub unsafe fn build_kernel_thread_frame(stack_top: u32, thread_ptr: u32, entry: KernelEntry) -> u32 {
    TrapFrameBuilder::new(kernel_thread_entry as usize as u32)
        .param1(thread_ptr)
        .param2(entry as usize as u32)
        .write(stack_top)
}

/// Optional argv/env setup hook invoked after ELF load, before the jump
/// to user mode (receives the loaded image layout).
pub type UserSetupHook = fn(&crate::task::elf::ElfLayout);

/// User-thread ELF entry trampoline (§4.D, §4.E). Receives `(thread,
/// path, setup)`, loads the ELF image into the thread's address space,
/// optionally runs `setup` (argv/env), programs the TSS kernel-stack
/// pointer, and jumps to user mode at the image's entry point.
///
/// Per the Design Notes' resolved open question: this trampoline pairs
/// exactly one `unlock_scheduler()` call, at entry, with the lock held
/// across `create_user_thread`/`fork`'s thread-creation critical section —
/// the lock must not still be held once user code starts running.
pub extern "C" fn user_thread_elf_entry(
    t: *mut Thread,
    path: *const u8,
    setup: Option<UserSetupHook>,
) -> ! {
    crate::task::scheduler::unlock_scheduler();

    let thread = unsafe { &mut *t };
    let path = unsafe { crate::task::elf::path_from_raw(path) };
    let layout = {
        let mut process = thread.process.lock();
        crate::task::elf::load_into(&mut process, &path)
            .unwrap_or_else(|e| panic!("exec image load failed for tid {}: {:?}", thread.tid, e))
    };
    if let Some(setup) = setup {
        setup(&layout);
    }
    unsafe {
        tss_set_kernel_stack(thread.kernel_stack_top());
        enter_usermode(layout.entry, layout.stack, TRAPPED_PAGE_FAULT);
    }
}

/// Seed a fresh kernel stack with a trap frame that, on first dispatch,
/// calls [`user_thread_elf_entry`] with `(thread, path, setup)`.
///
/// # Safety
/// See [`TrapFrameBuilder::write`]. `path` must outlive the trampoline's
/// invocation (owned by the caller, typically leaked into the kernel heap
/// the same way `original_source`'s `strdup(path)` does).
pub unsafe fn build_user_thread_frame(
    stack_top: u32,
    thread_ptr: u32,
    path_ptr: u32,
    setup: Option<UserSetupHook>,
) -> u32 {
    let setup_ptr = setup.map_or(0, |f| f as usize as u32);
    TrapFrameBuilder::new(user_thread_elf_entry as usize as u32)
        .param1(thread_ptr)
        .param2(path_ptr)
        .param3(setup_ptr)
        .write(stack_top)
}

/// User-thread *resume* trampoline used by `fork` (§4.E): the child's
/// kernel stack seeds directly into `return_usermode` with the parent's
/// saved register snapshot (already copied into the child's `uregs`,
/// `eax` forced to zero), rather than re-loading an ELF image.
pub extern "C" fn user_thread_entry(t: *mut Thread) -> ! {
    let thread = unsafe { &mut *t };
    unsafe {
        tss_set_kernel_stack(thread.kernel_stack_top());
        return_usermode(&thread.user_regs);
    }
}

/// Seed a fresh kernel stack with a trap frame that, on first dispatch,
/// calls [`user_thread_entry`] with `(thread)` — used only by `fork`.
///
/// # Safety
/// See [`TrapFrameBuilder::write`].
pub unsafe fn build_fork_resume_frame(stack_top: u32, thread_ptr: u32) -> u32 {
    TrapFrameBuilder::new(user_thread_entry as usize as u32)
        .param1(thread_ptr)
        .write(stack_top)
}
