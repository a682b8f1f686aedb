//! Kernel error kinds and the `Result` alias used throughout the core.
//!
//! The teacher's syscall handlers return raw sentinel values (`u32::MAX`,
//! `u32::MAX - 1`, ...) straight out of `do_*`-style internal functions.
//! This crate keeps that convention at the outermost `sys_*` boundary but
//! gives the internal `do_*`/`sys_*` split a typed error one layer down, so
//! `match` on error kind is possible before it gets collapsed to an ABI
//! integer.

/// Kernel-internal error kinds, mirroring POSIX errno values used at the
/// ABI boundary (negated on return, per §7 of the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Unknown signal, unknown mask op, unaligned size where alignment is
    /// required, handler slot index out of range.
    Inval = 22,
    /// `kill`/`waitpid` target not found.
    Srch = 3,
    /// Sending to a process outside the caller's rights (reserved; the
    /// current policy is permissive and never returns this).
    Perm = 1,
    /// Allocation failure during fork, VMA expansion, or page-table ops.
    NoMem = 12,
    /// A signal pre-empted a blocking syscall.
    Intr = 4,
}

impl Errno {
    /// The raw ABI value: negative errno, matching the "signed status"
    /// convention of §7.
    pub const fn abi(self) -> i32 {
        -(self as i32)
    }
}

impl From<Errno> for i32 {
    fn from(e: Errno) -> i32 {
        e.abi()
    }
}

pub type KResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_value_is_negated_errno() {
        assert_eq!(Errno::Inval.abi(), -22);
        assert_eq!(Errno::NoMem.abi(), -12);
    }
}
