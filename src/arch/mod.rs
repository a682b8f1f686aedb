//! Architecture support. Non-goals exclude SMP/64-bit/NUMA, so unlike the
//! teacher (which branches `arch::x86` vs `arch::arm64`), this crate has a
//! single target: 32-bit x86.

pub mod hal;
pub mod x86;
