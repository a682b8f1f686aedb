//! x86 (i386) low-level support retained by this crate: raw port I/O.
//!
//! GDT, IDT, PIC, PIT, and TSS bring-up live in the out-of-scope boot
//! layer (see §1 of SPEC_FULL.md) and are not reimplemented here.

pub mod port;
