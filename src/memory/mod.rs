//! Memory subsystem: typed addresses, the physical frame allocator, page
//! table binding, and the per-process VMA manager.
//!
//! Layered bottom-up: [`address`] has no dependencies, [`physical`]
//! depends only on `address` and `sync`, [`virtual_mem`] depends on both
//! plus `arch::hal`, and [`vma`] sits on top as pure address-space
//! bookkeeping that calls back into `virtual_mem`/`physical` only through
//! the closures its callers supply. [`fault`] is the one module here that
//! reaches sideways into `task` and `signal`: it's the glue the trap layer
//! calls on a page fault, not a pure memory-management primitive.

pub mod address;
pub mod fault;
pub mod heap;
pub mod physical;
pub mod virtual_mem;
pub mod vma;

pub use address::{PhysAddr, VirtAddr};
