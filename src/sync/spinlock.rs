//! IRQ-safe spinlock.
//!
//! On a single-CPU, cooperatively-preemptive kernel (§5 of SPEC_FULL.md)
//! the only concurrent writer to shared kernel state is an interrupt
//! handler running on top of whatever the CPU was doing when it fired.
//! `lock()` therefore disables interrupts for its duration rather than
//! spinning against another core — spinning is still correct (and kept)
//! so the same type also serves a hypothetical second caller without
//! change, but in practice a `lock()` call here never contends.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::hal;

pub struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let was_enabled = hal::save_and_disable_interrupts();
        let mut spins: u32 = 1;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            for _ in 0..spins.min(64) {
                core::hint::spin_loop();
            }
            spins = spins.saturating_mul(2);
        }
        SpinlockGuard {
            lock: self,
            restore_irq: was_enabled,
        }
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        let was_enabled = hal::save_and_disable_interrupts();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinlockGuard {
                lock: self,
                restore_irq: was_enabled,
            })
        } else {
            hal::restore_interrupt_state(was_enabled);
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Force-release a lock the caller knows is stuck (fault-recovery use
    /// only; never called from ordinary control flow).
    ///
    /// # Safety
    /// The caller must guarantee no other holder believes it still owns
    /// the lock.
    pub unsafe fn force_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    restore_irq: bool,
}

impl<'a, T> SpinlockGuard<'a, T> {
    /// Release the lock's mutual-exclusion bit without restoring the
    /// caller's saved interrupt-enable state.
    ///
    /// Used exactly once in this crate: immediately before
    /// `context_switch`, where the *incoming* thread's own saved
    /// `eflags` (restored by the context switch itself) is what must
    /// take effect next, not the outgoing thread's.
    pub fn release_no_irq_restore(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<'a, T> Deref for SpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        hal::restore_interrupt_state(self.restore_irq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_and_releases() {
        let lock = Spinlock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(0u32);
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }
}
