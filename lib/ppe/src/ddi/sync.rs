// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
use core::ops::Deref;
use core::ops::DerefMut;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        unsafe extern "C" {
            /// Mask interrupts on the local CPU, returning the previous
            /// interrupt state.
            fn ppe_irq_save() -> usize;

            /// Restore the interrupt state returned by `ppe_irq_save()`.
            fn ppe_irq_restore(flags: usize);
        }
    } else {
        use std::sync::Mutex;
    }
}

/// A spin lock which masks local interrupts while held.
///
/// The frame entry points run in interrupt context. A lock taken there
/// must not be preempted by a nested interrupt which tries to take the
/// same lock on the same CPU, so acquisition saves and disables the
/// local interrupt state and release restores it. This mirrors
/// `spin_lock_irqsave()`/`spin_unlock_irqrestore()`.
///
/// The guard is the only way to reach the data, and dropping it is the
/// only way to release the lock, so early returns can never leak a
/// held lock.
#[cfg(all(not(feature = "std"), not(test)))]
pub struct KSpinLock<T> {
    inner: spin::Mutex<T>,
}

#[cfg(all(not(feature = "std"), not(test)))]
pub struct KSpinLockGuard<'a, T: 'a> {
    // Declared before `_flags` so the lock is released before
    // interrupts are restored.
    guard: spin::MutexGuard<'a, T>,
    _flags: IrqFlags,
}

#[cfg(all(not(feature = "std"), not(test)))]
struct IrqFlags(usize);

#[cfg(all(not(feature = "std"), not(test)))]
impl IrqFlags {
    fn save() -> Self {
        // Safety: The embedder provides these hooks and they have no
        // preconditions beyond being paired.
        Self(unsafe { ppe_irq_save() })
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl Drop for IrqFlags {
    fn drop(&mut self) {
        // Safety: `self.0` came from `ppe_irq_save()`.
        unsafe { ppe_irq_restore(self.0) }
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> KSpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self { inner: spin::Mutex::new(val) }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub fn lock_irqsave(&self) -> KSpinLockGuard<'_, T> {
        let flags = IrqFlags::save();
        let guard = self.inner.lock();
        KSpinLockGuard { guard, _flags: flags }
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> Deref for KSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> DerefMut for KSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

// In userland there are no interrupts to mask; a std mutex gives the
// same mutual exclusion.
#[cfg(any(feature = "std", test))]
pub struct KSpinLock<T> {
    inner: Mutex<T>,
}

#[cfg(any(feature = "std", test))]
pub struct KSpinLockGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

#[cfg(any(feature = "std", test))]
impl<T> Deref for KSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

#[cfg(any(feature = "std", test))]
impl<T> DerefMut for KSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

#[cfg(any(feature = "std", test))]
impl<T> KSpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self { inner: Mutex::new(val) }
    }

    pub fn into_inner(self) -> T {
        // Poisoning is ignored: the kernel lock has no such notion.
        match self.inner.into_inner() {
            Ok(val) => val,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lock_irqsave(&self) -> KSpinLockGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        KSpinLockGuard { guard }
    }
}
