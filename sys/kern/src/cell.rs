// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-borrow containers for kernel singletons.
//!
//! The kernel's global state (task table, timer registry, log sink) lives in
//! `static`s. `KCell` provides checked exclusive access to them: it is a
//! `RefCell`-style container that only hands out `&mut`, and panics on any
//! attempt to borrow reentrantly. On this single-core system a collision can
//! only mean a code path touched a singleton from interrupt context while a
//! task held it without masking interrupts first -- a bug we very much want
//! to hear about.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct KCell<T> {
    in_use: AtomicBool,
    value: UnsafeCell<T>,
}

impl<T> KCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            in_use: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Gets exclusive access to the contents.
    ///
    /// # Panics
    ///
    /// If a borrow is already outstanding.
    pub(crate) fn borrow_mut(&self) -> KRef<'_, T> {
        if self.in_use.swap(true, Ordering::Acquire) {
            panic!();
        }
        // Safety: the flag above ensures we never produce an aliasing &mut.
        KRef {
            contents: unsafe { &mut *self.value.get() },
            in_use: &self.in_use,
        }
    }
}

// Safety: exclusive access is enforced by the borrow flag, so sharing the
// cell across contexts is fine whenever moving the contents would be.
unsafe impl<T> Sync for KCell<T> where for<'a> &'a mut T: Send {}

pub(crate) struct KRef<'a, T> {
    contents: &'a mut T,
    in_use: &'a AtomicBool,
}

impl<T> Drop for KRef<'_, T> {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}

impl<T> Deref for KRef<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.contents
    }
}

impl<T> DerefMut for KRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}
