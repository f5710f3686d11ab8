//! The fast mutex protecting RNG state.
//!
//! Grounded on `original_source/src/otterylite_locking.h`'s
//! `ottery_fast_mutex_*` family, which widens into whatever the platform's
//! fastest lock is. Rust already has exactly that in `std::sync::Mutex`, so
//! this module is a thin named wrapper rather than a reimplementation,
//! matching spec.md §9's redesign flag ("collapse the hand-rolled
//! once-init + mutex pair into `OnceLock`/`Mutex`").
//!
//! When the `locking` feature is disabled — for single-threaded or
//! interrupt-driven embedded builds where a real mutex would be dead
//! weight — `Lock` degrades to a no-op `RefCell`-free pass-through. This
//! crate is not built for those targets today, but the seam matches the
//! original's `OTTERY_DISABLE_LOCKING` compile switch.

#[cfg(feature = "locking")]
mod imp {
    use std::sync::{Mutex, MutexGuard};

    pub struct Lock<T> {
        inner: Mutex<T>,
    }

    impl<T> Lock<T> {
        pub const fn new(value: T) -> Self {
            Lock {
                inner: Mutex::new(value),
            }
        }

        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }
    }
}

#[cfg(not(feature = "locking"))]
mod imp {
    use std::cell::UnsafeCell;
    use std::ops::{Deref, DerefMut};

    pub struct Lock<T> {
        inner: UnsafeCell<T>,
    }

    // SAFETY: only sound when the caller guarantees single-threaded access,
    // which is the contract of disabling the `locking` feature.
    unsafe impl<T> Sync for Lock<T> {}

    impl<T> Lock<T> {
        pub const fn new(value: T) -> Self {
            Lock {
                inner: UnsafeCell::new(value),
            }
        }

        pub fn lock(&self) -> Guard<'_, T> {
            Guard {
                ptr: self.inner.get(),
            }
        }
    }

    pub struct Guard<'a, T> {
        ptr: *mut T,
    }

    impl<'a, T> Deref for Guard<'a, T> {
        type Target = T;
        fn deref(&self) -> &T {
            // SAFETY: see the `unsafe impl Sync` justification above.
            unsafe { &*self.ptr }
        }
    }

    impl<'a, T> DerefMut for Guard<'a, T> {
        fn deref_mut(&mut self) -> &mut T {
            // SAFETY: see the `unsafe impl Sync` justification above.
            unsafe { &mut *self.ptr }
        }
    }
}

pub use imp::Lock;
