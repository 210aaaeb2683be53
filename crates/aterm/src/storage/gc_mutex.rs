use std::cell::UnsafeCell;
use std::ops::Deref;
use std::ops::DerefMut;

use crate::storage::GlobalTermPoolGuard;
use crate::storage::THREAD_TERM_POOL;

/// A cell whose guards hold the shared term pool lock, keeping garbage
/// collection out while the value is accessed. Used by [crate::Protected] to
/// hand out references into containers of unprotected terms.
pub struct GcMutex<T> {
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for GcMutex<T> {}
unsafe impl<T: Send> Sync for GcMutex<T> {}

impl<T> GcMutex<T> {
    pub fn new(value: T) -> GcMutex<T> {
        GcMutex {
            inner: UnsafeCell::new(value),
        }
    }

    /// Provides mutable access to the underlying value.
    pub fn write(&self) -> GcMutexGuard<'_, T> {
        GcMutexGuard {
            mutex: self,
            _guard: THREAD_TERM_POOL.with_borrow(|tp| unsafe {
                std::mem::transmute(
                    tp.term_pool()
                        .read_recursive()
                        .expect("The global term pool lock failed"),
                )
            }),
        }
    }

    /// Provides immutable access to the underlying value.
    pub fn read(&self) -> GcMutexGuard<'_, T> {
        GcMutexGuard {
            mutex: self,
            _guard: THREAD_TERM_POOL.with_borrow(|tp| unsafe {
                std::mem::transmute(
                    tp.term_pool()
                        .read_recursive()
                        .expect("The global term pool lock failed"),
                )
            }),
        }
    }
}

pub struct GcMutexGuard<'a, T> {
    mutex: &'a GcMutex<T>,

    /// Keeps garbage collection out, released on drop.
    _guard: GlobalTermPoolGuard<'a>,
}

impl<T> Deref for GcMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for GcMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Exclusivity is enforced by the callers through [crate::Protected].
        unsafe { &mut *self.mutex.inner.get() }
    }
}
