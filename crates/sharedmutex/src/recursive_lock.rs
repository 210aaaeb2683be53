use std::cell::Cell;
use std::error::Error;
use std::mem;
use std::ops::Deref;
use std::ops::DerefMut;

use crate::BfSharedMutex;
use crate::BfSharedMutexReadGuard;
use crate::BfSharedMutexWriteGuard;

/// An extension of [BfSharedMutex] that allows the same thread to nest read
/// sections without deadlocking against a waiting writer.
pub struct RecursiveLock<T> {
    inner: BfSharedMutex<T>,

    /// How deeply the current thread has nested read_recursive() sections.
    recursive_depth: Cell<usize>,

    /// The number of calls to write(), reported in the pool metrics.
    write_calls: Cell<usize>,

    /// The number of calls to read_recursive(), reported in the pool metrics.
    read_recursive_calls: Cell<usize>,
}

impl<T> RecursiveLock<T> {
    pub fn new(data: T) -> Self {
        Self::from_mutex(BfSharedMutex::new(data))
    }

    /// Wraps an existing clone of a shared mutex.
    pub fn from_mutex(mutex: BfSharedMutex<T>) -> Self {
        RecursiveLock {
            inner: mutex,
            recursive_depth: Cell::new(0),
            write_calls: Cell::new(0),
            read_recursive_calls: Cell::new(0),
        }
    }

    delegate::delegate! {
        to self.inner {
            pub fn data_ptr(&self) -> *const T;
            pub fn is_locked(&self) -> bool;
            pub fn is_locked_exclusive(&self) -> bool;
        }
    }

    /// Acquires the exclusive lock.
    pub fn write(&self) -> Result<RecursiveLockWriteGuard<'_, T>, Box<dyn Error + '_>> {
        debug_assert!(
            self.recursive_depth.get() == 0,
            "Cannot call write() inside a read section"
        );
        self.write_calls.set(self.write_calls.get() + 1);
        self.recursive_depth.set(1);
        Ok(RecursiveLockWriteGuard {
            mutex: self,
            guard: self.inner.write()?,
        })
    }

    /// Acquires a non-recursive read lock.
    pub fn read(&self) -> Result<BfSharedMutexReadGuard<'_, T>, Box<dyn Error + '_>> {
        debug_assert!(
            self.recursive_depth.get() == 0,
            "Cannot call read() inside a read section"
        );
        self.inner.read()
    }

    /// Acquires a read lock that may be nested within an already held one.
    pub fn read_recursive<'a>(&'a self) -> Result<RecursiveLockReadGuard<'a, T>, Box<dyn Error + 'a>> {
        self.read_recursive_calls.set(self.read_recursive_calls.get() + 1);
        if self.recursive_depth.get() == 0 {
            // Take the real read lock, but leak its guard. The depth cell now
            // tracks ownership and the outermost drop restores the guard.
            self.recursive_depth.set(1);
            mem::forget(self.inner.read());
            Ok(RecursiveLockReadGuard { mutex: self })
        } else {
            self.recursive_depth.set(self.recursive_depth.get() + 1);
            Ok(RecursiveLockReadGuard { mutex: self })
        }
    }

    /// The number of times write() has been called.
    pub fn write_call_count(&self) -> usize {
        self.write_calls.get()
    }

    /// The number of times read_recursive() has been called.
    pub fn read_recursive_call_count(&self) -> usize {
        self.read_recursive_calls.get()
    }
}

#[must_use = "Dropping the guard unlocks the recursive lock immediately"]
pub struct RecursiveLockReadGuard<'a, T> {
    mutex: &'a RecursiveLock<T>,
}

impl<T> Deref for RecursiveLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // A read lock is held as long as any recursive guard lives.
        unsafe { self.mutex.inner.data_ptr().as_ref().unwrap_unchecked() }
    }
}

impl<T> Drop for RecursiveLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.recursive_depth.set(self.mutex.recursive_depth.get() - 1);
        if self.mutex.recursive_depth.get() == 0 {
            // Materialise the forgotten guard so the busy flag is lowered.
            unsafe {
                self.mutex.inner.create_read_guard_unchecked();
            }
        }
    }
}

#[must_use = "Dropping the guard unlocks the recursive lock immediately"]
pub struct RecursiveLockWriteGuard<'a, T> {
    mutex: &'a RecursiveLock<T>,
    guard: BfSharedMutexWriteGuard<'a, T>,
}

impl<T> Deref for RecursiveLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl<T> DerefMut for RecursiveLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

impl<T> Drop for RecursiveLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.recursive_depth.set(self.mutex.recursive_depth.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mutex() {
        let mutex = BfSharedMutex::new(100);
        let lock = RecursiveLock::from_mutex(mutex);
        assert_eq!(*lock.read().unwrap(), 100);
    }

    #[test]
    fn test_nested_recursive_reads() {
        let lock = RecursiveLock::new(42);

        let guard1 = lock.read_recursive().unwrap();
        assert_eq!(*guard1, 42);
        assert_eq!(lock.recursive_depth.get(), 1);

        let guard2 = lock.read_recursive().unwrap();
        assert_eq!(*guard2, 42);
        assert_eq!(lock.recursive_depth.get(), 2);

        drop(guard2);
        assert_eq!(lock.recursive_depth.get(), 1);

        drop(guard1);
        assert_eq!(lock.recursive_depth.get(), 0);

        // After full release a writer can enter again.
        *lock.write().unwrap() += 1;
    }

    #[test]
    fn test_call_counters() {
        let lock = RecursiveLock::new(0);

        assert_eq!(lock.write_call_count(), 0);
        assert_eq!(lock.read_recursive_call_count(), 0);

        {
            let _guard = lock.write().unwrap();
        }
        {
            let _guard1 = lock.read_recursive().unwrap();
            let _guard2 = lock.read_recursive().unwrap();
        }

        assert_eq!(lock.write_call_count(), 1);
        assert_eq!(lock.read_recursive_call_count(), 2);
    }
}
