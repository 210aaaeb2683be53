use std::cell::UnsafeCell;
use std::error::Error;
use std::fmt::Debug;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

/// A shared mutex (readers-writer lock) implementing the busy-forbidden
/// protocol.
///
/// # Details
///
/// Unlike [std::sync::Mutex] this struct is Send but not Sync: every thread
/// acquires its own clone, and the clones of one shared mutex together
/// guarantee shared access through `read` and exclusive access through
/// `write`. A reader only writes its own busy flag, so uncontended read
/// sections involve no cross-thread synchronisation.
pub struct BfSharedMutex<T> {
    /// The busy and forbidden bits of this instance.
    control: Arc<CachePadded<InstanceFlags>>,

    /// Position of this instance in the registry.
    index: usize,

    /// State shared between all clones.
    shared: Arc<CachePadded<SharedState<T>>>,
}

// Send between threads, but each clone stays on its thread.
unsafe impl<T> Send for BfSharedMutex<T> {}

/// The per-instance flags of the protocol.
#[derive(Default)]
struct InstanceFlags {
    busy: AtomicBool,
    forbidden: AtomicBool,
}

/// State shared by every clone of the mutex.
struct SharedState<T> {
    /// The protected object.
    object: UnsafeCell<T>,

    /// Registry of the flags of every live instance; freed slots are None.
    instances: Mutex<Vec<Option<Arc<CachePadded<InstanceFlags>>>>>,
}

impl<T> BfSharedMutex<T> {
    /// Constructs a shared mutex protecting the given object.
    pub fn new(object: T) -> Self {
        let control = Arc::new(CachePadded::new(InstanceFlags::default()));

        Self {
            control: control.clone(),
            shared: Arc::new(CachePadded::new(SharedState {
                object: UnsafeCell::new(object),
                instances: Mutex::new(vec![Some(control)]),
            })),
            index: 0,
        }
    }
}

impl<T> Clone for BfSharedMutex<T> {
    fn clone(&self) -> Self {
        let control = Arc::new(CachePadded::new(InstanceFlags::default()));

        let mut instances = self.shared.instances.lock().expect("Failed to lock the registry");
        instances.push(Some(control.clone()));

        Self {
            control,
            index: instances.len() - 1,
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for BfSharedMutex<T> {
    fn drop(&mut self) {
        let mut instances = self.shared.instances.lock().expect("Failed to lock the registry");
        instances[self.index] = None;
    }
}

/// Guard for exclusive access to the underlying object.
#[must_use = "Dropping the guard unlocks the shared mutex immediately"]
pub struct BfSharedMutexWriteGuard<'a, T> {
    mutex: &'a BfSharedMutex<T>,
    guard: MutexGuard<'a, Vec<Option<Arc<CachePadded<InstanceFlags>>>>>,
}

impl<T> Deref for BfSharedMutexWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // This guard is unique after write(), so shared access is sound.
        unsafe { &*self.mutex.shared.object.get() }
    }
}

impl<T> DerefMut for BfSharedMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // This guard is unique after write(), so mutable access is sound.
        unsafe { &mut *self.mutex.shared.object.get() }
    }
}

impl<T> Drop for BfSharedMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        // Lower every forbidden flag; the registry mutex is released afterwards.
        for control in self.guard.iter().flatten() {
            control.forbidden.store(false, Ordering::SeqCst);
        }
    }
}

/// Guard for shared access to the underlying object.
pub struct BfSharedMutexReadGuard<'a, T> {
    mutex: &'a BfSharedMutex<T>,
}

impl<T> Deref for BfSharedMutexReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Only shared guards exist while reading, all of them immutable.
        unsafe { &*self.mutex.shared.object.get() }
    }
}

impl<T> Drop for BfSharedMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        debug_assert!(
            self.mutex.control.busy.load(Ordering::SeqCst),
            "Cannot unlock a shared lock that was not acquired"
        );

        self.mutex.control.busy.store(false, Ordering::SeqCst);
    }
}

impl<T> BfSharedMutex<T> {
    /// Provides read access to the underlying object, allowing multiple
    /// immutable references to it.
    #[inline]
    pub fn read<'a>(&'a self) -> Result<BfSharedMutexReadGuard<'a, T>, Box<dyn Error + 'a>> {
        debug_assert!(
            !self.control.busy.load(Ordering::SeqCst),
            "Cannot acquire read access again inside a reader section"
        );

        self.control.busy.store(true, Ordering::SeqCst);
        while self.control.forbidden.load(Ordering::SeqCst) {
            self.control.busy.store(false, Ordering::SeqCst);

            // Queue behind the writer that raised our forbidden flag.
            let mut _guard = self.shared.instances.lock()?;

            self.control.busy.store(true, Ordering::SeqCst);
        }

        // The protocol now guarantees immutable access.
        Ok(BfSharedMutexReadGuard { mutex: self })
    }

    /// Creates a read guard without taking the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must logically hold a read lock whose guard was
    /// leaked with `mem::forget`. The busy flag is not incremented, so calling
    /// this while a live guard exists is undefined behaviour.
    #[inline]
    pub unsafe fn create_read_guard_unchecked(&self) -> BfSharedMutexReadGuard<'_, T> {
        BfSharedMutexReadGuard { mutex: self }
    }

    /// Returns a raw pointer to the underlying object.
    ///
    /// Useful together with `mem::forget` to hold a lock without keeping a
    /// guard object alive.
    ///
    /// # Safety
    ///
    /// Dereferencing the pointer is only allowed while the current thread
    /// logically holds a (possibly forgotten) guard.
    #[inline]
    pub fn data_ptr(&self) -> *mut T {
        self.shared.object.get()
    }

    /// Provides write access to the underlying object; a single mutable
    /// reference exists for the lifetime of the guard.
    #[inline]
    pub fn write<'a>(&'a self) -> Result<BfSharedMutexWriteGuard<'a, T>, Box<dyn Error + 'a>> {
        let instances = self.shared.instances.lock()?;

        debug_assert!(
            !self.control.busy.load(Ordering::SeqCst),
            "Can only lock exclusively outside of a shared section, no upgrading"
        );
        debug_assert!(
            !self.control.forbidden.load(Ordering::SeqCst),
            "Cannot acquire an exclusive lock inside an exclusive section"
        );

        // Forbid all instances from entering a read section.
        for control in instances.iter().flatten() {
            debug_assert!(
                !control.forbidden.load(Ordering::SeqCst),
                "Another instance is already forbidden, this cannot happen"
            );

            control.forbidden.store(true, Ordering::SeqCst);
        }

        // Wait until every other instance has left its busy section.
        for (index, instance) in instances.iter().enumerate() {
            if index != self.index
                && let Some(control) = instance
            {
                while control.busy.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
            }
        }

        // The protocol now guarantees exclusive access.
        Ok(BfSharedMutexWriteGuard {
            mutex: self,
            guard: instances,
        })
    }

    /// Returns true iff this instance currently holds a read lock.
    pub fn is_locked(&self) -> bool {
        self.control.busy.load(Ordering::Relaxed)
    }

    /// Returns true iff this instance is forbidden, i.e. a writer holds or is
    /// acquiring the lock.
    pub fn is_locked_exclusive(&self) -> bool {
        self.control.forbidden.load(Ordering::Relaxed)
    }

    /// Accesses the object without locking; sound because the receiver is a
    /// mutable reference.
    pub fn get_mut(&mut self) -> &mut T {
        unsafe { &mut *self.shared.object.get() }
    }
}

impl<T: Debug> Debug for BfSharedMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfSharedMutex")
            .field("busy", &self.control.busy.load(Ordering::SeqCst))
            .field("forbidden", &self.control.forbidden.load(Ordering::SeqCst))
            .field("index", &self.index)
            .field("instances", &self.shared.instances.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::hint::black_box;

    use rand::prelude::*;

    use maxterm_utilities::random_test_threads;
    use maxterm_utilities::test_threads;

    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_exclusive_counter() {
        let shared_number = BfSharedMutex::new(5);
        let num_iterations = 500;
        let num_threads = 20;

        test_threads(
            num_threads,
            || shared_number.clone(),
            move |number| {
                for _ in 0..num_iterations {
                    *number.write().unwrap() += 5;
                }
            },
        );

        assert_eq!(*shared_number.write().unwrap(), num_threads * num_iterations * 5 + 5);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_random_read_write() {
        let shared_vector = BfSharedMutex::new(vec![]);

        let num_threads = 20;
        let num_iterations = 5000;

        random_test_threads(
            num_iterations,
            num_threads,
            || shared_vector.clone(),
            |rng, shared_vector| {
                if rng.random_bool(0.95) {
                    let read = shared_vector.read().unwrap();
                    if !read.is_empty() {
                        let index = rng.random_range(0..read.len());
                        black_box(assert_eq!(read[index], 5));
                    }
                } else {
                    shared_vector.write().unwrap().push(5);
                }
            },
        );
    }

    #[test]
    fn test_dropped_clone_releases_slot() {
        let mutex = BfSharedMutex::new(1);
        let clone = mutex.clone();
        drop(clone);

        // A writer must not wait on the freed slot.
        *mutex.write().unwrap() += 1;
        assert_eq!(*mutex.read().unwrap(), 2);
    }
}
