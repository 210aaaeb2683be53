use crate::BfSharedMutex;

/// A [BfSharedMutex] wrapper suitable for `static` variables.
///
/// # Details
///
/// [BfSharedMutex] itself is Send but not Sync, so it cannot be stored in a
/// static directly. This wrapper never hands out the inner instance; threads
/// call [GlobalBfSharedMutex::share] to obtain their own clone.
pub struct GlobalBfSharedMutex<T> {
    shared_mutex: BfSharedMutex<T>,
}

impl<T> GlobalBfSharedMutex<T> {
    /// Constructs a global shared mutex protecting the given object.
    pub fn new(object: T) -> Self {
        Self {
            shared_mutex: BfSharedMutex::new(object),
        }
    }

    /// Returns a clone of the underlying shared mutex for the calling thread.
    pub fn share(&self) -> BfSharedMutex<T> {
        self.shared_mutex.clone()
    }
}

// Sound because the inner instance itself is never used for locking, only
// cloned under the registry mutex.
unsafe impl<T: Send> Send for GlobalBfSharedMutex<T> {}
unsafe impl<T: Send> Sync for GlobalBfSharedMutex<T> {}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use maxterm_utilities::test_threads;

    use super::*;

    static GLOBAL: LazyLock<GlobalBfSharedMutex<usize>> = LazyLock::new(|| GlobalBfSharedMutex::new(0));

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_global_shared_mutex() {
        test_threads(
            8,
            || GLOBAL.share(),
            |mutex| {
                *mutex.write().unwrap() += 1;
                let _value = *mutex.read().unwrap();
            },
        );
    }
}
