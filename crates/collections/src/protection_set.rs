use core::panic;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::ops::Index;

use maxterm_utilities::GenerationCounter;
use maxterm_utilities::GenerationalIndex;

/// A type-safe index into a [ProtectionSet], generational in debug builds so
/// that unprotecting twice or through a stale index is caught.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProtectionIndex(GenerationalIndex<usize>);

impl Deref for ProtectionIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ProtectionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtectionIndex({:?})", self.0)
    }
}

impl fmt::Display for ProtectionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The root registry of the garbage collector. Every protected object gets a
/// unique slot whose index stays valid until the object is unprotected; freed
/// slots are chained into a free list and reused by later protections.
/// Similar to [crate::IndexedSet], except that entries cannot be looked up by
/// value and the same value may occupy several slots.
#[derive(Debug, Default)]
pub struct ProtectionSet<T> {
    /// The registered roots.
    roots: Vec<Entry<T>>,
    /// First slot of the free list; a slot pointing to itself terminates it.
    free: Option<usize>,
    number_of_insertions: u64,
    size: usize,
    generation_counter: GenerationCounter,
}

#[derive(Debug)]
enum Entry<T> {
    Filled(T),
    Free(usize),
}

impl<T> ProtectionSet<T> {
    pub fn new() -> Self {
        ProtectionSet {
            roots: Vec::new(),
            free: None,
            number_of_insertions: 0,
            size: 0,
            generation_counter: GenerationCounter::new(),
        }
    }

    /// The total number of protect calls over the lifetime of the set.
    pub fn number_of_insertions(&self) -> u64 {
        self.number_of_insertions
    }

    /// The largest number of simultaneously registered roots.
    pub fn maximum_size(&self) -> usize {
        self.roots.capacity()
    }

    /// The number of currently registered roots.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the registered roots and their indices.
    pub fn iter(&self) -> ProtSetIter<'_, T> {
        ProtSetIter {
            current: 0,
            protection_set: self,
            generation_counter: &self.generation_counter,
        }
    }

    /// Returns true iff the given index refers to a registered root.
    pub fn contains_root(&self, index: ProtectionIndex) -> bool {
        matches!(self.roots[self.generation_counter.get_index(index.0)], Entry::Filled(_))
    }

    /// Registers the object as a root and returns the index of its slot.
    pub fn protect(&mut self, object: T) -> ProtectionIndex {
        self.number_of_insertions += 1;
        self.size += 1;

        let index = match self.free {
            Some(first) => {
                match &self.roots[first] {
                    Entry::Free(next) => {
                        if first == *next {
                            // The last free slot points to itself.
                            self.free = None;
                        } else {
                            self.free = Some(*next);
                        }
                    }
                    Entry::Filled(_) => {
                        panic!("The free list must not point to a filled slot");
                    }
                }

                self.roots[first] = Entry::Filled(object);
                first
            }
            None => {
                self.roots.push(Entry::Filled(object));
                self.roots.len() - 1
            }
        };

        ProtectionIndex(self.generation_counter.create_index(index))
    }

    /// Releases the root registered under the given index. The index must be
    /// the one returned by the matching [ProtectionSet::protect] call.
    pub fn unprotect(&mut self, index: ProtectionIndex) {
        let index = self.generation_counter.get_index(index.0);

        debug_assert!(
            matches!(self.roots[index], Entry::Filled(_)),
            "Index {index} does not refer to a registered root"
        );

        self.size -= 1;

        match self.free {
            Some(next) => {
                self.roots[index] = Entry::Free(next);
            }
            None => {
                self.roots[index] = Entry::Free(index);
            }
        };

        self.free = Some(index);
    }

    /// Replaces the root at the given index, keeping its slot.
    pub fn replace(&mut self, index: ProtectionIndex, object: T) {
        let index = self.generation_counter.get_index(index.0);

        debug_assert!(
            matches!(self.roots[index], Entry::Filled(_)),
            "Index {index} does not refer to a registered root"
        );

        self.roots[index] = Entry::Filled(object);
    }
}

impl<T> Index<ProtectionIndex> for ProtectionSet<T> {
    type Output = T;

    fn index(&self, index: ProtectionIndex) -> &Self::Output {
        match &self.roots[*index] {
            Entry::Filled(value) => value,
            Entry::Free(_) => {
                panic!("Attempting to index free slot {index}");
            }
        }
    }
}

pub struct ProtSetIter<'a, T> {
    current: usize,
    protection_set: &'a ProtectionSet<T>,
    generation_counter: &'a GenerationCounter,
}

impl<'a, T> Iterator for ProtSetIter<'a, T> {
    type Item = (ProtectionIndex, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.current < self.protection_set.roots.len() {
            let idx = self.current;
            self.current += 1;

            if let Entry::Filled(object) = &self.protection_set.roots[idx] {
                return Some((ProtectionIndex(self.generation_counter.recall_index(idx)), object));
            }
        }

        None
    }
}

impl<'a, T> IntoIterator for &'a ProtectionSet<T> {
    type Item = (ProtectionIndex, &'a T);
    type IntoIter = ProtSetIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use maxterm_utilities::random_test;
    use maxterm_utilities::test_logger;

    use super::*;

    #[test]
    fn test_protect_unprotect_reuse() {
        test_logger();

        let mut set = ProtectionSet::<String>::new();

        let idx1 = set.protect(String::from("first"));
        let idx2 = set.protect(String::from("second"));

        assert!(set.contains_root(idx1));
        assert_eq!(set[idx2], "second");
        assert_eq!(set.len(), 2);

        set.unprotect(idx1);
        assert!(!set.contains_root(idx1));
        assert_eq!(set.len(), 1);

        // The freed slot is recycled.
        let idx3 = set.protect(String::from("third"));
        assert_eq!(set[idx3], "third");
        assert_eq!(*idx3, *idx1);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_random_protection_set() {
        random_test(100, |rng| {
            let mut protection_set = ProtectionSet::<usize>::new();
            let mut indices: Vec<ProtectionIndex> = Vec::new();

            for _ in 0..5000 {
                indices.push(protection_set.protect(rng.random_range(0..1000)));
            }

            for index in 0..2500 {
                assert!(protection_set[indices[index]] <= 1000);
                protection_set.unprotect(indices[index]);
                indices.remove(index);
            }

            // Protect more to exercise the free list.
            for _ in 0..1000 {
                indices.push(protection_set.protect(rng.random_range(0..1000)));
            }

            for index in &indices {
                assert!(
                    protection_set.contains_root(*index),
                    "All roots that were not unprotected must still be registered"
                );
            }

            assert_eq!(protection_set.iter().count(), 6000 - 2500);
            assert_eq!(protection_set.len(), 6000 - 2500);
            assert_eq!(protection_set.number_of_insertions(), 6000);
            assert!(protection_set.maximum_size() >= 5000);
        });
    }
}
