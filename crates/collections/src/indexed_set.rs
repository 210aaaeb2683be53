use core::panic;
use std::fmt;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::ops::Deref;
use std::ops::Index;
use std::ops::IndexMut;

use hashbrown::Equivalent;
use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;

use maxterm_utilities::GenerationCounter;
use maxterm_utilities::GenerationalIndex;
use maxterm_utilities::NoHasherBuilder;
use maxterm_utilities::cast;

/// A type-safe index for [IndexedSet]. Generational in debug builds to catch
/// use of indices whose slot has been reused.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SetIndex(GenerationalIndex<usize>);

impl Deref for SetIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for SetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetIndex({})", self.0)
    }
}

impl fmt::Display for SetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set that assigns a dense index to every element. Indices stay valid
/// across insertions, deletions and the rehashes of the lookup index; removed
/// slots are chained into a free list and handed out again before the table
/// grows.
///
/// Elements live in the table only; the hash index stores `(slot, hash)` pairs
/// hashed through [NoHasherBuilder], so a rehash never touches the elements.
pub struct IndexedSet<T, S = FxBuildHasher> {
    /// The slots, either filled or chained into the free list.
    table: Vec<Slot<T>>,
    /// Lookup index over the filled slots with precomputed hashes.
    index: HashSet<IndexEntry, NoHasherBuilder>,
    /// First slot of the free list.
    free: Option<usize>,
    /// The number of filled slots.
    size: usize,
    generation_counter: GenerationCounter,
    /// Hashes the elements themselves.
    hasher: S,
}

enum Slot<T> {
    Filled(T),
    /// Free slot storing the next free slot; the last one points to itself.
    Free(usize),
}

impl<T, S: BuildHasher + Default> IndexedSet<T, S> {
    pub fn new() -> IndexedSet<T, S> {
        Self::with_hasher(S::default())
    }
}

impl<T, S> IndexedSet<T, S> {
    pub fn with_hasher(hash_builder: S) -> IndexedSet<T, S> {
        IndexedSet {
            table: Vec::default(),
            index: HashSet::with_hasher(NoHasherBuilder),
            free: None,
            size: 0,
            generation_counter: GenerationCounter::new(),
            hasher: hash_builder,
        }
    }

    /// The number of elements in the set.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element stored at the given index, if the slot is filled.
    pub fn get(&self, index: SetIndex) -> Option<&T> {
        match self.table.get(self.generation_counter.get_index(index.0)) {
            Some(Slot::Filled(element)) => Some(element),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Iterates over the elements and their indices.
    pub fn iter(&self) -> Iter<'_, T, S> {
        Iter {
            reference: self,
            index: 0,
            generation_counter: &self.generation_counter,
        }
    }
}

impl<T: Hash + Eq, S: BuildHasher> IndexedSet<T, S> {
    /// Inserts the given element.
    ///
    /// Returns its index and whether the element was newly inserted; inserting
    /// an element that is already present returns the existing index.
    pub fn insert(&mut self, value: T) -> (SetIndex, bool) {
        let query = Query::new(&value, &self.hasher, &self.table);

        if let Some(entry) = self.index.get(&query) {
            return (SetIndex(self.generation_counter.recall_index(entry.index)), false);
        }

        let hash = query.hash;

        let index = match self.free {
            Some(first) => {
                let next = match self.table[first] {
                    Slot::Free(next) => next,
                    Slot::Filled(_) => panic!("The free list contains a filled slot"),
                };

                if first == next {
                    // The last free slot points to itself.
                    self.free = None;
                } else {
                    self.free = Some(next);
                }

                self.table[first] = Slot::Filled(value);
                first
            }
            None => {
                self.table.push(Slot::Filled(value));
                self.table.len() - 1
            }
        };

        self.size += 1;
        self.index.insert(IndexEntry::new(index, hash));
        (SetIndex(self.generation_counter.create_index(index)), true)
    }

    /// Returns the index of the given element, or None when it is absent.
    pub fn index<Q>(&self, key: &Q) -> Option<SetIndex>
    where
        Q: Hash + Equivalent<T>,
    {
        let query = Query::new(key, &self.hasher, &self.table);

        self.index
            .get(&query)
            .map(|entry| SetIndex(self.generation_counter.recall_index(entry.index)))
    }

    /// Removes all elements for which `f(index, element)` returns false. The
    /// closure may modify elements as long as hash and equality stay the same.
    pub fn retain_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(SetIndex, &mut T) -> bool,
    {
        for (index, slot) in self.table.iter_mut().enumerate() {
            if let Slot::Filled(value) = slot
                && !f(SetIndex(self.generation_counter.recall_index(index)), value)
            {
                let hash = self.hasher.hash_one(&*value);
                let removed = self.index.remove(&IndexEntry::new(index, hash));
                debug_assert!(removed, "A filled slot must be present in the lookup index");

                match self.free {
                    Some(next) => {
                        *slot = Slot::Free(next);
                    }
                    None => {
                        *slot = Slot::Free(index);
                    }
                };
                self.free = Some(index);
                self.size -= 1;
            }
        }
    }

    /// Removes the given element, freeing its slot for reuse.
    pub fn remove(&mut self, element: &T) -> bool {
        let query = Query::new(element, &self.hasher, &self.table);

        if let Some(entry) = self.index.take(&query) {
            let next = match self.free {
                Some(next) => next,
                None => entry.index,
            };

            self.table[entry.index] = Slot::Free(next);
            self.free = Some(entry.index);
            self.size -= 1;
            true
        } else {
            false
        }
    }

    /// Returns true iff the set contains the given element.
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        Q: Hash + Equivalent<T>,
    {
        let query = Query::new(element, &self.hasher, &self.table);
        self.index.contains(&query)
    }
}

impl<T, S> fmt::Debug for IndexedSet<T, S>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, S: BuildHasher + Default> Default for IndexedSet<T, S> {
    fn default() -> IndexedSet<T, S> {
        IndexedSet::new()
    }
}

impl<T, S> Index<SetIndex> for IndexedSet<T, S> {
    type Output = T;

    fn index(&self, index: SetIndex) -> &Self::Output {
        cast!(&self.table[*index], Slot::Filled)
    }
}

impl<T, S: BuildHasher> IndexMut<SetIndex> for IndexedSet<T, S> {
    fn index_mut(&mut self, index: SetIndex) -> &mut Self::Output {
        cast!(&mut self.table[*index], Slot::Filled)
    }
}

/// An entry of the lookup index: the slot of the element together with its
/// precomputed hash.
#[derive(Copy, Clone, PartialEq, Eq)]
struct IndexEntry {
    index: usize,
    hash: u64,
}

impl IndexEntry {
    fn new(index: usize, hash: u64) -> Self {
        Self { index, hash }
    }
}

impl Hash for IndexEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Looks up elements through the lookup index without duplicating the key.
struct Query<'a, T, Q> {
    value: &'a Q,
    hash: u64,
    table: &'a Vec<Slot<T>>,
}

impl<'a, T, Q: Hash> Query<'a, T, Q> {
    fn new<S: BuildHasher>(value: &'a Q, hasher: &S, table: &'a Vec<Slot<T>>) -> Self {
        Self {
            value,
            table,
            hash: hasher.hash_one(value),
        }
    }
}

impl<T, Q: Equivalent<T>> Equivalent<IndexEntry> for Query<'_, T, Q> {
    fn equivalent(&self, key: &IndexEntry) -> bool {
        if let Some(Slot::Filled(element)) = self.table.get(key.index) {
            self.value.equivalent(element)
        } else {
            false
        }
    }
}

impl<T, Q> Hash for Query<'_, T, Q> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Iterator over the filled slots of an [IndexedSet].
pub struct Iter<'a, T, S> {
    reference: &'a IndexedSet<T, S>,
    index: usize,
    generation_counter: &'a GenerationCounter,
}

impl<'a, T, S> Iterator for Iter<'a, T, S> {
    type Item = (SetIndex, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.reference.table.len() {
            let current_index = self.index;
            self.index += 1;

            if let Slot::Filled(element) = &self.reference.table[current_index] {
                return Some((SetIndex(self.generation_counter.recall_index(current_index)), element));
            }
        }

        None
    }
}

impl<'a, T, S> IntoIterator for &'a IndexedSet<T, S> {
    type Item = (SetIndex, &'a T);
    type IntoIter = Iter<'a, T, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::Rng;

    use maxterm_utilities::random_test;

    use crate::IndexedSet;
    use crate::SetIndex;

    #[test]
    fn test_index_stability() {
        let mut set: IndexedSet<&str> = IndexedSet::default();

        let (a, _) = set.insert("a");
        let (b, _) = set.insert("b");
        let (c, _) = set.insert("c");

        // Removing b leaves the other indices untouched.
        assert!(set.remove(&"b"));
        assert_eq!(set.get(a), Some(&"a"));
        assert_eq!(set.get(c), Some(&"c"));
        assert_eq!(set.len(), 2);

        // The freed slot is handed out again before the table grows.
        let (d, inserted) = set.insert("d");
        assert!(inserted);
        assert_eq!(*d, *b);
        assert_eq!(set.get(a), Some(&"a"));
        assert_eq!(set.get(c), Some(&"c"));

        // Inserting an existing element returns its current index.
        let (a2, inserted) = set.insert("a");
        assert!(!inserted);
        assert_eq!(a, a2);
    }

    #[test]
    fn test_retain_mut() {
        let mut set: IndexedSet<usize> = IndexedSet::default();
        for value in 0..100 {
            set.insert(value);
        }

        set.retain_mut(|_, value| *value % 2 == 0);

        assert_eq!(set.len(), 50);
        assert!(set.contains(&42));
        assert!(!set.contains(&43));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_random_indexed_set_construction() {
        random_test(100, |rng| {
            let mut input = vec![];
            for _ in 0..100 {
                input.push(rng.random_range(0..32) as usize);
            }

            let mut indices: HashMap<usize, SetIndex> = HashMap::default();

            let mut set: IndexedSet<usize> = IndexedSet::default();
            for element in &input {
                let index = set.insert(*element).0;
                indices.insert(*element, index);
            }

            for (index, value) in &set {
                assert_eq!(
                    indices[value], index,
                    "The stored index does not match the returned value"
                );
            }

            for value in &mut input.iter().take(10) {
                set.remove(value);
                indices.remove(value);
            }

            for (index, value) in &set {
                assert_eq!(
                    indices[value], index,
                    "The stored index does not match the returned value"
                );
            }

            for (value, index) in &indices {
                assert!(
                    set.get(*index) == Some(value),
                    "Index {} should still resolve to element {:?}",
                    **index,
                    value
                );
            }

            for value in &input {
                assert_eq!(
                    set.contains(value),
                    indices.contains_key(value),
                    "Inconsistent contains result for value {value:?}"
                );
            }
        })
    }
}
