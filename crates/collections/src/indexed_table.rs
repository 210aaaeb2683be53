use core::panic;
use std::fmt;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::ops::Deref;

use hashbrown::Equivalent;
use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;

use maxterm_utilities::GenerationCounter;
use maxterm_utilities::GenerationalIndex;
use maxterm_utilities::NoHasherBuilder;

/// A type-safe index for [IndexedTable].
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TableIndex(GenerationalIndex<usize>);

impl Deref for TableIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for TableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableIndex({})", self.0)
    }
}

/// The keyed companion of [crate::IndexedSet]: a map that assigns a dense,
/// deletion-stable index to every key. Hashing and equality consider the key
/// only, so `put` of an existing key overwrites its value in place and keeps
/// the index.
pub struct IndexedTable<K, V, S = FxBuildHasher> {
    table: Vec<Slot<K, V>>,
    /// Lookup index over the filled slots with precomputed key hashes.
    index: HashSet<IndexEntry, NoHasherBuilder>,
    free: Option<usize>,
    size: usize,
    generation_counter: GenerationCounter,
    hasher: S,
}

enum Slot<K, V> {
    Filled(K, V),
    /// Free slot storing the next free slot; the last one points to itself.
    Free(usize),
}

impl<K, V, S: BuildHasher + Default> IndexedTable<K, V, S> {
    pub fn new() -> Self {
        IndexedTable {
            table: Vec::default(),
            index: HashSet::with_hasher(NoHasherBuilder),
            free: None,
            size: 0,
            generation_counter: GenerationCounter::new(),
            hasher: S::default(),
        }
    }
}

impl<K, V, S: BuildHasher + Default> Default for IndexedTable<K, V, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> IndexedTable<K, V, S> {
    /// The number of entries in the table.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the key and value stored at the given index.
    pub fn get_entry(&self, index: TableIndex) -> Option<(&K, &V)> {
        match self.table.get(self.generation_counter.get_index(index.0)) {
            Some(Slot::Filled(key, value)) => Some((key, value)),
            _ => None,
        }
    }

    /// Iterates over the entries and their indices.
    pub fn iter(&self) -> impl Iterator<Item = (TableIndex, &K, &V)> {
        self.table.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Filled(key, value) => Some((
                TableIndex(self.generation_counter.recall_index(index)),
                key,
                value,
            )),
            Slot::Free(_) => None,
        })
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> IndexedTable<K, V, S> {
    /// Inserts or overwrites the entry for the given key.
    ///
    /// Returns the index of the entry and the previous value when the key was
    /// already present.
    pub fn put(&mut self, key: K, value: V) -> (TableIndex, Option<V>) {
        let query = Query::new(&key, &self.hasher, &self.table);

        if let Some(entry) = self.index.get(&query) {
            let slot = entry.index;
            let previous = match &mut self.table[slot] {
                Slot::Filled(_, stored) => std::mem::replace(stored, value),
                Slot::Free(_) => panic!("The lookup index refers to a free slot"),
            };
            return (TableIndex(self.generation_counter.recall_index(slot)), Some(previous));
        }

        let hash = query.hash;

        let index = match self.free {
            Some(first) => {
                let next = match self.table[first] {
                    Slot::Free(next) => next,
                    Slot::Filled(..) => panic!("The free list contains a filled slot"),
                };

                if first == next {
                    self.free = None;
                } else {
                    self.free = Some(next);
                }

                self.table[first] = Slot::Filled(key, value);
                first
            }
            None => {
                self.table.push(Slot::Filled(key, value));
                self.table.len() - 1
            }
        };

        self.size += 1;
        self.index.insert(IndexEntry { index, hash });
        (TableIndex(self.generation_counter.create_index(index)), None)
    }

    /// Returns the value stored for the given key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let query = Query::new(key, &self.hasher, &self.table);
        let entry = self.index.get(&query)?;

        match &self.table[entry.index] {
            Slot::Filled(_, value) => Some(value),
            Slot::Free(_) => None,
        }
    }

    /// Returns the index assigned to the given key.
    pub fn index<Q>(&self, key: &Q) -> Option<TableIndex>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let query = Query::new(key, &self.hasher, &self.table);

        self.index
            .get(&query)
            .map(|entry| TableIndex(self.generation_counter.recall_index(entry.index)))
    }

    /// Removes the entry for the given key, freeing its slot for reuse.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let query = Query::new(key, &self.hasher, &self.table);
        let entry = self.index.take(&query)?;

        let next = match self.free {
            Some(next) => next,
            None => entry.index,
        };

        let previous = std::mem::replace(&mut self.table[entry.index], Slot::Free(next));
        self.free = Some(entry.index);
        self.size -= 1;

        match previous {
            Slot::Filled(_, value) => Some(value),
            Slot::Free(_) => panic!("The lookup index refers to a free slot"),
        }
    }
}

/// An entry of the lookup index, hashing through its precomputed key hash.
#[derive(Copy, Clone, PartialEq, Eq)]
struct IndexEntry {
    index: usize,
    hash: u64,
}

impl Hash for IndexEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Looks up entries by key without duplicating the key in the index.
struct Query<'a, K, V, Q: ?Sized> {
    key: &'a Q,
    hash: u64,
    table: &'a Vec<Slot<K, V>>,
}

impl<'a, K, V, Q: Hash + ?Sized> Query<'a, K, V, Q> {
    fn new<S: BuildHasher>(key: &'a Q, hasher: &S, table: &'a Vec<Slot<K, V>>) -> Self {
        Self {
            key,
            table,
            hash: hasher.hash_one(key),
        }
    }
}

impl<K, V, Q: Equivalent<K> + ?Sized> Equivalent<IndexEntry> for Query<'_, K, V, Q> {
    fn equivalent(&self, entry: &IndexEntry) -> bool {
        if let Some(Slot::Filled(key, _)) = self.table.get(entry.index) {
            self.key.equivalent(key)
        } else {
            false
        }
    }
}

impl<K, V, Q: ?Sized> Hash for Query<'_, K, V, Q> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_overwrite() {
        let mut table: IndexedTable<String, usize> = IndexedTable::new();

        let (index, previous) = table.put(String::from("answer"), 41);
        assert!(previous.is_none());

        // Overwriting keeps the index and returns the old value.
        let (index2, previous) = table.put(String::from("answer"), 42);
        assert_eq!(index, index2);
        assert_eq!(previous, Some(41));

        assert_eq!(table.get("answer"), Some(&42));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_entry(index).map(|(_, v)| *v), Some(42));

        // Borrowed keys also work for index and remove.
        assert_eq!(table.index("answer"), Some(index));
        assert_eq!(table.remove("answer"), Some(42));
        assert!(table.get("answer").is_none());
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let mut table: IndexedTable<&str, usize> = IndexedTable::new();

        let (a, _) = table.put("a", 1);
        let (b, _) = table.put("b", 2);
        let (c, _) = table.put("c", 3);

        assert_eq!(table.remove(&"b"), Some(2));
        assert_eq!(table.len(), 2);
        assert!(table.get(&"b").is_none());

        // Unrelated indices survive the removal.
        assert_eq!(table.get_entry(a).map(|(_, v)| *v), Some(1));
        assert_eq!(table.get_entry(c).map(|(_, v)| *v), Some(3));

        // The freed slot is recycled.
        let (d, _) = table.put("d", 4);
        assert_eq!(*d, *b);
        assert_eq!(table.index(&"d"), Some(d));
    }
}
