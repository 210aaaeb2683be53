use std::fmt;

use log::trace;

/// A map from stable addresses to integers whose hashes are supplied by the
/// caller. Terms already hash by address, so the term layer passes that hash
/// in and the map never touches the key beyond equality.
///
/// # Details
///
/// The map is an open-chaining table: the bucket array stores head indices
/// into an entry arena, and entries chain through arena indices rather than
/// pointers. Removed entries go to an internal free list (the entry cache)
/// and are reused before the arena grows. The bucket array doubles whenever
/// the entry count crosses the configured percentage of the bucket count, and
/// never shrinks.
pub struct IdMap<K> {
    /// Head entry of each chain, or None for an empty bucket.
    buckets: Vec<Option<usize>>,
    /// The entry arena; chains and the free list are index-linked.
    entries: Vec<IdSlot<K>>,
    /// First reclaimed entry, reused before the arena grows.
    free: Option<usize>,
    /// The number of live entries.
    size: usize,
    /// Load percentage above which the bucket array doubles.
    max_load_percent: usize,
}

struct IdEntry<K> {
    key: K,
    hash: u64,
    value: usize,
    next: Option<usize>,
}

enum IdSlot<K> {
    Filled(IdEntry<K>),
    /// Reclaimed slot storing the next entry of the free list.
    Free(Option<usize>),
}

/// Buckets allocated up front; the original sizes its table for roughly a
/// hundred mappings before the first grow.
const INITIAL_BUCKETS: usize = 128;

const DEFAULT_MAX_LOAD_PERCENT: usize = 75;

impl<K: Copy + Eq> IdMap<K> {
    pub fn new() -> Self {
        Self::with_max_load(DEFAULT_MAX_LOAD_PERCENT)
    }

    /// Creates a map that doubles its bucket array once the entry count
    /// exceeds the given percentage of the bucket count.
    pub fn with_max_load(max_load_percent: usize) -> Self {
        debug_assert!(max_load_percent > 0, "The load threshold must be positive");

        Self {
            buckets: vec![None; INITIAL_BUCKETS],
            entries: Vec::new(),
            free: None,
            size: 0,
            max_load_percent,
        }
    }

    /// The number of live mappings.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts a mapping from the key to the value, using the caller-supplied
    /// hash. Returns the previous value when the key was already mapped, in
    /// which case the mapping is overwritten and the map does not grow.
    pub fn put(&mut self, key: K, hash: u64, value: usize) -> Option<usize> {
        let bucket = self.bucket_of(hash);

        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor {
            let entry = self.filled_mut(index);
            if entry.key == key {
                return Some(std::mem::replace(&mut entry.value, value));
            }
            cursor = entry.next;
        }

        if self.size + 1 > self.buckets.len() * self.max_load_percent / 100 {
            self.grow();
        }
        // Rechaining moved the heads around.
        let bucket = self.bucket_of(hash);

        let entry = IdEntry {
            key,
            hash,
            value,
            next: self.buckets[bucket],
        };

        let index = match self.free {
            Some(index) => {
                self.free = match &self.entries[index] {
                    IdSlot::Free(next) => *next,
                    IdSlot::Filled(_) => unreachable!("The free list contains a filled entry"),
                };
                self.entries[index] = IdSlot::Filled(entry);
                index
            }
            None => {
                self.entries.push(IdSlot::Filled(entry));
                self.entries.len() - 1
            }
        };

        self.buckets[bucket] = Some(index);
        self.size += 1;
        None
    }

    /// Returns the value mapped to the key, if any.
    pub fn get(&self, key: K, hash: u64) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(hash)];
        while let Some(index) = cursor {
            let entry = self.filled(index);
            if entry.key == key {
                return Some(entry.value);
            }
            cursor = entry.next;
        }

        None
    }

    /// Removes the mapping for the key, returning its value. The entry slot
    /// goes to the free list; the bucket array keeps its size.
    pub fn remove(&mut self, key: K, hash: u64) -> Option<usize> {
        let bucket = self.bucket_of(hash);

        let mut previous: Option<usize> = None;
        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor {
            let entry = self.filled(index);
            if entry.key == key {
                let next = entry.next;
                match previous {
                    Some(previous) => self.filled_mut(previous).next = next,
                    None => self.buckets[bucket] = next,
                }

                let removed = std::mem::replace(&mut self.entries[index], IdSlot::Free(self.free));
                self.free = Some(index);
                self.size -= 1;

                match removed {
                    IdSlot::Filled(entry) => return Some(entry.value),
                    IdSlot::Free(_) => unreachable!("The cursor points to a filled entry"),
                }
            }

            previous = Some(index);
            cursor = entry.next;
        }

        None
    }

    fn bucket_of(&self, hash: u64) -> usize {
        debug_assert!(self.buckets.len().is_power_of_two());
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Doubles the bucket array and rechains every live entry. Entry slots,
    /// and therefore the arena, are untouched.
    fn grow(&mut self) {
        let new_len = self.buckets.len() * 2;
        trace!("IdMap: growing to {new_len} buckets at {} entries", self.size);

        self.buckets = vec![None; new_len];
        let mask = new_len - 1;

        for index in 0..self.entries.len() {
            if let IdSlot::Filled(entry) = &self.entries[index] {
                let bucket = (entry.hash as usize) & mask;
                let head = self.buckets[bucket];
                self.filled_mut(index).next = head;
                self.buckets[bucket] = Some(index);
            }
        }
    }

    fn filled(&self, index: usize) -> &IdEntry<K> {
        match &self.entries[index] {
            IdSlot::Filled(entry) => entry,
            IdSlot::Free(_) => panic!("A chain refers to a reclaimed entry"),
        }
    }

    fn filled_mut(&mut self, index: usize) -> &mut IdEntry<K> {
        match &mut self.entries[index] {
            IdSlot::Filled(entry) => entry,
            IdSlot::Free(_) => panic!("A chain refers to a reclaimed entry"),
        }
    }
}

impl<K: Copy + Eq> Default for IdMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for IdMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdMap")
            .field("size", &self.size)
            .field("buckets", &self.buckets.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::Rng;

    use maxterm_utilities::random_test;

    use super::*;

    // The tests hash by key so collisions behave like the production setup,
    // where the hash is derived from the (unique) term address.
    fn hash_of(key: usize) -> u64 {
        (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut map: IdMap<usize> = IdMap::new();

        assert_eq!(map.put(0x1000, hash_of(0x1000), 1), None);
        assert_eq!(map.len(), 1);

        // A second put for the same key returns the old value and does not
        // create a second mapping.
        assert_eq!(map.put(0x1000, hash_of(0x1000), 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(0x1000, hash_of(0x1000)), Some(2));
    }

    #[test]
    fn test_remove_reuses_entries() {
        let mut map: IdMap<usize> = IdMap::new();

        for key in 0..10 {
            map.put(key, hash_of(key), key * 10);
        }

        assert_eq!(map.remove(3, hash_of(3)), Some(30));
        assert_eq!(map.remove(3, hash_of(3)), None);
        assert_eq!(map.len(), 9);

        // The reclaimed slot is reused, the arena does not grow.
        let arena_len = map.entries.len();
        map.put(100, hash_of(100), 1000);
        assert_eq!(map.entries.len(), arena_len);
        assert_eq!(map.get(100, hash_of(100)), Some(1000));
    }

    #[test]
    fn test_growth_keeps_mappings() {
        let mut map: IdMap<usize> = IdMap::with_max_load(75);

        // Enough entries to force several doublings.
        for key in 0..1000 {
            map.put(key, hash_of(key), key + 1);
        }

        assert_eq!(map.len(), 1000);
        assert!(map.buckets.len() > INITIAL_BUCKETS);
        for key in 0..1000 {
            assert_eq!(map.get(key, hash_of(key)), Some(key + 1));
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_random_against_hashmap() {
        random_test(50, |rng| {
            let mut map: IdMap<usize> = IdMap::new();
            let mut reference: HashMap<usize, usize> = HashMap::new();

            for _ in 0..2000 {
                let key = rng.random_range(0..500) * 8;
                match rng.random_range(0..3) {
                    0 => {
                        let value = rng.random_range(0..10000);
                        assert_eq!(map.put(key, hash_of(key), value), reference.insert(key, value));
                    }
                    1 => {
                        assert_eq!(map.get(key, hash_of(key)), reference.get(&key).copied());
                    }
                    _ => {
                        assert_eq!(map.remove(key, hash_of(key)), reference.remove(&key));
                    }
                }

                assert_eq!(map.len(), reference.len());
            }
        });
    }
}
