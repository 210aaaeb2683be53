use std::alloc::handle_alloc_error;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::ops::Deref;
use std::ptr::NonNull;
use std::ptr::addr_eq;
#[cfg(debug_assertions)]
use std::sync::Arc;

use allocator_api2::alloc::Allocator;
use allocator_api2::alloc::Global;
use allocator_api2::alloc::Layout;
use dashmap::DashSet;
use equivalent::Equivalent;

use crate::AllocatorDst;
use crate::SliceDst;

/// A raw pointer into a [StablePointerSet] that allows immutable dereferencing.
/// It stays valid for as long as the element remains in the set, which the
/// borrow checker does not track; the term layer's protection sets do.
///
/// Comparison and hashing use the address, not the pointed-to value. Since the
/// set stores every value once, address equality coincides with value equality.
#[repr(C)]
#[derive(Clone)]
pub struct StablePointer<T: ?Sized> {
    ptr: NonNull<T>,

    /// Debug builds count the handles to each element so that premature
    /// removal is caught.
    #[cfg(debug_assertions)]
    reference_counter: Arc<()>,
}

impl<T: ?Sized> StablePointer<T> {
    /// True when no handle other than this one and the set's own entry exists.
    fn is_last_reference(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            Arc::strong_count(&self.reference_counter) == 2
        }
        #[cfg(not(debug_assertions))]
        {
            true
        }
    }

    /// Wraps a raw pointer.
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid T that outlives the StablePointer.
    pub unsafe fn from_ptr(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            #[cfg(debug_assertions)]
            reference_counter: Arc::new(()),
        }
    }

    /// The underlying pointer.
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Returns another handle to the same element.
    pub fn copy(&self) -> Self {
        Self {
            ptr: self.ptr,
            #[cfg(debug_assertions)]
            reference_counter: self.reference_counter.clone(),
        }
    }

    fn from_entry(entry: &Entry<T>) -> Self {
        Self {
            ptr: entry.ptr,
            #[cfg(debug_assertions)]
            reference_counter: entry.reference_counter.clone(),
        }
    }
}

impl<T: ?Sized> PartialEq for StablePointer<T> {
    fn eq(&self, other: &Self) -> bool {
        addr_eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

impl<T: ?Sized> Eq for StablePointer<T> {}

impl<T: ?Sized> Ord for StablePointer<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ptr.as_ptr().cast::<()>().cmp(&(other.ptr.as_ptr().cast::<()>()))
    }
}

impl<T: ?Sized> PartialOrd for StablePointer<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Hash for StablePointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

unsafe impl<T: ?Sized + Send> Send for StablePointer<T> {}
unsafe impl<T: ?Sized + Sync> Sync for StablePointer<T> {}

impl<T: ?Sized> Deref for StablePointer<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Valid as long as the element remains in its set.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: fmt::Debug + ?Sized> fmt::Debug for StablePointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StablePointer").field(&self.ptr).finish()
    }
}

/// A concurrent set whose elements live at stable addresses for their entire
/// membership. This is the mechanics behind hash consing: `insert` of an
/// already present value returns the pointer of the existing element, so one
/// cell exists per distinct value and pointer comparison decides equality.
///
/// Elements are placed through the given allocator, which lets the term layer
/// back fixed-size cells by the slab allocator. The index over the elements is
/// a sharded hash set, making check-then-insert atomic per shard.
pub struct StablePointerSet<T: ?Sized, S = RandomState, A = Global>
where
    T: Hash + Eq + SliceDst,
    S: BuildHasher + Clone,
    A: Allocator + AllocatorDst,
{
    index: DashSet<Entry<T>, S>,

    allocator: A,
}

impl<T: ?Sized> Default for StablePointerSet<T, RandomState, Global>
where
    T: Hash + Eq + SliceDst,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> StablePointerSet<T, RandomState, Global>
where
    T: Hash + Eq + SliceDst,
{
    /// An empty set with the default hasher and the global allocator.
    pub fn new() -> Self {
        Self {
            index: DashSet::default(),
            allocator: Global,
        }
    }

    /// An empty set with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: DashSet::with_capacity_and_hasher(capacity, RandomState::new()),
            allocator: Global,
        }
    }
}

impl<T: ?Sized, S> StablePointerSet<T, S, Global>
where
    T: Hash + Eq + SliceDst,
    S: BuildHasher + Clone,
{
    /// An empty set with the given hasher and the global allocator.
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            index: DashSet::with_hasher(hasher),
            allocator: Global,
        }
    }
}

impl<T: ?Sized, S, A> StablePointerSet<T, S, A>
where
    T: Hash + Eq + SliceDst,
    S: BuildHasher + Clone,
    A: Allocator + AllocatorDst,
{
    /// An empty set placing its elements through the given allocator.
    pub fn new_in(allocator: A) -> Self
    where
        S: Default,
    {
        Self {
            index: DashSet::with_hasher(S::default()),
            allocator,
        }
    }

    /// An empty set with the given hasher and allocator.
    pub fn with_hasher_in(hasher: S, allocator: A) -> Self {
        Self {
            index: DashSet::with_hasher(hasher),
            allocator,
        }
    }

    /// The number of elements in the set.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    /// Interns the value described by `value`, constructing a `T` from it only
    /// when no equivalent element is present. Returns the stable pointer and
    /// whether a new element was created.
    pub fn insert_equiv<'a, Q>(&self, value: &'a Q) -> (StablePointer<T>, bool)
    where
        Q: Hash + Equivalent<T>,
        T: From<&'a Q>,
    {
        debug_assert!(std::mem::size_of::<T>() > 0, "Zero-sized types are not supported");

        if let Some(ptr) = self.get(value) {
            return (ptr, false);
        }

        let layout = Layout::new::<T>();
        let ptr = self.allocator.allocate(layout).expect("Allocation failed").cast::<T>();

        unsafe {
            ptr.as_ptr().write(value.into());
        }

        let entry = Entry::new(ptr);
        let result = StablePointer::from_entry(&entry);

        let inserted = self.index.insert(entry);
        if !inserted {
            // Lost the race against another thread interning the same value.
            let entry = Entry::new(ptr);
            let element = self
                .index
                .get(&entry)
                .expect("Insertion failed, so an equivalent entry must be present");
            return (StablePointer::from_entry(&element), false);
        }

        (result, true)
    }

    /// Returns true if the set contains a value equivalent to `value`.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Eq + Hash,
        Q: ?Sized + Hash + Equivalent<T>,
    {
        self.get(value).is_some()
    }

    /// Returns the stable pointer of the element equivalent to `value`, if
    /// present.
    pub fn get<Q>(&self, value: &Q) -> Option<StablePointer<T>>
    where
        T: Eq + Hash,
        Q: ?Sized + Hash + Equivalent<T>,
    {
        let entry = self.index.get(&Query(value))?;
        Some(StablePointer::from_entry(entry.key()))
    }

    /// Iterates over the elements of the set.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.index.iter().map(|entry| unsafe { entry.ptr.as_ref() })
    }

    /// Removes the element behind the given pointer, which must be the last
    /// handle to it. Returns true if the element was present.
    pub fn remove(&self, pointer: StablePointer<T>) -> bool {
        debug_assert!(
            pointer.is_last_reference(),
            "The pointer must be the last handle to the element"
        );

        let value = pointer.deref();
        let removed = self.index.remove(&Query(value));

        if let Some(entry) = removed {
            unsafe {
                self.drop_and_deallocate_entry(entry.ptr);
            }
            true
        } else {
            false
        }
    }

    /// Keeps only the elements for which the predicate returns true. This is
    /// the sweep primitive of the garbage collector.
    ///
    /// Pointers to removed elements become dangling; the caller must have
    /// established that no live handle refers to them.
    pub fn retain<F>(&self, mut predicate: F)
    where
        F: FnMut(&StablePointer<T>) -> bool,
    {
        self.index.retain(|entry| {
            let ptr = StablePointer::from_entry(entry);

            if !predicate(&ptr) {
                // A sweep removes whole unreachable subgraphs at once, so
                // entries other than the last handle may still exist between
                // the elements being removed here.
                unsafe {
                    self.drop_and_deallocate_entry(ptr.ptr);
                }
                return false;
            }

            true
        });
    }

    /// Drops the element behind `ptr` and returns its cell to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live element of this set's allocator.
    unsafe fn drop_and_deallocate_entry(&self, ptr: NonNull<T>) {
        let length = unsafe { T::length(ptr.as_ref()) };
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr());
        }
        self.allocator.deallocate_slice_dst(ptr, length);
    }
}

impl<T: ?Sized + SliceDst, S, A> StablePointerSet<T, S, A>
where
    T: Hash + Eq,
    S: BuildHasher + Clone,
    A: Allocator + AllocatorDst + Sync,
{
    /// Interns a dynamically sized value. `construct` receives uninitialised
    /// memory laid out for `length` tail elements and the lookup key, and runs
    /// only when no equivalent element exists yet.
    ///
    /// # Safety
    ///
    /// `construct` must fully initialise the value at the given pointer.
    pub unsafe fn insert_equiv_dst<'a, Q, C>(
        &self,
        value: &'a Q,
        length: usize,
        construct: C,
    ) -> (StablePointer<T>, bool)
    where
        Q: Hash + Equivalent<T>,
        C: Fn(*mut T, &'a Q),
    {
        if let Some(ptr) = self.get(value) {
            return (ptr, false);
        }

        let mut ptr = self
            .allocator
            .allocate_slice_dst::<T>(length)
            .unwrap_or_else(|_| handle_alloc_error(Layout::new::<()>()));

        unsafe {
            construct(ptr.as_mut(), value);
        }

        loop {
            let entry = Entry::new(ptr);
            let ptr = StablePointer::from_entry(&entry);

            let inserted = self.index.insert(entry);
            if !inserted {
                // Another thread may have interned the same value between our
                // lookup and the insertion; discard our cell and return the
                // winner. When the winner has disappeared again in the
                // meantime, retry the insertion.
                if let Some(existing_ptr) = self.get(value) {
                    unsafe {
                        self.drop_and_deallocate_entry(ptr.ptr);
                    }

                    return (existing_ptr, false);
                }
            } else {
                return (ptr, true);
            }
        }
    }

    /// Removes all elements, invalidating every outstanding pointer.
    pub fn clear(&self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            self.index.iter().all(|x| Arc::strong_count(&x.reference_counter) == 1),
            "No outstanding handles may exist when clearing"
        );

        for entry in self.index.iter() {
            unsafe {
                self.drop_and_deallocate_entry(entry.ptr);
            }
        }

        self.index.clear();
    }
}

impl<T, S, A> StablePointerSet<T, S, A>
where
    T: Hash + Eq + SliceDst,
    S: BuildHasher + Clone,
    A: Allocator + AllocatorDst,
{
    /// Interns a sized value. Returns the stable pointer of the element and
    /// whether it was newly created.
    pub fn insert(&self, value: T) -> (StablePointer<T>, bool) {
        debug_assert!(std::mem::size_of::<T>() > 0, "Zero-sized types are not supported");

        if let Some(ptr) = self.get(&value) {
            return (ptr, false);
        }

        let ptr = self
            .allocator
            .allocate(Layout::new::<T>())
            .unwrap_or_else(|_| handle_alloc_error(Layout::new::<T>()))
            .cast::<T>();

        unsafe {
            ptr.write(value);
        }

        let entry = Entry::new(ptr);
        let ptr = StablePointer::from_entry(&entry);

        let inserted = self.index.insert(entry);
        debug_assert!(inserted, "The value was checked to be absent");

        (ptr, true)
    }
}

impl<T: ?Sized, S, A> Drop for StablePointerSet<T, S, A>
where
    T: Hash + Eq + SliceDst,
    S: BuildHasher + Clone,
    A: Allocator + AllocatorDst,
{
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            self.index.iter().all(|x| Arc::strong_count(&x.reference_counter) == 1),
            "No outstanding handles may exist when dropping the set"
        );

        for entry in self.index.iter() {
            unsafe {
                self.drop_and_deallocate_entry(entry.ptr);
            }
        }
    }
}

/// The index representation of one element: a pointer into the allocator's
/// storage that hashes and compares through the pointed-to value.
struct Entry<T: ?Sized> {
    ptr: NonNull<T>,

    #[cfg(debug_assertions)]
    reference_counter: Arc<()>,
}

unsafe impl<T: ?Sized + Send> Send for Entry<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Entry<T> {}

impl<T: ?Sized> Entry<T> {
    fn new(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            #[cfg(debug_assertions)]
            reference_counter: Arc::new(()),
        }
    }
}

impl<T: ?Sized> Deref for Entry<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Valid as long as the entry exists.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: PartialEq + ?Sized> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq + ?Sized> Eq for Entry<T> {}

impl<T: Hash + ?Sized> Hash for Entry<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}

/// Lets borrowed keys find entries without constructing a `T`.
#[derive(Hash, PartialEq, Eq)]
struct Query<'a, T: ?Sized>(&'a T);

impl<T: ?Sized, Q: ?Sized> Equivalent<Entry<T>> for Query<'_, Q>
where
    Q: Equivalent<T>,
{
    fn equivalent(&self, other: &Entry<T>) -> bool {
        self.0.equivalent(&**other)
    }
}

#[cfg(test)]
mod tests {
    use std::hash::BuildHasherDefault;

    use rustc_hash::FxHasher;

    use crate::AllocBlock;

    use super::*;

    #[test]
    fn test_insert_and_get() {
        let set = StablePointerSet::new();

        let (ptr1, inserted) = set.insert(42);
        assert!(inserted);
        assert_eq!(*ptr1, 42);

        // A second insertion of the same value yields the same cell.
        let (ptr2, inserted) = set.insert(42);
        assert!(!inserted);
        assert_eq!(ptr1, ptr2);

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_contains_and_get() {
        let set = StablePointerSet::new();
        set.insert(42);
        set.insert(100);

        assert!(set.contains(&42));
        assert!(set.contains(&100));
        assert!(!set.contains(&200));

        let ptr = set.get(&42).expect("Value should exist");
        assert_eq!(*ptr, 42);
        assert!(set.get(&200).is_none());
    }

    #[test]
    fn test_iteration() {
        let set = StablePointerSet::new();
        set.insert(1);
        set.insert(2);
        set.insert(3);

        let mut values: Vec<i32> = set.iter().copied().collect();
        values.sort();

        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_equiv() {
        #[derive(PartialEq, Eq, Debug)]
        struct Named {
            id: i32,
            name: String,
        }

        impl From<&i32> for Named {
            fn from(id: &i32) -> Self {
                Named {
                    id: *id,
                    name: format!("value-{id}"),
                }
            }
        }

        impl Hash for Named {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl Equivalent<Named> for i32 {
            fn equivalent(&self, key: &Named) -> bool {
                *self == key.id
            }
        }

        let set: StablePointerSet<Named> = StablePointerSet::new();

        let (ptr1, inserted) = set.insert_equiv(&42);
        assert!(inserted);
        assert_eq!(ptr1.name, "value-42");

        // The construction is skipped the second time.
        let (ptr2, inserted) = set.insert_equiv(&42);
        assert!(!inserted);
        assert_eq!(ptr1, ptr2);

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove() {
        let set = StablePointerSet::new();

        let (ptr1, _) = set.insert(42);
        let (ptr2, _) = set.insert(100);
        assert_eq!(set.len(), 2);

        assert!(set.remove(ptr1));
        assert_eq!(set.len(), 1);

        assert!(set.remove(ptr2));
        assert!(set.is_empty());
    }

    #[test]
    fn test_retain() {
        let set = StablePointerSet::new();

        set.insert(1);
        let (ptr2, _) = set.insert(2);
        set.insert(3);
        let (ptr4, _) = set.insert(4);

        set.retain(|x| **x % 2 == 0);

        assert_eq!(set.len(), 2);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(!set.contains(&3));
        assert!(set.contains(&4));

        assert!(set.remove(ptr2));
        assert!(set.remove(ptr4));
    }

    #[test]
    fn test_slab_backed_set() {
        // The combination used for integer term cells: fixed-size elements
        // drawn from the slab allocator.
        let set: StablePointerSet<u64, BuildHasherDefault<FxHasher>, AllocBlock<u64, 64>> =
            StablePointerSet::new_in(AllocBlock::new());

        let (ptr1, inserted) = set.insert(7);
        assert!(inserted);
        let (ptr2, inserted) = set.insert(7);
        assert!(!inserted);
        assert_eq!(ptr1, ptr2);

        let (_ptr3, inserted) = set.insert(8);
        assert!(inserted);
        assert_eq!(set.len(), 2);
    }
}
