use std::hash::Hash;
use std::hash::Hasher;
use std::ptr::NonNull;

use rustc_hash::FxBuildHasher;

use maxterm_unsafety::AllocBlock;
use maxterm_unsafety::SliceDst;
use maxterm_unsafety::StablePointer;
use maxterm_unsafety::StablePointerSet;

use crate::ATermIndex;
use crate::SymbolIndex;
use crate::SymbolRef;
use crate::storage::SharedTerm;
use crate::storage::SharedTermLookup;
use crate::storage::TermKind;
use crate::storage::shared_term::TermSlot;

/// The sized mirror of a [SharedTerm] integer cell. Integer cells always have
/// exactly one slot, which lets them live in a slab allocator instead of the
/// general heap.
///
/// Must have the same layout as a single-slot [SharedTerm].
#[repr(C)]
pub(crate) struct SharedTermInt {
    symbol: SymbolRef<'static>,
    kind: TermKind,
    slots: [TermSlot; 1],
}

impl SharedTermInt {
    pub(crate) fn new(symbol: &SymbolIndex, value: usize) -> SharedTermInt {
        SharedTermInt {
            symbol: unsafe { SymbolRef::from_index(symbol) },
            kind: TermKind::Integer,
            slots: [TermSlot::from_value(value)],
        }
    }

    fn value(&self) -> usize {
        // Integer cells store a plain value in their only slot.
        unsafe { self.slots[0].value() }
    }

    /// Reattaches the slice metadata, yielding a pointer that is
    /// interchangeable with the cells of the general term table.
    pub(crate) fn as_term_index(ptr: &StablePointer<SharedTermInt>) -> ATermIndex {
        let slice = NonNull::slice_from_raw_parts(ptr.ptr().cast::<()>(), 1);
        unsafe { StablePointer::from_ptr(<SharedTerm as SliceDst>::retype(slice)) }
    }
}

impl PartialEq for SharedTermInt {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.value() == other.value()
    }
}

impl Eq for SharedTermInt {}

impl Hash for SharedTermInt {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.value().hash(state);
    }
}

/// The unique tables behind the term pool: one table of variable-length cells
/// for applications and lists, and a slab-backed table for integer cells.
pub(crate) struct TermStorage {
    terms: StablePointerSet<SharedTerm, FxBuildHasher>,

    int_terms: StablePointerSet<SharedTermInt, FxBuildHasher, AllocBlock<SharedTermInt, 1024>>,
}

impl TermStorage {
    pub fn new() -> Self {
        Self {
            terms: StablePointerSet::with_hasher(FxBuildHasher),
            int_terms: StablePointerSet::with_hasher_in(FxBuildHasher, AllocBlock::new()),
        }
    }

    /// Returns the number of stored terms.
    pub fn len(&self) -> usize {
        self.terms.len() + self.int_terms.len()
    }

    /// Interns the cell described by the lookup. Returns its address and
    /// whether a new cell was created.
    pub fn insert(&self, lookup: &SharedTermLookup) -> (ATermIndex, bool) {
        debug_assert!(
            lookup.kind != TermKind::Integer,
            "Integer cells go through insert_int"
        );

        unsafe {
            self.terms
                .insert_equiv_dst(lookup, SharedTerm::length_for(lookup), |ptr, key| {
                    SharedTerm::construct(ptr, key)
                })
        }
    }

    /// Interns an integer cell in the slab-backed table.
    pub fn insert_int(&self, symbol: &SymbolIndex, value: usize) -> (ATermIndex, bool) {
        let (index, inserted) = self.int_terms.insert(SharedTermInt::new(symbol, value));
        (SharedTermInt::as_term_index(&index), inserted)
    }

    /// Keeps only the cells for which the predicate returns true, in both
    /// tables. The sweep phase of the garbage collector.
    pub fn retain<F>(&self, mut f: F)
    where
        F: FnMut(&ATermIndex) -> bool,
    {
        self.terms.retain(|term| f(term));
        self.int_terms.retain(|cell| f(&SharedTermInt::as_term_index(cell)));
    }
}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use crate::ATermInt;
    use crate::Term;

    #[test]
    fn test_int_slab_sharing() {
        test_logger();

        let one = ATermInt::new(54321);
        let other = ATermInt::new(54321);
        let different = ATermInt::new(54322);

        assert_eq!(one.shared(), other.shared(), "Equal values share one slab cell");
        assert_ne!(one.shared(), different.shared());
        assert_eq!(one.value(), 54321);
    }
}
