use std::alloc::Layout;
use std::alloc::LayoutError;
use std::fmt;
use std::hash::Hash;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use equivalent::Equivalent;

use maxterm_unsafety::SliceDst;
use maxterm_unsafety::repr_c;

use crate::ATermRef;
use crate::Symb;
use crate::SymbolRef;
use crate::Term;

/// Discriminates the four cell shapes of the term pool. Stored in every cell
/// header so that clients can branch on the shape in O(1) without comparing
/// against the reserved symbols.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// A function application `f(t1, ..., tn)`, including constants.
    Application,
    /// A term storing a single machine integer.
    Integer,
    /// A list cons cell with a head term and a tail list.
    ListCons,
    /// The empty list.
    ListEmpty,
}

/// One slot of a term cell: an argument term for applications and cons cells,
/// the raw value for integer terms.
#[repr(C)]
pub union TermSlot {
    term: ManuallyDrop<ATermRef<'static>>,
    value: usize,
}

impl TermSlot {
    pub(crate) fn from_value(value: usize) -> TermSlot {
        TermSlot { value }
    }

    /// # Safety
    ///
    /// The slot must belong to an integer cell.
    pub(crate) unsafe fn value(&self) -> usize {
        unsafe { self.value }
    }
}

/// The cell type of the term pool: the unit of maximal sharing.
///
/// # Details
///
/// Uses a C representation and a trailing slot array so that a cell occupies
/// exactly a header plus one word per argument, without the length and
/// capacity of a separate vector. The slot count follows from the header:
/// the symbol arity for applications and cons cells, one for integers, zero
/// for the empty list.
#[repr(C)]
pub struct SharedTerm {
    symbol: SymbolRef<'static>,
    kind: TermKind,
    slots: [TermSlot],
}

impl SharedTerm {
    /// The head symbol of the cell.
    pub fn symbol(&self) -> &SymbolRef<'static> {
        &self.symbol
    }

    /// The shape of the cell.
    pub fn kind(&self) -> TermKind {
        self.kind
    }

    /// The argument terms. Empty for integer cells and the empty list.
    pub fn arguments(&self) -> &[ATermRef<'static>] {
        match self.kind {
            TermKind::Integer => &[],
            // The slot array stores exactly the arguments for every other kind.
            _ => unsafe { std::mem::transmute::<&[TermSlot], &[ATermRef<'static>]>(&self.slots) },
        }
    }

    /// The stored value for integer cells, None otherwise.
    pub fn int_value(&self) -> Option<usize> {
        match self.kind {
            TermKind::Integer => Some(unsafe { self.slots[0].value }),
            _ => None,
        }
    }

    /// The slot count for a cell described by `lookup`.
    pub(crate) fn length_for(lookup: &SharedTermLookup) -> usize {
        match lookup.payload {
            LookupPayload::Arguments(arguments) => arguments.len(),
            LookupPayload::Value(_) => 1,
        }
    }

    /// Initialises the uninitialised cell at `ptr` from a lookup key.
    ///
    /// # Safety
    ///
    /// `ptr` must point to memory laid out by [SliceDst::layout_for] with
    /// `length_for(lookup)` slots.
    pub(crate) unsafe fn construct(ptr: *mut SharedTerm, lookup: &SharedTermLookup) {
        let (kind_offset, slots_offset) = Self::offsets(SharedTerm::length_for(lookup));

        unsafe {
            ptr.cast::<SymbolRef<'static>>()
                .write(SymbolRef::from_index(lookup.symbol.shared()));
            ptr.byte_add(kind_offset).cast::<TermKind>().write(lookup.kind);

            let slots = ptr.byte_add(slots_offset).cast::<TermSlot>();
            match lookup.payload {
                LookupPayload::Arguments(arguments) => {
                    for (index, argument) in arguments.iter().enumerate() {
                        slots.add(index).write(TermSlot {
                            term: ManuallyDrop::new(ATermRef::from_index(argument.shared())),
                        });
                    }
                }
                LookupPayload::Value(value) => {
                    slots.write(TermSlot { value });
                }
            }
        }
    }

    /// Field offsets of the kind byte and the slot array.
    fn offsets(length: usize) -> (usize, usize) {
        let header = Layout::new::<SymbolRef<'static>>();
        let (header, kind_offset) = header
            .extend(Layout::new::<TermKind>())
            .expect("The cell layout must fit in isize");
        let (_, slots_offset) = header
            .extend(Layout::array::<TermSlot>(length).expect("The cell layout must fit in isize"))
            .expect("The cell layout must fit in isize");

        (kind_offset, slots_offset)
    }
}

impl Drop for SharedTerm {
    fn drop(&mut self) {
        // Integer cells store a plain value; every other slot holds a term
        // reference whose handle must be released.
        if self.kind != TermKind::Integer {
            for slot in &mut self.slots {
                unsafe {
                    ManuallyDrop::drop(&mut slot.term);
                }
            }
        }
    }
}

unsafe impl SliceDst for SharedTerm {
    fn layout_for(length: usize) -> Result<Layout, LayoutError> {
        repr_c(&[
            Layout::new::<SymbolRef<'static>>(),
            Layout::new::<TermKind>(),
            Layout::array::<TermSlot>(length)?,
        ])
    }

    fn retype(ptr: NonNull<[()]>) -> NonNull<Self> {
        unsafe { NonNull::new_unchecked(ptr.as_ptr() as *mut _) }
    }

    fn length(&self) -> usize {
        match self.kind {
            TermKind::Integer => 1,
            _ => self.symbol.arity(),
        }
    }
}

impl PartialEq for SharedTerm {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.kind == other.kind
            && self.arguments() == other.arguments()
            && self.int_value() == other.int_value()
    }
}

impl Eq for SharedTerm {}

impl Hash for SharedTerm {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.kind.hash(state);
        match self.kind {
            TermKind::Integer => self.int_value().hash(state),
            _ => self.arguments().hash(state),
        }
    }
}

impl fmt::Debug for SharedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SharedTerm {{ symbol: {:?}, kind: {:?}, arguments: {:?}, value: {:?} }}",
            self.symbol,
            self.kind,
            self.arguments(),
            self.int_value()
        )
    }
}

/// A borrowed description of a term cell, used to look terms up in the pool
/// without allocating a cell first.
pub(crate) struct SharedTermLookup<'a> {
    pub(crate) symbol: SymbolRef<'a>,
    pub(crate) kind: TermKind,
    pub(crate) payload: LookupPayload<'a>,
}

pub(crate) enum LookupPayload<'a> {
    Arguments(&'a [ATermRef<'a>]),
    Value(usize),
}

impl Equivalent<SharedTerm> for SharedTermLookup<'_> {
    fn equivalent(&self, other: &SharedTerm) -> bool {
        if self.symbol != *other.symbol() || self.kind != other.kind() {
            return false;
        }

        match self.payload {
            LookupPayload::Arguments(arguments) => arguments == other.arguments(),
            LookupPayload::Value(value) => other.int_value() == Some(value),
        }
    }
}

/// Must hash exactly like [SharedTerm].
impl Hash for SharedTermLookup<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.kind.hash(state);
        match self.payload {
            LookupPayload::Value(value) => Some(value).hash(state),
            LookupPayload::Arguments(arguments) => arguments.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use allocator_api2::alloc::Global;

    use maxterm_unsafety::AllocatorDst;
    use maxterm_utilities::test_logger;

    use crate::ATerm;
    use crate::Symbol;
    use crate::Term;

    use super::*;

    #[test]
    fn test_cell_construction() {
        test_logger();

        let symbol = Symbol::new("shared_term_pair", 2);
        let argument = ATerm::constant(&Symbol::new("shared_term_b", 0));

        let lookup = SharedTermLookup {
            symbol: symbol.copy(),
            kind: TermKind::Application,
            payload: LookupPayload::Arguments(&[argument.copy(), argument.copy()]),
        };

        let ptr = Global
            .allocate_slice_dst::<SharedTerm>(2)
            .expect("A two-slot cell fits in memory");

        unsafe {
            SharedTerm::construct(ptr.as_ptr(), &lookup);

            assert_eq!(*ptr.as_ref().symbol(), symbol.copy());
            assert_eq!(ptr.as_ref().kind(), TermKind::Application);
            assert_eq!(ptr.as_ref().arguments().len(), 2);
            assert_eq!(ptr.as_ref().arguments()[0], argument.copy());
            assert_eq!(ptr.as_ref().int_value(), None);

            assert!(
                lookup.equivalent(ptr.as_ref()),
                "A cell must be equivalent to the lookup it was built from"
            );

            std::ptr::drop_in_place(ptr.as_ptr());
        }

        Global.deallocate_slice_dst(ptr, 2);
    }
}
