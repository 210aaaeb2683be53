use std::borrow::Borrow;
use std::cell::UnsafeCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::sync::Arc;

use delegate::delegate;

use maxterm_collections::ProtectionIndex;
use maxterm_unsafety::StablePointer;
use maxterm_utilities::PhantomUnsend;
use maxterm_utilities::TermStoreError;

use crate::Markable;
use crate::Symb;
use crate::SymbolRef;
use crate::storage::Marker;
use crate::storage::SharedTerm;
use crate::storage::SharedTermProtection;
use crate::storage::THREAD_TERM_POOL;
use crate::storage::TermKind;

/// The public interface of a first-order term, implemented by the owned
/// [ATerm], the borrowed [ATermRef] and the typed wrappers.
///
/// Borrow-returning methods tie their result to the `&self` borrow; the
/// borrowed handle types additionally provide inherent versions returning
/// their full reference lifetime.
pub trait Term {
    /// Protects the term from garbage collection.
    fn protect(&self) -> ATerm;

    /// Creates another reference to the same shared term.
    fn copy(&self) -> ATermRef<'_>;

    /// The argument at the given position.
    fn arg(&self, index: usize) -> ATermRef<'_>;

    /// Iterates over the arguments of the term.
    fn arguments(&self) -> ATermArgs<'_>;

    /// The head symbol of the term.
    fn head_symbol(&self) -> SymbolRef<'_>;

    /// Iterates over all subterms in preorder, the term itself included.
    fn subterms(&self) -> TermIterator<'_>;

    /// The shape of the term cell.
    fn kind(&self) -> TermKind;

    /// The stored value for integer terms, None otherwise.
    fn int_value(&self) -> Option<usize>;

    /// The address of the term cell, unique among live terms.
    fn index(&self) -> usize;

    /// The underlying pointer into the term pool.
    fn shared(&self) -> &ATermIndex;
}

/// The pointer type referring into the term pool.
pub type ATermIndex = StablePointer<SharedTerm>;

/// A lifetime-bound reference to a term in the term pool.
#[derive(Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ATermRef<'a> {
    shared: ATermIndex,
    marker: PhantomData<&'a ()>,
}

/// In release builds a term reference is a pointer plus the slot count
/// carried in the pointer metadata.
#[cfg(not(debug_assertions))]
const _: () = assert!(std::mem::size_of::<ATermRef<'static>>() == 2 * std::mem::size_of::<usize>());

/// Terms are immutable and garbage collection only runs with exclusive access
/// to the pool, so references can move between threads freely.
unsafe impl Send for ATermRef<'_> {}
unsafe impl Sync for ATermRef<'_> {}

impl<'a> ATermRef<'a> {
    /// Wraps a pointer into the term pool.
    ///
    /// # Safety
    ///
    /// The term must remain protected for the lifetime 'a.
    pub unsafe fn from_index(shared: &ATermIndex) -> ATermRef<'a> {
        ATermRef {
            shared: shared.copy(),
            marker: PhantomData,
        }
    }

    /// Creates another reference to the same shared term.
    pub fn copy(&self) -> ATermRef<'a> {
        unsafe { ATermRef::from_index(&self.shared) }
    }

    /// The argument at the given position, with the full reference lifetime.
    pub fn arg(&self, index: usize) -> ATermRef<'a> {
        debug_assert!(
            index < self.shared.arguments().len(),
            "arg({index}) is not defined for term {self:?}"
        );

        self.shared.arguments()[index].copy()
    }

    /// Iterates over the arguments of the term.
    pub fn arguments(&self) -> ATermArgs<'a> {
        ATermArgs::new(self.copy())
    }

    /// The head symbol of the term.
    pub fn head_symbol(&self) -> SymbolRef<'a> {
        self.shared.symbol().copy()
    }

    /// Iterates over all subterms in preorder.
    pub fn subterms(&self) -> TermIterator<'a> {
        TermIterator::new(self.copy())
    }

    /// The shape of the term cell.
    pub fn kind(&self) -> TermKind {
        self.shared.kind()
    }

    /// The stored value for integer terms.
    pub fn int_value(&self) -> Option<usize> {
        self.shared.int_value()
    }
}

impl Term for ATermRef<'_> {
    fn protect(&self) -> ATerm {
        THREAD_TERM_POOL.with_borrow(|tp| tp.protect(self))
    }

    fn copy(&self) -> ATermRef<'_> {
        ATermRef::copy(self)
    }

    fn arg(&self, index: usize) -> ATermRef<'_> {
        ATermRef::arg(self, index)
    }

    fn arguments(&self) -> ATermArgs<'_> {
        ATermRef::arguments(self)
    }

    fn head_symbol(&self) -> SymbolRef<'_> {
        ATermRef::head_symbol(self)
    }

    fn subterms(&self) -> TermIterator<'_> {
        ATermRef::subterms(self)
    }

    fn kind(&self) -> TermKind {
        ATermRef::kind(self)
    }

    fn int_value(&self) -> Option<usize> {
        ATermRef::int_value(self)
    }

    fn index(&self) -> usize {
        self.shared.ptr().as_ptr() as *const u8 as usize
    }

    fn shared(&self) -> &ATermIndex {
        &self.shared
    }
}

impl Markable for ATermRef<'_> {
    fn mark(&self, marker: &mut Marker) {
        marker.mark(self);
    }

    fn contains_term(&self, term: &ATermRef<'_>) -> bool {
        term == self
    }

    fn contains_symbol(&self, symbol: &SymbolRef<'_>) -> bool {
        self.head_symbol() == *symbol
    }

    fn len(&self) -> usize {
        1
    }
}

impl fmt::Display for ATermRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Debug for ATermRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TermKind::Integer => {
                write!(f, "{}", self.int_value().expect("An integer term stores a value"))
            }
            TermKind::ListEmpty | TermKind::ListCons => {
                write!(f, "[")?;

                let mut cursor = self.shared.copy();
                let mut first = true;
                while cursor.kind() == TermKind::ListCons {
                    if !first {
                        write!(f, ",")?;
                    }
                    write!(f, "{:?}", cursor.arguments()[0])?;

                    let tail = cursor.arguments()[1].shared().copy();
                    cursor = tail;
                    first = false;
                }

                write!(f, "]")
            }
            TermKind::Application => {
                write!(f, "{}", self.head_symbol())?;

                if !self.shared.arguments().is_empty() {
                    write!(f, "(")?;
                    let mut args = self.arguments().peekable();
                    while let Some(arg) = args.next() {
                        write!(f, "{arg:?}")?;
                        if args.peek().is_some() {
                            write!(f, ", ")?;
                        }
                    }
                    write!(f, ")")?;
                }

                Ok(())
            }
        }
    }
}

/// The protected variant of [ATermRef].
///
/// # Safety
///
/// Protection goes through thread-local state, so [ATerm] is not [Send].
/// This also means terms must not be stored in thread-local storage
/// themselves: the destruction order of thread locals is unspecified, and the
/// protection set may be gone when such a term is dropped. Wrap thread-local
/// terms in `ManuallyDrop` when this comes up; the protection sets of an
/// exiting thread are deregistered as a whole anyway.
pub struct ATerm {
    term: ATermRef<'static>,

    /// The slot guarding this term in the thread's protection set.
    root: ProtectionIndex,

    _unsend: PhantomUnsend,
}

impl ATerm {
    /// Creates the term `symbol(args...)`.
    pub fn with_args(symbol: &impl Symb, args: &[impl Term]) -> ATerm {
        THREAD_TERM_POOL.with_borrow(|tp| tp.create_term(symbol, args))
    }

    /// Creates the term with the arguments produced by the iterator.
    pub fn with_iter<I, T>(symbol: &impl Symb, args: I) -> ATerm
    where
        I: IntoIterator<Item = T>,
        T: Term,
    {
        THREAD_TERM_POOL.with_borrow(|tp| tp.create_term_iter(symbol, args))
    }

    /// Creates the term with the arguments produced by the fallible iterator.
    pub fn try_with_iter<I, T>(symbol: &impl Symb, args: I) -> Result<ATerm, TermStoreError>
    where
        I: IntoIterator<Item = Result<T, TermStoreError>>,
        T: Term,
    {
        THREAD_TERM_POOL.with_borrow(|tp| tp.try_create_term_iter(symbol, args))
    }

    /// Creates the constant term for a symbol of arity zero.
    pub fn constant(symbol: &SymbolRef<'_>) -> ATerm {
        THREAD_TERM_POOL.with_borrow(|tp| tp.create_constant(symbol))
    }

    /// Borrows the underlying term reference.
    pub fn get(&self) -> ATermRef<'_> {
        self.term.copy()
    }

    /// The slot of this term in the thread's protection set.
    pub fn root(&self) -> ProtectionIndex {
        self.root
    }

    /// Wraps a pointer and the protection set slot that guards it.
    pub(crate) fn from_index(term: &ATermIndex, root: ProtectionIndex) -> ATerm {
        ATerm {
            term: unsafe { ATermRef::from_index(term) },
            root,
            _unsend: PhantomData,
        }
    }
}

impl Term for ATerm {
    delegate! {
        to self.term {
            fn protect(&self) -> ATerm;
            fn copy(&self) -> ATermRef<'_>;
            fn arg(&self, index: usize) -> ATermRef<'_>;
            fn arguments(&self) -> ATermArgs<'_>;
            fn head_symbol(&self) -> SymbolRef<'_>;
            fn subterms(&self) -> TermIterator<'_>;
            fn kind(&self) -> TermKind;
            fn int_value(&self) -> Option<usize>;
            fn index(&self) -> usize;
            fn shared(&self) -> &ATermIndex;
        }
    }
}

impl Markable for ATerm {
    fn mark(&self, marker: &mut Marker) {
        marker.mark(&self.term);
    }

    fn contains_term(&self, term: &ATermRef<'_>) -> bool {
        *term == self.term
    }

    fn contains_symbol(&self, symbol: &SymbolRef<'_>) -> bool {
        self.term.head_symbol() == *symbol
    }

    fn len(&self) -> usize {
        1
    }
}

impl Drop for ATerm {
    fn drop(&mut self) {
        THREAD_TERM_POOL.with_borrow(|tp| tp.drop(self))
    }
}

impl Clone for ATerm {
    fn clone(&self) -> Self {
        self.term.protect()
    }
}

impl Borrow<ATermRef<'static>> for ATerm {
    fn borrow(&self) -> &ATermRef<'static> {
        &self.term
    }
}

impl fmt::Display for ATerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.term)
    }
}

impl fmt::Debug for ATerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.term)
    }
}

impl Hash for ATerm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.term.hash(state)
    }
}

impl PartialEq for ATerm {
    fn eq(&self, other: &Self) -> bool {
        self.term.eq(&other.term)
    }
}

impl PartialOrd for ATerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ATerm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term.cmp(&other.term)
    }
}

impl Eq for ATerm {}

/// A sendable protected term. Unlike [ATerm] it remembers which protection
/// set guards it, so it can be dropped from any thread.
pub struct ATermSend {
    term: ATermRef<'static>,
    root: ProtectionIndex,

    /// The protection set of the creating thread.
    protection_set: Arc<UnsafeCell<SharedTermProtection>>,
}

unsafe impl Send for ATermSend {}
unsafe impl Sync for ATermSend {}

impl ATermSend {
    /// Takes over the protection of an [ATerm].
    pub fn from(term: ATerm) -> Self {
        let root = term.root;
        let term_ref: ATermRef<'static> = unsafe { ATermRef::from_index(&term.term.shared) };

        // The protection slot now belongs to the ATermSend.
        std::mem::forget(term);

        Self {
            term: term_ref,
            root,
            protection_set: THREAD_TERM_POOL.with_borrow(|tp| tp.get_protection_set().clone()),
        }
    }
}

impl Drop for ATermSend {
    fn drop(&mut self) {
        THREAD_TERM_POOL.with_borrow(|tp| {
            let _guard = tp.term_pool().read_recursive().expect("The global term pool lock failed");

            // SAFETY: the shared lock keeps garbage collection out, and the
            // owning thread cannot touch its protection set without the lock.
            unsafe { &mut *self.protection_set.get() }
                .protection_set
                .unprotect(self.root);
        });
    }
}

impl Term for ATermSend {
    delegate! {
        to self.term {
            fn protect(&self) -> ATerm;
            fn copy(&self) -> ATermRef<'_>;
            fn arg(&self, index: usize) -> ATermRef<'_>;
            fn arguments(&self) -> ATermArgs<'_>;
            fn head_symbol(&self) -> SymbolRef<'_>;
            fn subterms(&self) -> TermIterator<'_>;
            fn kind(&self) -> TermKind;
            fn int_value(&self) -> Option<usize>;
            fn index(&self) -> usize;
            fn shared(&self) -> &ATermIndex;
        }
    }
}

/// Lets borrowed terms be passed wherever `impl Term` is expected.
impl<T: Term> Term for &T {
    fn protect(&self) -> ATerm {
        (*self).protect()
    }

    fn copy(&self) -> ATermRef<'_> {
        (*self).copy()
    }

    fn arg(&self, index: usize) -> ATermRef<'_> {
        (*self).arg(index)
    }

    fn arguments(&self) -> ATermArgs<'_> {
        (*self).arguments()
    }

    fn head_symbol(&self) -> SymbolRef<'_> {
        (*self).head_symbol()
    }

    fn subterms(&self) -> TermIterator<'_> {
        (*self).subterms()
    }

    fn kind(&self) -> TermKind {
        (*self).kind()
    }

    fn int_value(&self) -> Option<usize> {
        (*self).int_value()
    }

    fn index(&self) -> usize {
        (*self).index()
    }

    fn shared(&self) -> &ATermIndex {
        (*self).shared()
    }
}

/// An iterator over the arguments of a term.
pub struct ATermArgs<'a> {
    term: Option<ATermRef<'a>>,
    arity: usize,
    index: usize,
}

impl<'a> ATermArgs<'a> {
    fn new(term: ATermRef<'a>) -> ATermArgs<'a> {
        let arity = term.shared.arguments().len();
        ATermArgs {
            term: Some(term),
            arity,
            index: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.arity == 0
    }
}

impl<'a> Iterator for ATermArgs<'a> {
    type Item = ATermRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index < self.arity {
            let result = self.term.as_ref().map(|term| term.arg(self.index));
            self.index += 1;
            result
        } else {
            None
        }
    }
}

impl DoubleEndedIterator for ATermArgs<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.index < self.arity {
            let result = self.term.as_ref().map(|term| term.arg(self.arity - 1));
            self.arity -= 1;
            result
        } else {
            None
        }
    }
}

impl ExactSizeIterator for ATermArgs<'_> {
    fn len(&self) -> usize {
        self.arity - self.index
    }
}

/// An iterator over all subterms of a term in preorder, i.e. for f(g(a), b)
/// it visits f(g(a), b), g(a), a, b.
pub struct TermIterator<'a> {
    queue: VecDeque<ATermRef<'a>>,
}

impl<'a> TermIterator<'a> {
    pub fn new(term: ATermRef<'a>) -> TermIterator<'a> {
        TermIterator {
            queue: VecDeque::from([term]),
        }
    }
}

impl<'a> Iterator for TermIterator<'a> {
    type Item = ATermRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.queue.pop_back() {
            Some(term) => {
                for argument in term.arguments().rev() {
                    self.queue.push_back(argument);
                }

                Some(term)
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use crate::Symbol;

    use super::*;

    fn constant(name: &str) -> ATerm {
        ATerm::constant(&Symbol::new(name, 0))
    }

    #[test]
    fn test_term_sharing() {
        test_logger();

        let f = Symbol::new("aterm_sharing_f", 2);
        let a = constant("aterm_sharing_a");
        let b = constant("aterm_sharing_b");

        let t1 = ATerm::with_args(&f, &[a.copy(), b.copy()]);
        let t2 = ATerm::with_args(&f, &[a.copy(), b.copy()]);
        let t3 = ATerm::with_args(&f, &[b.copy(), a.copy()]);

        assert_eq!(t1, t2, "Structurally equal terms share one cell");
        assert_eq!(t1.shared(), t2.shared(), "Equality is pointer equality");
        assert_ne!(t1, t3, "Swapped arguments yield a different cell");
    }

    #[test]
    fn test_term_accessors() {
        test_logger();

        let f = Symbol::new("aterm_accessors_f", 2);
        let a = constant("aterm_accessors_a");
        let b = constant("aterm_accessors_b");
        let t = ATerm::with_args(&f, &[a.copy(), b.copy()]);

        assert_eq!(t.head_symbol().name(), "aterm_accessors_f");
        assert_eq!(t.kind(), TermKind::Application);
        assert_eq!(t.int_value(), None);
        assert_eq!(t.arg(0), a.copy());
        assert_eq!(t.arg(1), b.copy());
        assert_eq!(t.arguments().len(), 2);
        assert_eq!(t.arguments().rev().next().unwrap(), b.copy());
    }

    #[test]
    fn test_subterm_iteration() {
        test_logger();

        let f = Symbol::new("aterm_subterms_f", 2);
        let g = Symbol::new("aterm_subterms_g", 1);
        let a = constant("aterm_subterms_a");
        let b = constant("aterm_subterms_b");

        let ga = ATerm::with_args(&g, &[a.copy()]);
        let t = ATerm::with_args(&f, &[ga.copy(), b.copy()]);

        let visited: Vec<String> = t.subterms().map(|s| format!("{s}")).collect();
        assert_eq!(
            visited,
            vec![
                "aterm_subterms_f(aterm_subterms_g(aterm_subterms_a), aterm_subterms_b)",
                "aterm_subterms_g(aterm_subterms_a)",
                "aterm_subterms_a",
                "aterm_subterms_b"
            ]
        );
    }
}
