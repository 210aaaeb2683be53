//! A typed view on list terms built from the two reserved list symbols.
#![forbid(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;

use delegate::delegate;
use itertools::Itertools;

use maxterm_utilities::TermStoreError;

use crate::ATerm;
use crate::ATermArgs;
use crate::ATermIndex;
use crate::ATermRef;
use crate::SymbolRef;
use crate::Term;
use crate::TermIterator;
use crate::storage::THREAD_TERM_POOL;
use crate::storage::TermKind;

/// Returns true iff the term is a non-empty list.
pub fn is_list_term(t: &impl Term) -> bool {
    t.kind() == TermKind::ListCons
}

/// Returns true iff the term is the empty list.
pub fn is_empty_list_term(t: &impl Term) -> bool {
    t.kind() == TermKind::ListEmpty
}

/// Represents a list of terms of type T.
///
/// # Details
///
/// Lists are ordinary terms built from two reserved symbols: a cons symbol of
/// arity 2, whose first argument is the head and whose second argument is the
/// tail, and the empty list constant. Lists over equal elements are therefore
/// maximally shared like any other term.
pub struct ATermList<T> {
    term: ATerm,
    _marker: PhantomData<T>,
}

impl<T: From<ATerm>> ATermList<T> {
    /// Obtain the head, i.e. the first element, of the list.
    pub fn head(&self) -> T {
        self.term.arg(0).protect().into()
    }

    /// Converts the list into a vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<T> ATermList<T> {
    /// Constructs a new list from an iterator that is consumed.
    pub fn from_double_iter(iter: impl DoubleEndedIterator<Item = T>) -> Self
    where
        T: Into<ATerm>,
    {
        let mut list = Self::empty();
        for item in iter.rev() {
            list = list.cons(item);
        }
        list
    }

    /// Constructs a new list from a fallible iterator that is consumed.
    pub fn try_from_double_iter(
        iter: impl DoubleEndedIterator<Item = Result<T, TermStoreError>>,
    ) -> Result<Self, TermStoreError>
    where
        T: Into<ATerm>,
    {
        let mut list = Self::empty();
        for item in iter.rev() {
            list = list.cons(item?);
        }
        Ok(list)
    }

    /// Constructs a new list with the given item as the head and the current
    /// list as the tail.
    pub fn cons(&self, item: T) -> Self
    where
        T: Into<ATerm>,
    {
        let item: ATerm = item.into();
        ATermList {
            term: THREAD_TERM_POOL.with_borrow(|tp| tp.create_list_cons(&item.copy(), &self.term.copy())),
            _marker: PhantomData,
        }
    }

    /// Constructs the empty list.
    pub fn empty() -> Self {
        ATermList {
            term: THREAD_TERM_POOL.with_borrow(|tp| tp.create_empty_list()),
            _marker: PhantomData,
        }
    }

    /// Returns true iff the list is empty.
    pub fn is_empty(&self) -> bool {
        is_empty_list_term(&self.term)
    }

    /// The number of elements in the list, by walking the shared spine.
    pub fn len(&self) -> usize {
        let mut length = 0;
        let mut cursor = self.term.shared().copy();

        while cursor.kind() == TermKind::ListCons {
            length += 1;
            let tail = cursor.arguments()[1].shared().copy();
            cursor = tail;
        }

        length
    }

    /// Obtain the tail, i.e. the remainder, of the list.
    pub fn tail(&self) -> ATermList<T> {
        self.term.arg(1).into()
    }

    /// Returns an iterator over all elements in the list.
    pub fn iter(&self) -> ATermListIter<T> {
        ATermListIter { current: self.clone() }
    }
}

impl<T> Term for ATermList<T> {
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

impl<T> Clone for ATermList<T> {
    fn clone(&self) -> Self {
        ATermList {
            term: self.term.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> From<ATermList<T>> for ATerm {
    fn from(value: ATermList<T>) -> Self {
        value.term
    }
}

impl<T: From<ATerm>> Iterator for ATermListIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            None
        } else {
            let head = self.current.head();
            self.current = self.current.tail();
            Some(head)
        }
    }
}

impl<T> From<ATerm> for ATermList<T> {
    fn from(value: ATerm) -> Self {
        debug_assert!(
            is_list_term(&value) || is_empty_list_term(&value),
            "Can only convert a list term"
        );
        ATermList::<T> {
            term: value,
            _marker: PhantomData,
        }
    }
}

impl<'a, T> From<ATermRef<'a>> for ATermList<T> {
    fn from(value: ATermRef<'a>) -> Self {
        debug_assert!(
            is_list_term(&value) || is_empty_list_term(&value),
            "Can only convert a list term"
        );
        ATermList::<T> {
            term: value.protect(),
            _marker: PhantomData,
        }
    }
}

impl<T: From<ATerm>> IntoIterator for ATermList<T> {
    type IntoIter = ATermListIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: From<ATerm>> IntoIterator for &ATermList<T> {
    type IntoIter = ATermListIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: From<ATerm> + fmt::Display> fmt::Display for ATermList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.iter().format(","))
    }
}

/// The iterator over the elements of an [ATermList].
pub struct ATermListIter<T> {
    current: ATermList<T>,
}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use crate::ATermInt;

    use super::*;

    #[test]
    fn test_list_term() {
        test_logger();

        let list = ATermList::from_double_iter(vec![ATermInt::new(1), ATermInt::new(2), ATermInt::new(3)].into_iter());
        assert_eq!(list.head().value(), 1);
        assert_eq!(list.tail().head().value(), 2);
        assert_eq!(list.tail().tail().head().value(), 3);
        assert!(list.tail().tail().tail().is_empty());
        assert_eq!(list.len(), 3);
        assert_eq!(format!("{list}"), "[1,2,3]");
    }

    #[test]
    fn test_list_sharing() {
        test_logger();

        let one = ATermList::from_double_iter([ATermInt::new(7), ATermInt::new(8)].into_iter());
        let other = ATermList::from_double_iter([ATermInt::new(7), ATermInt::new(8)].into_iter());

        assert_eq!(one.shared(), other.shared(), "Equal lists share one spine");
    }

    #[test]
    fn test_long_list() {
        test_logger();

        // Lists have no arity bound since every cons cell has exactly two
        // arguments.
        let elements = 70000;
        let list = ATermList::from_double_iter((0..elements).map(ATermInt::new));

        assert_eq!(list.len(), elements);
        assert_eq!(list.head().value(), 0);
    }
}
