#![forbid(unsafe_code)]

use std::fmt;

use delegate::delegate;

use crate::ATerm;
use crate::ATermArgs;
use crate::ATermIndex;
use crate::ATermRef;
use crate::Markable;
use crate::SymbolRef;
use crate::Term;
use crate::TermIterator;
use crate::storage::Marker;
use crate::storage::THREAD_TERM_POOL;
use crate::storage::TermKind;

/// Returns true iff the term stores a machine integer.
pub fn is_int_term(t: &impl Term) -> bool {
    t.kind() == TermKind::Integer
}

/// A term storing a single machine integer.
pub struct ATermInt {
    term: ATerm,
}

impl ATermInt {
    pub fn new(value: usize) -> ATermInt {
        THREAD_TERM_POOL.with_borrow(|tp| ATermInt {
            term: tp.create_int(value),
        })
    }

    /// Returns the value of the integer term.
    pub fn value(&self) -> usize {
        self.term.int_value().expect("An integer term stores a value")
    }

    /// Borrows the underlying term.
    pub fn get(&self) -> ATermIntRef<'_> {
        ATermIntRef { term: self.term.get() }
    }
}

impl Term for ATermInt {
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

impl Markable for ATermInt {
    fn mark(&self, marker: &mut Marker) {
        self.term.mark(marker);
    }

    fn contains_term(&self, term: &ATermRef<'_>) -> bool {
        self.term.contains_term(term)
    }

    fn contains_symbol(&self, symbol: &SymbolRef<'_>) -> bool {
        self.term.contains_symbol(symbol)
    }

    fn len(&self) -> usize {
        1
    }
}

impl From<ATerm> for ATermInt {
    fn from(term: ATerm) -> Self {
        debug_assert!(is_int_term(&term), "The term must store an integer");
        ATermInt { term }
    }
}

impl From<ATermInt> for ATerm {
    fn from(value: ATermInt) -> Self {
        value.term
    }
}

impl Clone for ATermInt {
    fn clone(&self) -> Self {
        ATermInt {
            term: self.term.clone(),
        }
    }
}

impl fmt::Display for ATermInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl fmt::Debug for ATermInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.term)
    }
}

/// The borrowed variant of [ATermInt].
pub struct ATermIntRef<'a> {
    term: ATermRef<'a>,
}

impl ATermIntRef<'_> {
    /// Returns the value of the integer term.
    pub fn value(&self) -> usize {
        self.term.int_value().expect("An integer term stores a value")
    }

    /// Protects the term, yielding an owned [ATermInt].
    pub fn protect(&self) -> ATermInt {
        ATermInt {
            term: self.term.protect(),
        }
    }
}

impl<'a> From<ATermRef<'a>> for ATermIntRef<'a> {
    fn from(term: ATermRef<'a>) -> Self {
        debug_assert!(is_int_term(&term), "The term must store an integer");
        ATermIntRef { term }
    }
}

impl fmt::Display for ATermIntRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use super::*;

    #[test]
    fn test_int_term() {
        test_logger();

        let int_term = ATermInt::new(42);
        assert_eq!(int_term.value(), 42);
        assert!(is_int_term(&int_term));
        assert_eq!(format!("{int_term}"), "42");

        let shared = ATermInt::new(42);
        assert_eq!(int_term.shared(), shared.shared(), "Equal values share one cell");
    }
}
