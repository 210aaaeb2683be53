use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::ops::Deref;

use maxterm_collections::ProtectionIndex;
use maxterm_unsafety::StablePointer;

use crate::Markable;
use crate::aterm::ATermRef;
use crate::storage::Marker;
use crate::storage::SharedSymbol;
use crate::storage::THREAD_TERM_POOL;

/// The public interface of a function symbol, implemented by both the owned
/// [Symbol] and the borrowed [SymbolRef].
pub trait Symb {
    /// The name of the symbol.
    fn name(&self) -> &str;

    /// The number of arguments of terms headed by this symbol.
    fn arity(&self) -> usize;

    /// True iff the symbol name is printed quoted.
    fn quoted(&self) -> bool;

    /// Creates another reference to the same shared symbol.
    fn copy(&self) -> SymbolRef<'_>;

    /// The address of the shared symbol, unique among live symbols.
    fn index(&self) -> usize;

    /// The underlying pointer into the symbol pool.
    fn shared(&self) -> &SymbolIndex;
}

/// The pointer type referring into the symbol pool.
pub type SymbolIndex = StablePointer<SharedSymbol>;

/// A lifetime-bound reference to a function symbol in the symbol pool.
#[repr(transparent)]
#[derive(Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SymbolRef<'a> {
    shared: SymbolIndex,
    marker: PhantomData<&'a ()>,
}

/// In release builds a symbol reference is exactly one pointer, and the
/// NonNull niche makes Option<SymbolRef> pointer-sized as well.
#[cfg(not(debug_assertions))]
const _: () = assert!(std::mem::size_of::<SymbolRef<'static>>() == std::mem::size_of::<usize>());
#[cfg(not(debug_assertions))]
const _: () = assert!(std::mem::size_of::<Option<SymbolRef<'static>>>() == std::mem::size_of::<usize>());

impl<'a> SymbolRef<'a> {
    /// Protects the symbol from garbage collection, yielding an owned [Symbol].
    pub fn protect(&self) -> Symbol {
        THREAD_TERM_POOL.with_borrow(|tp| tp.protect_symbol(self))
    }

    /// The name of the symbol, with the full reference lifetime.
    pub fn name(&self) -> &'a str {
        // The shared symbol outlives 'a, which is tied to a protection.
        unsafe { std::mem::transmute::<&str, &'a str>(self.shared.name()) }
    }

    /// The arity of the symbol.
    pub fn arity(&self) -> usize {
        self.shared.arity()
    }

    /// True iff the symbol name is printed quoted.
    pub fn quoted(&self) -> bool {
        self.shared.quoted()
    }

    /// Creates another reference to the same shared symbol.
    pub fn copy(&self) -> SymbolRef<'a> {
        unsafe { SymbolRef::from_index(&self.shared) }
    }

    /// Wraps a pointer into the symbol pool.
    ///
    /// # Safety
    ///
    /// The symbol must remain protected for the lifetime 'a.
    pub unsafe fn from_index(index: &SymbolIndex) -> SymbolRef<'a> {
        SymbolRef {
            shared: index.copy(),
            marker: PhantomData,
        }
    }
}

impl Symb for SymbolRef<'_> {
    fn name(&self) -> &str {
        self.shared.name()
    }

    fn arity(&self) -> usize {
        self.shared.arity()
    }

    fn quoted(&self) -> bool {
        self.shared.quoted()
    }

    fn copy(&self) -> SymbolRef<'_> {
        SymbolRef::copy(self)
    }

    fn index(&self) -> usize {
        self.shared.ptr().as_ptr() as usize
    }

    fn shared(&self) -> &SymbolIndex {
        &self.shared
    }
}

impl Markable for SymbolRef<'_> {
    fn mark(&self, marker: &mut Marker) {
        marker.mark_symbol(self);
    }

    fn contains_term(&self, _term: &ATermRef<'_>) -> bool {
        false
    }

    fn contains_symbol(&self, symbol: &SymbolRef<'_>) -> bool {
        self == symbol
    }

    fn len(&self) -> usize {
        1
    }
}

impl fmt::Display for SymbolRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted() {
            write_quoted(f, self.name())
        } else {
            write!(f, "{}", self.name())
        }
    }
}

impl fmt::Debug for SymbolRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Writes the name surrounded by double quotes, escaping the characters that
/// the term grammar treats specially.
fn write_quoted(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    use fmt::Write;

    f.write_char('"')?;
    for c in name.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

/// A function symbol that is protected from garbage collection, with the same
/// interface as [SymbolRef].
pub struct Symbol {
    symbol: SymbolRef<'static>,
    root: ProtectionIndex,
}

impl Symbol {
    /// Creates or retrieves the symbol with the given name and arity.
    pub fn new(name: impl Into<String> + AsRef<str>, arity: usize) -> Symbol {
        THREAD_TERM_POOL.with_borrow(|tp| tp.create_symbol(name, arity, false))
    }

    /// Creates or retrieves the quoted symbol with the given name and arity.
    /// Quoted and unquoted symbols with the same name are distinct.
    pub fn new_quoted(name: impl Into<String> + AsRef<str>, arity: usize) -> Symbol {
        THREAD_TERM_POOL.with_borrow(|tp| tp.create_symbol(name, arity, true))
    }

    /// Wraps a pointer and the protection set slot that guards it.
    pub(crate) unsafe fn from_index(index: &SymbolIndex, root: ProtectionIndex) -> Symbol {
        Self {
            symbol: unsafe { SymbolRef::from_index(index) },
            root,
        }
    }

    /// The slot of this symbol in the thread's symbol protection set.
    pub fn root(&self) -> ProtectionIndex {
        self.root
    }

    /// Creates a reference to the underlying shared symbol.
    pub fn copy(&self) -> SymbolRef<'_> {
        self.symbol.copy()
    }
}

impl Symb for Symbol {
    fn name(&self) -> &str {
        self.symbol.name()
    }

    fn arity(&self) -> usize {
        self.symbol.arity()
    }

    fn quoted(&self) -> bool {
        self.symbol.quoted()
    }

    fn copy(&self) -> SymbolRef<'_> {
        self.symbol.copy()
    }

    fn index(&self) -> usize {
        Symb::index(&self.symbol)
    }

    fn shared(&self) -> &SymbolIndex {
        Symb::shared(&self.symbol)
    }
}

impl Drop for Symbol {
    fn drop(&mut self) {
        THREAD_TERM_POOL.with_borrow(|tp| {
            tp.drop_symbol(self);
        })
    }
}

impl From<&SymbolRef<'_>> for Symbol {
    fn from(value: &SymbolRef) -> Self {
        value.protect()
    }
}

impl Clone for Symbol {
    fn clone(&self) -> Self {
        self.symbol.protect()
    }
}

impl Deref for Symbol {
    type Target = SymbolRef<'static>;

    fn deref(&self) -> &Self::Target {
        &self.symbol
    }
}

impl Borrow<SymbolRef<'static>> for Symbol {
    fn borrow(&self) -> &SymbolRef<'static> {
        &self.symbol
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.symbol)
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.symbol.eq(&other.symbol)
    }
}

impl PartialEq<SymbolRef<'_>> for Symbol {
    fn eq(&self, other: &SymbolRef<'_>) -> bool {
        self.symbol == *other
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.symbol.cmp(&other.symbol)
    }
}

impl Eq for Symbol {}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use super::*;

    #[test]
    fn test_symbol_identity() {
        test_logger();

        let f1 = Symbol::new("symbol_identity_f", 2);
        let f2 = Symbol::new("symbol_identity_f", 2);
        let g = Symbol::new("symbol_identity_f", 3);

        assert_eq!(f1, f2, "Equal name and arity must intern to the same symbol");
        assert_ne!(f1, g, "A different arity yields a different symbol");

        assert_eq!(f1.name(), "symbol_identity_f");
        assert_eq!(f1.arity(), 2);
        assert!(!f1.quoted());
    }

    #[test]
    fn test_quoted_symbols() {
        test_logger();

        let plain = Symbol::new("symbol_quoted_a", 0);
        let quoted = Symbol::new_quoted("symbol_quoted_a", 0);

        assert_ne!(plain, quoted, "Quoting is part of the symbol identity");
        assert_eq!(format!("{quoted}"), "\"symbol_quoted_a\"");

        let escaped = Symbol::new_quoted("line\nbreak\"q\"", 0);
        assert_eq!(format!("{escaped}"), "\"line\\nbreak\\\"q\\\"\"");
    }
}
