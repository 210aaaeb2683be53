#![forbid(unsafe_code)]

use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use equivalent::Equivalent;
use rustc_hash::FxBuildHasher;

use maxterm_unsafety::StablePointer;
use maxterm_unsafety::StablePointerSet;

use crate::SymbolIndex;

/// Pool for maximal sharing of function symbols, see [crate::SymbolRef].
/// Symbols with the same name, arity and quoting point to the same
/// [SharedSymbol] object.
pub struct SymbolPool {
    /// Unique table of all function symbols.
    symbols: StablePointerSet<SharedSymbol, FxBuildHasher>,

    /// A map from prefixes to counters that track the next free numeric
    /// suffix for generated symbol names.
    prefix_counters: DashMap<String, Arc<AtomicUsize>, FxBuildHasher>,
}

impl SymbolPool {
    pub(crate) fn new() -> Self {
        Self {
            symbols: StablePointerSet::with_hasher(FxBuildHasher),
            prefix_counters: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// Creates or retrieves the function symbol with the given name, arity
    /// and quoting.
    pub fn create<N>(&self, name: N, arity: usize, quoted: bool) -> StablePointer<SharedSymbol>
    where
        N: Into<String> + AsRef<str>,
    {
        let (shared_symbol, inserted) = self
            .symbols
            .insert_equiv(&SharedSymbolLookup { name, arity, quoted });

        if inserted {
            // A freshly created name may clash with a registered prefix.
            self.update_prefix(shared_symbol.name());
        }

        shared_symbol
    }

    /// Returns the number of symbols in the pool.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Retain only symbols satisfying the given predicate.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&SymbolIndex) -> bool,
    {
        self.symbols.retain(|element| f(element));
    }

    /// Creates or retrieves the suffix counter for the given prefix. Names
    /// `prefix0`, `prefix1`, ... taken from the counter are fresh with
    /// respect to all existing symbols.
    pub fn create_prefix(&self, prefix: &str) -> Arc<AtomicUsize> {
        let result = match self.prefix_counters.get(prefix) {
            Some(result) => result.clone(),
            None => {
                let result = Arc::new(AtomicUsize::new(0));
                assert!(
                    self.prefix_counters.insert(prefix.to_string(), result.clone()).is_none(),
                    "This prefix is not yet registered"
                );
                result
            }
        };

        self.skip_existing_suffixes(prefix, &result);
        result
    }

    /// Removes the registration of a prefix from the pool.
    pub fn remove_prefix(&self, prefix: &str) {
        self.prefix_counters.remove(prefix);
    }

    /// Bumps the counter of a registered prefix past the numeric suffix of a
    /// newly created symbol name.
    fn update_prefix(&self, name: &str) {
        let start_of_suffix = name
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|pos| pos + 1)
            .unwrap_or(0);

        if start_of_suffix < name.len() {
            let suffix = &name[start_of_suffix..];
            let prefix = &name[..start_of_suffix];

            if let Some(counter) = self.prefix_counters.get(prefix) {
                if let Ok(number) = suffix.parse::<usize>() {
                    counter.fetch_max(number + 1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Scans all symbols for numeric suffixes of this prefix and starts the
    /// counter past the largest one.
    fn skip_existing_suffixes(&self, prefix: &str, counter: &Arc<AtomicUsize>) {
        for symbol in self.symbols.iter() {
            let name = symbol.name();
            if let Some(suffix) = name.strip_prefix(prefix) {
                if let Ok(number) = suffix.parse::<usize>() {
                    counter.fetch_max(number + 1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// A function symbol: a name, the number of arguments, and whether the name
/// is printed quoted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SharedSymbol {
    name: String,
    arity: usize,
    quoted: bool,
}

impl SharedSymbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn quoted(&self) -> bool {
        self.quoted
    }
}

/// Looks up a SharedSymbol without allocating the name.
struct SharedSymbolLookup<T: Into<String> + AsRef<str>> {
    name: T,
    arity: usize,
    quoted: bool,
}

impl<T: Into<String> + AsRef<str>> From<&SharedSymbolLookup<T>> for SharedSymbol {
    fn from(lookup: &SharedSymbolLookup<T>) -> Self {
        SharedSymbol {
            name: lookup.name.as_ref().to_string(),
            arity: lookup.arity,
            quoted: lookup.quoted,
        }
    }
}

impl<T: Into<String> + AsRef<str>> Equivalent<SharedSymbol> for SharedSymbolLookup<T> {
    fn equivalent(&self, other: &SharedSymbol) -> bool {
        self.name.as_ref() == other.name && self.arity == other.arity && self.quoted == other.quoted
    }
}

/// Must hash exactly like [SharedSymbol].
impl<T: Into<String> + AsRef<str>> Hash for SharedSymbolLookup<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.as_ref().hash(state);
        self.arity.hash(state);
        self.quoted.hash(state);
    }
}

impl Hash for SharedSymbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.arity.hash(state);
        self.quoted.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use maxterm_utilities::test_logger;

    use crate::Symbol;
    use crate::storage::THREAD_TERM_POOL;

    #[test]
    fn test_prefix_counter() {
        test_logger();

        let _symbol = Symbol::new("symbol_prefix_x69", 0);
        let _symbol2 = Symbol::new("symbol_prefix_x_y", 0);

        let value = THREAD_TERM_POOL.with_borrow(|tp| {
            tp.term_pool()
                .write()
                .expect("The global term pool lock failed")
                .register_prefix("symbol_prefix_x")
        });

        assert_eq!(value.load(Ordering::Relaxed), 70);

        let _symbol3 = Symbol::new("symbol_prefix_x_no_effect", 0);
        let _symbol4 = Symbol::new("symbol_prefix_x130", 0);

        assert_eq!(value.load(Ordering::Relaxed), 131);
    }

    #[test]
    fn test_symbol_reclamation() {
        test_logger();

        let symbol = Symbol::new("symbol_reclaim_x7", 0);

        THREAD_TERM_POOL.with_borrow(|tp| tp.collect_garbage());

        // A protected symbol survives collection and seeds the counter of a
        // matching prefix.
        let counter = THREAD_TERM_POOL.with_borrow(|tp| {
            tp.term_pool()
                .write()
                .expect("The global term pool lock failed")
                .register_prefix("symbol_reclaim_x")
        });
        assert_eq!(counter.load(Ordering::Relaxed), 8);

        THREAD_TERM_POOL.with_borrow(|tp| {
            tp.term_pool()
                .write()
                .expect("The global term pool lock failed")
                .remove_prefix("symbol_reclaim_x")
        });

        drop(symbol);
        THREAD_TERM_POOL.with_borrow(|tp| tp.collect_garbage());

        // The swept symbol no longer seeds the counter.
        let counter = THREAD_TERM_POOL.with_borrow(|tp| {
            tp.term_pool()
                .write()
                .expect("The global term pool lock failed")
                .register_prefix("symbol_reclaim_x")
        });
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        // Interning the name again yields a live symbol.
        let again = Symbol::new("symbol_reclaim_x7", 0);
        assert_eq!(again.name(), "symbol_reclaim_x7");
        assert_eq!(again.arity(), 0);
    }
}
