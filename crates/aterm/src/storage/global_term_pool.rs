use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

use log::debug;

use maxterm_collections::ProtectionSet;
use maxterm_sharedmutex::GlobalBfSharedMutex;
use maxterm_sharedmutex::RecursiveLockReadGuard;
use maxterm_utilities::CountFormatter;
use maxterm_utilities::debug_trace;

use crate::ATermIndex;
use crate::ATermRef;
use crate::Markable;
use crate::Symb;
use crate::Symbol;
use crate::SymbolIndex;
use crate::SymbolRef;
use crate::Term;
use crate::storage::LookupPayload;
use crate::storage::SharedTermLookup;
use crate::storage::SymbolPool;
use crate::storage::TermKind;
use crate::storage::term_storage::TermStorage;

/// The single global term pool, guarding the unique tables and the protection
/// sets of all threads.
pub static GLOBAL_TERM_POOL: LazyLock<GlobalBfSharedMutex<GlobalTermPool>> =
    LazyLock::new(|| GlobalBfSharedMutex::new(GlobalTermPool::new()));

/// Enables garbage collection after every term creation, used for testing.
pub(crate) const AGGRESSIVE_GC: bool = false;

/// A type alias for the global term pool guard.
pub(crate) type GlobalTermPoolGuard<'a> = RecursiveLockReadGuard<'a, GlobalTermPool>;

/// A type alias for deletion hooks.
type DeletionHook = Box<dyn Fn(&ATermIndex) + Sync + Send>;

/// The single global (singleton) term pool.
pub struct GlobalTermPool {
    /// Unique tables of all terms, with stable pointers for references.
    terms: TermStorage,
    /// The symbol pool for managing function symbols.
    symbol_pool: SymbolPool,
    /// The thread-specific protection sets.
    thread_pools: Vec<Option<Arc<UnsafeCell<SharedTermProtection>>>>,

    // Reused between collections to avoid reallocations.
    marked_terms: HashSet<ATermIndex>,
    marked_symbols: HashSet<SymbolIndex>,
    stack: Vec<ATermIndex>,

    /// Deletion hooks called whenever a term with the given head symbol is
    /// removed by the garbage collector.
    deletion_hooks: Vec<(Symbol, DeletionHook)>,

    /// Indicates whether automatic garbage collection is enabled.
    garbage_collection: bool,

    /// The reserved symbols heading integer and list cells.
    int_symbol: SymbolRef<'static>,
    list_symbol: SymbolRef<'static>,
    empty_list_symbol: SymbolRef<'static>,
}

unsafe impl Send for GlobalTermPool {}
unsafe impl Sync for GlobalTermPool {}

impl GlobalTermPool {
    fn new() -> GlobalTermPool {
        // The reserved symbols exist for the lifetime of the pool.
        let symbol_pool = SymbolPool::new();
        let int_symbol = unsafe { SymbolRef::from_index(&symbol_pool.create("<int>", 0, false)) };
        let list_symbol = unsafe { SymbolRef::from_index(&symbol_pool.create("[_,_]", 2, false)) };
        let empty_list_symbol = unsafe { SymbolRef::from_index(&symbol_pool.create("[]", 0, false)) };

        GlobalTermPool {
            terms: TermStorage::new(),
            symbol_pool,
            thread_pools: Vec::new(),
            marked_terms: HashSet::new(),
            marked_symbols: HashSet::new(),
            stack: Vec::new(),
            deletion_hooks: Vec::new(),
            garbage_collection: true,
            int_symbol,
            list_symbol,
            empty_list_symbol,
        }
    }

    /// Returns the number of terms in the pool.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Returns whether the term pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a term storing a single machine integer.
    pub fn create_int(&self, value: usize) -> (ATermIndex, bool) {
        self.terms.insert_int(self.int_symbol.shared(), value)
    }

    /// Creates the application of a head symbol to the given arguments.
    pub fn create_appl(&self, symbol: &impl Symb, args: &[ATermRef<'_>]) -> (ATermIndex, bool) {
        debug_assert_eq!(
            symbol.arity(),
            args.len(),
            "The number of arguments does not match the arity of the symbol"
        );
        debug_assert!(
            symbol.shared() != self.int_symbol.shared()
                && symbol.shared() != self.list_symbol.shared()
                && symbol.shared() != self.empty_list_symbol.shared(),
            "Reserved symbols are created through their own constructors"
        );

        let lookup = SharedTermLookup {
            symbol: unsafe { SymbolRef::from_index(symbol.shared()) },
            kind: TermKind::Application,
            payload: LookupPayload::Arguments(args),
        };

        self.terms.insert(&lookup)
    }

    /// Creates the cons cell with the given head term and tail list.
    pub fn create_list_cons(&self, head: &ATermRef<'_>, tail: &ATermRef<'_>) -> (ATermIndex, bool) {
        debug_assert!(
            matches!(tail.kind(), TermKind::ListCons | TermKind::ListEmpty),
            "The tail of a cons cell must be a list"
        );

        let args = [head.copy(), tail.copy()];
        let lookup = SharedTermLookup {
            symbol: unsafe { SymbolRef::from_index(self.list_symbol.shared()) },
            kind: TermKind::ListCons,
            payload: LookupPayload::Arguments(&args),
        };

        self.terms.insert(&lookup)
    }

    /// Creates the empty list.
    pub fn create_empty_list(&self) -> (ATermIndex, bool) {
        let lookup = SharedTermLookup {
            symbol: unsafe { SymbolRef::from_index(self.empty_list_symbol.shared()) },
            kind: TermKind::ListEmpty,
            payload: LookupPayload::Arguments(&[]),
        };

        self.terms.insert(&lookup)
    }

    /// Creates a function symbol.
    pub fn create_symbol<P>(&self, name: impl Into<String> + AsRef<str>, arity: usize, quoted: bool, protect: P) -> Symbol
    where
        P: FnOnce(SymbolIndex) -> Symbol,
    {
        protect(self.symbol_pool.create(name, arity, quoted))
    }

    /// Registers a new thread term pool.
    ///
    /// # Safety
    ///
    /// Note that the returned `Arc<UnsafeCell<...>>` is not Send or Sync, so
    /// it *must* be protected through other means.
    #[allow(clippy::arc_with_non_send_sync)]
    pub(crate) fn register_thread_term_pool(&mut self) -> Arc<UnsafeCell<SharedTermProtection>> {
        let protection = Arc::new(UnsafeCell::new(SharedTermProtection {
            protection_set: ProtectionSet::new(),
            symbol_protection_set: ProtectionSet::new(),
            container_protection_set: ProtectionSet::new(),
            index: self.thread_pools.len(),
        }));

        debug!("Registered thread local protection set(s) {}", self.thread_pools.len());
        self.thread_pools.push(Some(protection.clone()));

        protection
    }

    /// Deregisters a thread pool.
    pub(crate) fn deregister_thread_pool(&mut self, index: usize) {
        debug!("Removed thread local protection set(s) {index}");
        if let Some(entry) = self.thread_pools.get_mut(index) {
            *entry = None;
        }
    }

    /// Collects garbage if enabled and returns an updated countdown for the
    /// thread local pool.
    pub(crate) fn trigger_garbage_collection(&mut self) -> usize {
        self.collect_garbage();

        if AGGRESSIVE_GC {
            return 1;
        }

        self.len()
    }

    /// Returns a counter for the unique numeric suffix of the given prefix.
    pub fn register_prefix(&self, prefix: &str) -> Arc<AtomicUsize> {
        self.symbol_pool.create_prefix(prefix)
    }

    /// Removes the registration of a prefix from the symbol pool.
    pub fn remove_prefix(&self, prefix: &str) {
        self.symbol_pool.remove_prefix(prefix)
    }

    /// Registers a hook that is called whenever a term headed by the given
    /// symbol is removed by the garbage collector.
    pub fn register_deletion_hook<F>(&mut self, symbol: Symbol, hook: F)
    where
        F: Fn(&ATermIndex) + Sync + Send + 'static,
    {
        self.deletion_hooks.push((symbol, Box::new(hook)));
    }

    /// Enables or disables automatic garbage collection.
    pub fn automatic_garbage_collection(&mut self, enabled: bool) {
        self.garbage_collection = enabled;
    }

    /// Collects garbage terms: marks everything reachable from the protection
    /// sets of all threads, then sweeps the unique tables.
    pub fn collect_garbage(&mut self) {
        if !self.garbage_collection {
            return;
        }

        self.marked_terms.clear();
        self.marked_symbols.clear();
        self.stack.clear();

        // The reserved symbols are always reachable.
        self.marked_symbols.insert(self.int_symbol.shared().copy());
        self.marked_symbols.insert(self.list_symbol.shared().copy());
        self.marked_symbols.insert(self.empty_list_symbol.shared().copy());

        let mut marker = Marker {
            marked_terms: &mut self.marked_terms,
            marked_symbols: &mut self.marked_symbols,
            stack: &mut self.stack,
        };

        let mark_time = Instant::now();

        for pool in self.thread_pools.iter().flatten() {
            // SAFETY: We have exclusive access to the global term pool, so no
            // other thread can modify the protection sets.
            let pool = unsafe { &mut *pool.get() };

            for (_root, symbol) in pool.symbol_protection_set.iter() {
                debug_trace!("Marking root {_root:?} symbol {symbol:?}");
                marker.marked_symbols.insert(symbol.copy());
            }

            for (_root, term) in pool.protection_set.iter() {
                debug_trace!("Marking root {_root:?} term {term:?}");
                unsafe {
                    ATermRef::from_index(term).mark(&mut marker);
                }
            }

            for (_, container) in pool.container_protection_set.iter() {
                container.mark(&mut marker);
            }
        }

        let mark_time_elapsed = mark_time.elapsed();
        let collect_time = Instant::now();

        let num_of_terms = self.len();
        let num_of_symbols = self.symbol_pool.len();

        self.terms.retain(|term| {
            if !self.marked_terms.contains(term) {
                debug_trace!("Dropping term: {:?}", term);

                for (symbol, hook) in &self.deletion_hooks {
                    if symbol == term.symbol() {
                        hook(term);
                    }
                }

                return false;
            }

            true
        });

        // Symbols are swept after the terms since swept terms may have been
        // the last use of their head symbol.
        self.symbol_pool.retain(|symbol| {
            if !self.marked_symbols.contains(symbol) {
                debug_trace!("Dropping symbol: {:?}", symbol);
                return false;
            }

            true
        });

        debug!(
            "Garbage collection: marking took {}ms, collection took {}ms, {} terms and {} symbols removed",
            mark_time_elapsed.as_millis(),
            collect_time.elapsed().as_millis(),
            num_of_terms - self.len(),
            num_of_symbols - self.symbol_pool.len()
        );

        debug!("{}", self.metrics());

        for pool in self.thread_pools.iter().flatten() {
            // SAFETY: See above, collection holds the exclusive lock.
            let pool = unsafe { &mut *pool.get() };
            debug!("{}", pool.metrics());
        }
    }

    /// Returns the metrics of the term pool, can be formatted and written to
    /// output.
    pub fn metrics(&self) -> TermPoolMetrics<'_> {
        TermPoolMetrics(self)
    }

    /// Marks the given term as being reachable.
    ///
    /// # Safety
    ///
    /// Should only be called during garbage collection.
    pub unsafe fn mark_term(&mut self, term: &ATermRef<'_>) {
        let mut marker = Marker {
            marked_terms: &mut self.marked_terms,
            marked_symbols: &mut self.marked_symbols,
            stack: &mut self.stack,
        };
        term.mark(&mut marker);
    }

    /// Returns the reserved integer symbol.
    pub(crate) fn get_int_symbol(&self) -> &SymbolRef<'static> {
        &self.int_symbol
    }

    /// Returns the reserved list constructor symbol.
    pub(crate) fn get_list_symbol(&self) -> &SymbolRef<'static> {
        &self.list_symbol
    }

    /// Returns the reserved empty list symbol.
    pub(crate) fn get_empty_list_symbol(&self) -> &SymbolRef<'static> {
        &self.empty_list_symbol
    }
}

pub struct TermPoolMetrics<'a>(&'a GlobalTermPool);

impl fmt::Display for TermPoolMetrics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "There are {} terms and {} symbols",
            CountFormatter(self.0.terms.len()),
            CountFormatter(self.0.symbol_pool.len())
        )
    }
}

/// The protection sets of one thread, locked through the global term pool.
pub struct SharedTermProtection {
    /// Protection set for terms.
    pub protection_set: ProtectionSet<ATermIndex>,
    /// Protection set to prevent garbage collection of symbols.
    pub symbol_protection_set: ProtectionSet<SymbolIndex>,
    /// Protection set for containers.
    pub container_protection_set: ProtectionSet<Arc<dyn Markable + Sync + Send>>,
    /// Index in the global pool's thread pools list.
    pub index: usize,
}

impl SharedTermProtection {
    /// Returns the metrics of the protection sets, can be formatted and
    /// written to output.
    pub fn metrics(&self) -> ProtectionMetrics<'_> {
        ProtectionMetrics(self)
    }
}

/// A struct that can be used to print the performance of the protection sets.
pub struct ProtectionMetrics<'a>(&'a SharedTermProtection);

impl fmt::Display for ProtectionMetrics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Protection set {} has {} roots, max {} and {} insertions",
            self.0.index,
            CountFormatter(self.0.protection_set.len()),
            CountFormatter(self.0.protection_set.maximum_size()),
            CountFormatter(self.0.protection_set.number_of_insertions())
        )?;

        writeln!(
            f,
            "Containers: {} roots, max {} and {} insertions",
            CountFormatter(self.0.container_protection_set.len()),
            CountFormatter(self.0.container_protection_set.maximum_size()),
            CountFormatter(self.0.container_protection_set.number_of_insertions()),
        )?;

        write!(
            f,
            "Symbols: {} roots, max {} and {} insertions",
            CountFormatter(self.0.symbol_protection_set.len()),
            CountFormatter(self.0.symbol_protection_set.maximum_size()),
            CountFormatter(self.0.symbol_protection_set.number_of_insertions()),
        )
    }
}

/// Helper struct passing the private marking state to [Markable::mark].
pub struct Marker<'a> {
    marked_terms: &'a mut HashSet<ATermIndex>,
    marked_symbols: &'a mut HashSet<SymbolIndex>,
    stack: &'a mut Vec<ATermIndex>,
}

impl Marker<'_> {
    /// Marks the given term and everything reachable from it.
    pub fn mark(&mut self, term: &ATermRef<'_>) {
        if !self.marked_terms.contains(term.shared()) {
            self.stack.push(term.shared().copy());

            while let Some(term) = self.stack.pop() {
                self.marked_terms.insert(term.copy());
                self.marked_symbols.insert(term.symbol().shared().copy());

                for arg in term.arguments() {
                    // Mark before pushing since shared subterms recur.
                    if !self.marked_terms.contains(arg.shared()) {
                        self.marked_terms.insert(arg.shared().copy());
                        self.marked_symbols.insert(arg.head_symbol().shared().copy());
                        self.stack.push(arg.shared().copy());
                    }
                }
            }
        }
    }

    /// Marks the given symbol as being reachable.
    pub fn mark_symbol(&mut self, symbol: &SymbolRef<'_>) {
        self.marked_symbols.insert(symbol.shared().copy());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use maxterm_utilities::random_test;
    use maxterm_utilities::test_logger;

    use crate::ATerm;
    use crate::Symbol;
    use crate::Term;
    use crate::random_term;
    use crate::storage::THREAD_TERM_POOL;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_maximal_sharing() {
        test_logger();

        random_test(100, |rng| {
            let mut terms = HashMap::new();

            for _ in 0..1000 {
                let term = random_term(rng, &[("f".into(), 2), ("g".into(), 1)], &["a".to_string()], 10);

                let representation = format!("{term}");
                if let Some(entry) = terms.get(&representation) {
                    assert_eq!(term, *entry, "Terms with the same representation must share a cell");
                } else {
                    terms.insert(representation, term);
                }
            }
        });
    }

    #[test]
    fn test_garbage_collection_reclaims_unprotected() {
        test_logger();

        let f = Symbol::new("gc_reclaim_f", 1);
        let a = ATerm::constant(&Symbol::new("gc_reclaim_a", 0));

        let term = ATerm::with_args(&f, &[a.copy()]);
        drop(term);

        THREAD_TERM_POOL.with_borrow(|tp| {
            tp.collect_garbage();

            // Recreating the dropped term through the global pool reports a
            // fresh insertion, so the sweep removed the old cell.
            let guard = tp.term_pool().read_recursive().expect("The global term pool lock failed");
            let (_index, inserted) = guard.create_appl(&f, &[a.copy()]);
            assert!(inserted, "An unprotected term must be swept");
        });
    }

    #[test]
    fn test_garbage_collection_keeps_protected() {
        test_logger();

        let f = Symbol::new("gc_keep_f", 1);
        let a = ATerm::constant(&Symbol::new("gc_keep_a", 0));
        let term = ATerm::with_args(&f, &[a.copy()]);

        THREAD_TERM_POOL.with_borrow(|tp| {
            tp.collect_garbage();
            tp.collect_garbage();

            let guard = tp.term_pool().read_recursive().expect("The global term pool lock failed");
            let (index, inserted) = guard.create_appl(&f, &[a.copy()]);
            assert!(!inserted, "A protected term must survive collection");
            assert_eq!(&index, term.shared(), "The surviving cell keeps its address");
        });

        assert_eq!(format!("{term}"), "gc_keep_f(gc_keep_a)");
    }

    #[test]
    fn test_deletion_hook() {
        test_logger();

        let symbol = Symbol::new("gc_hook_symbol", 1);
        let deleted = Arc::new(AtomicUsize::new(0));

        {
            let deleted = deleted.clone();
            THREAD_TERM_POOL.with_borrow(|tp| {
                tp.term_pool()
                    .write()
                    .expect("The global term pool lock failed")
                    .register_deletion_hook(symbol.clone(), move |_term| {
                        deleted.fetch_add(1, Ordering::Relaxed);
                    });
            });
        }

        let a = ATerm::constant(&Symbol::new("gc_hook_a", 0));
        let term = ATerm::with_args(&symbol, &[a.copy()]);
        drop(term);

        THREAD_TERM_POOL.with_borrow(|tp| tp.collect_garbage());

        assert!(
            deleted.load(Ordering::Relaxed) >= 1,
            "The hook must run when the term is swept"
        );
    }
}
