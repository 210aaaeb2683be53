use std::cell::Cell;
use std::cell::RefCell;
use std::cell::UnsafeCell;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use log::debug;

use maxterm_collections::ProtectionIndex;
use maxterm_sharedmutex::RecursiveLock;
use maxterm_sharedmutex::RecursiveLockReadGuard;
use maxterm_utilities::TermStoreError;
use maxterm_utilities::debug_trace;

use crate::Markable;
use crate::Symb;
use crate::Symbol;
use crate::SymbolRef;
use crate::Term;
use crate::aterm::ATerm;
use crate::aterm::ATermRef;
use crate::storage::AGGRESSIVE_GC;
use crate::storage::GlobalTermPool;
use crate::storage::SharedTermProtection;
use crate::storage::global_term_pool::GLOBAL_TERM_POOL;

thread_local! {
    /// Thread-specific term pool that manages protection sets.
    pub static THREAD_TERM_POOL: RefCell<ThreadTermPool> = RefCell::new(ThreadTermPool::new());
}

/// Per-thread term pool managing local protection sets.
pub struct ThreadTermPool {
    /// A reference to the protection sets of this thread pool.
    protection_set: Arc<UnsafeCell<SharedTermProtection>>,

    /// The number of term creations left before garbage collection triggers.
    garbage_collection_counter: Cell<usize>,

    /// A reusable vector storing the arguments of a term for lookup.
    tmp_arguments: RefCell<Vec<ATermRef<'static>>>,

    /// A local view of the global term pool.
    term_pool: RecursiveLock<GlobalTermPool>,

    /// Copies of the reserved symbols since thread local access is cheaper.
    int_symbol: SymbolRef<'static>,
    list_symbol: SymbolRef<'static>,
    empty_list_symbol: SymbolRef<'static>,
}

impl ThreadTermPool {
    /// Creates a new thread-local term pool.
    fn new() -> Self {
        let term_pool: RecursiveLock<GlobalTermPool> = RecursiveLock::from_mutex(GLOBAL_TERM_POOL.share());

        let mut pool = term_pool.write().expect("The global term pool lock failed");

        let protection_set = pool.register_thread_term_pool();
        let int_symbol = pool.get_int_symbol().copy();
        let list_symbol = pool.get_list_symbol().copy();
        let empty_list_symbol = pool.get_empty_list_symbol().copy();
        drop(pool);

        Self {
            protection_set,
            // Arbitrary countdown before the first collection.
            garbage_collection_counter: Cell::new(if AGGRESSIVE_GC { 1 } else { 1000 }),
            tmp_arguments: RefCell::new(Vec::new()),
            int_symbol,
            list_symbol,
            empty_list_symbol,
            term_pool,
        }
    }

    /// Creates a term without arguments.
    pub fn create_constant(&self, symbol: &SymbolRef<'_>) -> ATerm {
        assert!(symbol.arity() == 0, "A constant must have arity 0");

        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_appl(symbol, &[]);

        // Protecting consumes the guard; the collection check must run with
        // the shared lock released or it would always be skipped.
        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        result
    }

    /// Creates a term with the given arguments.
    pub fn create_term(&self, symbol: &impl Symb, args: &[impl Term]) -> ATerm {
        let mut arguments = self.tmp_arguments.borrow_mut();

        arguments.clear();
        for arg in args {
            unsafe {
                arguments.push(ATermRef::from_index(arg.shared()));
            }
        }

        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_appl(symbol, &arguments);

        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        result
    }

    /// Creates a term storing a single machine integer.
    pub fn create_int(&self, value: usize) -> ATerm {
        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_int(value);

        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        result
    }

    /// Creates the cons cell with the given head term and tail list.
    pub fn create_list_cons(&self, head: &ATermRef<'_>, tail: &ATermRef<'_>) -> ATerm {
        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_list_cons(head, tail);

        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        result
    }

    /// Creates the empty list.
    pub fn create_empty_list(&self) -> ATerm {
        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, _inserted) = guard.create_empty_list();

        self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) })
    }

    /// Creates a term with the arguments produced by the iterator.
    pub fn create_term_iter<I, T>(&self, symbol: &impl Symb, args: I) -> ATerm
    where
        I: IntoIterator<Item = T>,
        T: Term,
    {
        let mut arguments = self.tmp_arguments.borrow_mut();
        arguments.clear();
        for arg in args {
            unsafe {
                arguments.push(ATermRef::from_index(arg.shared()));
            }
        }

        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_appl(symbol, &arguments);

        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        result
    }

    /// Creates a term with the arguments produced by the fallible iterator.
    pub fn try_create_term_iter<I, T>(&self, symbol: &impl Symb, args: I) -> Result<ATerm, TermStoreError>
    where
        I: IntoIterator<Item = Result<T, TermStoreError>>,
        T: Term,
    {
        let mut arguments = self.tmp_arguments.borrow_mut();
        arguments.clear();
        for arg in args {
            unsafe {
                arguments.push(ATermRef::from_index(arg?.shared()));
            }
        }

        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");

        let (index, inserted) = guard.create_appl(symbol, &arguments);

        let result = self.protect_guard(guard, &unsafe { ATermRef::from_index(&index) });

        if inserted {
            self.trigger_garbage_collection();
        }

        Ok(result)
    }

    /// Creates a function symbol.
    pub fn create_symbol(&self, name: impl Into<String> + AsRef<str>, arity: usize, quoted: bool) -> Symbol {
        self.term_pool
            .read_recursive()
            .expect("The global term pool lock failed")
            .create_symbol(name, arity, quoted, |index| unsafe {
                self.protect_symbol(&SymbolRef::from_index(&index))
            })
    }

    /// Protects the term by adding its index to the protection set.
    pub fn protect(&self, term: &ATermRef<'_>) -> ATerm {
        let root = self.lock_protection_set().protection_set.protect(term.shared().copy());

        let result = ATerm::from_index(term.shared(), root);

        debug_trace!("Protected term {:?}, root {:?}", term, root);

        result
    }

    /// Protects the term while the global term pool is already locked.
    pub fn protect_guard(&self, _guard: RecursiveLockReadGuard<'_, GlobalTermPool>, term: &ATermRef<'_>) -> ATerm {
        // SAFETY: The global term pool is locked, so the protection set can
        // be accessed.
        let root = unsafe { &mut *self.protection_set.get() }
            .protection_set
            .protect(term.shared().copy());

        let result = ATerm::from_index(term.shared(), root);

        debug_trace!("Protected term {:?}, root {:?}", term, root);

        result
    }

    /// Unprotects a term from this thread's protection set.
    pub fn drop(&self, term: &ATerm) {
        self.lock_protection_set().protection_set.unprotect(term.root());

        debug_trace!("Unprotected term {:?}, root {:?}", term, term.root());
    }

    /// Protects a container in this thread's container protection set.
    pub fn protect_container(&self, container: Arc<dyn Markable + Send + Sync>) -> ProtectionIndex {
        let root = self.lock_protection_set().container_protection_set.protect(container);

        debug_trace!("Protected container, root {:?}", root);

        root
    }

    /// Unprotects a container from this thread's container protection set.
    pub fn drop_container(&self, root: ProtectionIndex) {
        self.lock_protection_set().container_protection_set.unprotect(root);

        debug_trace!("Unprotected container, root {:?}", root);
    }

    /// Protects a symbol from garbage collection.
    pub fn protect_symbol(&self, symbol: &SymbolRef<'_>) -> Symbol {
        let result = unsafe {
            Symbol::from_index(
                symbol.shared(),
                self.lock_protection_set()
                    .symbol_protection_set
                    .protect(symbol.shared().copy()),
            )
        };

        debug_trace!("Protected symbol {}, root {:?}", symbol, result.root());

        result
    }

    /// Unprotects a symbol, allowing it to be garbage collected.
    pub fn drop_symbol(&self, symbol: &mut Symbol) {
        self.lock_protection_set().symbol_protection_set.unprotect(symbol.root());
    }

    /// Returns the reserved symbol heading integer terms.
    pub fn int_symbol(&self) -> &SymbolRef<'_> {
        &self.int_symbol
    }

    /// Returns the reserved list constructor symbol.
    pub fn list_symbol(&self) -> &SymbolRef<'_> {
        &self.list_symbol
    }

    /// Returns the reserved empty list symbol.
    pub fn empty_list_symbol(&self) -> &SymbolRef<'_> {
        &self.empty_list_symbol
    }

    /// Enables or disables automatic garbage collection.
    pub fn automatic_garbage_collection(&self, enabled: bool) {
        let mut guard = self.term_pool.write().expect("The global term pool lock failed");
        guard.automatic_garbage_collection(enabled);
    }

    /// Runs a full garbage collection immediately.
    pub fn collect_garbage(&self) {
        let mut guard = self.term_pool.write().expect("The global term pool lock failed");
        guard.collect_garbage();
    }

    /// Returns access to the shared protection set.
    pub(crate) fn get_protection_set(&self) -> &Arc<UnsafeCell<SharedTermProtection>> {
        &self.protection_set
    }

    /// Returns a reference to the global term pool.
    pub fn term_pool(&self) -> &RecursiveLock<GlobalTermPool> {
        &self.term_pool
    }

    /// This triggers the global garbage collection based on heuristics.
    fn trigger_garbage_collection(&self) {
        let mut value = self.garbage_collection_counter.get();
        value = value.saturating_sub(1);

        if value == 0 && !self.term_pool.is_locked() {
            // Collect and acquire a new countdown.
            value = self
                .term_pool
                .write()
                .expect("The global term pool lock failed")
                .trigger_garbage_collection();
        }

        self.garbage_collection_counter.set(value);
    }

    /// The protection set is locked by the global read-write lock.
    fn lock_protection_set(&self) -> ProtectionSetGuard<'_> {
        let guard = self.term_pool.read_recursive().expect("The global term pool lock failed");
        let protection_set = unsafe { &mut *self.protection_set.get() };

        ProtectionSetGuard::new(guard, protection_set)
    }
}

impl Drop for ThreadTermPool {
    fn drop(&mut self) {
        let mut write = self.term_pool.write().expect("The global term pool lock failed");

        debug!("{}", write.metrics());
        write.deregister_thread_pool(unsafe { &*self.protection_set.get() }.index);

        debug!("{}", unsafe { &*self.protection_set.get() }.metrics());
        debug!(
            "Acquired {} read locks and {} write locks",
            self.term_pool.read_recursive_call_count(),
            self.term_pool.write_call_count()
        )
    }
}

/// Mutable access to the thread's protection sets, held together with the
/// shared lock that keeps garbage collection out.
struct ProtectionSetGuard<'a> {
    _guard: RecursiveLockReadGuard<'a, GlobalTermPool>,
    object: &'a mut SharedTermProtection,
}

impl ProtectionSetGuard<'_> {
    fn new<'a>(
        guard: RecursiveLockReadGuard<'a, GlobalTermPool>,
        object: &'a mut SharedTermProtection,
    ) -> ProtectionSetGuard<'a> {
        ProtectionSetGuard { _guard: guard, object }
    }
}

impl Deref for ProtectionSetGuard<'_> {
    type Target = SharedTermProtection;

    fn deref(&self) -> &Self::Target {
        self.object
    }
}

impl DerefMut for ProtectionSetGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.object
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use maxterm_utilities::test_logger;

    use crate::Term;

    use super::*;

    #[test]
    fn test_thread_local_protection() {
        test_logger();

        thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    let symbol = Symbol::new("thread_protection_test", 0);
                    let term = ATerm::constant(&symbol);
                    let protected = term.protect();

                    THREAD_TERM_POOL.with_borrow(|tp| {
                        assert!(tp.lock_protection_set().protection_set.contains_root(protected.root()));
                    });

                    let root = protected.root();
                    drop(protected);

                    THREAD_TERM_POOL.with_borrow(|tp| {
                        assert!(!tp.lock_protection_set().protection_set.contains_root(root));
                    });
                });
            }
        });
    }

    #[test]
    fn test_create_term() {
        test_logger();

        let f = Symbol::new("thread_create_f", 2);
        let g = Symbol::new("thread_create_g", 1);

        let t = THREAD_TERM_POOL.with_borrow(|tp| {
            let a = tp.create_constant(&Symbol::new("thread_create_a", 0));
            let b = tp.create_constant(&Symbol::new("thread_create_b", 0));
            let ga = tp.create_term(&g, &[a]);
            tp.create_term(&f, &[ga, b])
        });

        assert_eq!(t.head_symbol().name(), "thread_create_f");
        assert_eq!(t.arg(0).head_symbol().name(), "thread_create_g");
        assert_eq!(t.arg(1).head_symbol().name(), "thread_create_b");
    }

    #[test]
    fn test_create_term_iter() {
        test_logger();

        let f = Symbol::new("thread_iter_f", 3);
        let a = THREAD_TERM_POOL.with_borrow(|tp| tp.create_constant(&Symbol::new("thread_iter_a", 0)));

        let t = THREAD_TERM_POOL.with_borrow(|tp| tp.create_term_iter(&f, (0..3).map(|_| a.copy())));

        assert_eq!(t.head_symbol().name(), "thread_iter_f");
        assert_eq!(t.arguments().len(), 3);
        for arg in t.arguments() {
            assert_eq!(arg, a.copy());
        }
    }
}
