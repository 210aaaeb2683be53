use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use maxterm_aterm::ATerm;
use maxterm_aterm::ATermInt;
use maxterm_aterm::Symbol;
use maxterm_aterm::storage::THREAD_TERM_POOL;
use maxterm_utilities::test_logger;

// This test runs in its own binary on purpose: nothing here calls
// collect_garbage, so any sweep observed by the hook was started by the
// insertion countdown.
#[test]
fn test_automatic_collection_sweeps_dropped_terms() {
    test_logger();

    let cell_symbol = Symbol::new("automatic_gc_cell", 1);
    let swept = Arc::new(AtomicUsize::new(0));

    {
        let swept = swept.clone();
        THREAD_TERM_POOL.with_borrow(|tp| {
            tp.term_pool()
                .write()
                .expect("The global term pool lock failed")
                .register_deletion_hook(cell_symbol.clone(), move |_term| {
                    swept.fetch_add(1, Ordering::Relaxed);
                });
        });
    }

    // Far more insertions than the initial countdown, dropping every term
    // right away.
    for value in 0..5000 {
        let term = ATerm::with_args(&cell_symbol, &[ATermInt::new(value)]);
        drop(term);
    }

    assert!(
        swept.load(Ordering::Relaxed) > 0,
        "The insertion countdown must trigger a collection that sweeps the dropped terms"
    );
}
