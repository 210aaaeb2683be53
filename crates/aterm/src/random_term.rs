#![forbid(unsafe_code)]

use rand::Rng;
use rustc_hash::FxHashSet;

use crate::ATerm;
use crate::Symbol;
use crate::storage::THREAD_TERM_POOL;

/// Creates a random term built from the given symbols and constants. Performs
/// `iterations` constructions, where every construction picks its arguments
/// from the previously built subterms.
pub fn random_term(rng: &mut impl Rng, symbols: &[(String, usize)], constants: &[String], iterations: usize) -> ATerm {
    use rand::prelude::IteratorRandom;

    debug_assert!(!constants.is_empty(), "Constants are needed to be able to create a term");

    let mut subterms = THREAD_TERM_POOL.with_borrow(|tp| {
        FxHashSet::<ATerm>::from_iter(constants.iter().map(|name| {
            let symbol = tp.create_symbol(name, 0, false);
            tp.create_constant(&symbol)
        }))
    });

    let mut result = None;
    for _ in 0..iterations {
        let (symbol, arity) = symbols.iter().choose(rng).unwrap();

        let mut arguments = vec![];
        for _ in 0..*arity {
            arguments.push(subterms.iter().choose(rng).unwrap().clone());
        }

        let symbol = Symbol::new(symbol, *arity);
        let term = ATerm::with_args(&symbol, &arguments);

        // Make this term available as another subterm that can be used.
        subterms.insert(term.clone());

        result = Some(term);
    }

    result.expect("At least one iteration was performed")
}
