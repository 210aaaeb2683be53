use std::collections::HashMap;

use maxterm_aterm::ATerm;
use maxterm_aterm::ATermInt;
use maxterm_aterm::ATermList;
use maxterm_aterm::ATermRef;
use maxterm_aterm::Protected;
use maxterm_aterm::Symbol;
use maxterm_aterm::Term;
use maxterm_aterm::random_term;
use maxterm_collections::IdMap;
use maxterm_collections::IndexedSet;
use maxterm_utilities::random_test;
use maxterm_utilities::test_logger;
use maxterm_utilities::test_threads;

fn constant(name: &str) -> ATerm {
    ATerm::constant(&Symbol::new(name, 0))
}

#[test]
fn test_term_construction_end_to_end() {
    test_logger();

    let f = Symbol::new("scenario_f", 2);
    let a = constant("scenario_a");
    let b = constant("scenario_b");

    let t = ATerm::with_args(&f, &[a.copy(), b.copy()]);

    assert_eq!(t.head_symbol().name(), "scenario_f");
    assert_eq!(t.head_symbol().arity(), 2);
    assert_eq!(t.arg(0), a.copy());
    assert_eq!(t.arg(1), b.copy());
    assert_eq!(format!("{t}"), "scenario_f(scenario_a, scenario_b)");

    let again = ATerm::with_args(&f, &[a.copy(), b.copy()]);
    assert_eq!(t.shared(), again.shared(), "Structurally equal terms share a cell");
}

#[test]
fn test_shared_subterms() {
    test_logger();

    let g = Symbol::new("scenario_shared_g", 1);
    let a = constant("scenario_shared_a");

    let ga1 = ATerm::with_args(&g, &[a.copy()]);
    let gga = ATerm::with_args(&g, &[ga1.copy()]);

    // The argument of g(g(a)) is the same cell as g(a).
    assert_eq!(gga.arg(0), ga1.copy());
    assert_eq!(gga.arg(0).shared(), ga1.shared());
}

#[test]
fn test_integer_terms_alongside_applications() {
    test_logger();

    let pair = Symbol::new("scenario_pair", 2);

    let one = ATermInt::new(1);
    let two = ATermInt::new(2);

    let t = ATerm::with_args(&pair, &[one.copy(), two.copy()]);
    assert_eq!(t.arg(0).int_value(), Some(1));
    assert_eq!(t.arg(1).int_value(), Some(2));
    assert_eq!(format!("{t}"), "scenario_pair(1, 2)");
}

#[test]
fn test_list_of_applications() {
    test_logger();

    let elems: Vec<ATerm> = (0..5)
        .map(|i| constant(&format!("scenario_list_c{i}")))
        .collect();

    let list: ATermList<ATerm> = ATermList::from_double_iter(elems.clone().into_iter());

    assert_eq!(list.len(), 5);
    for (element, expected) in list.iter().zip(elems.iter()) {
        assert_eq!(&element, expected);
    }
}

#[test]
fn test_id_map_over_term_addresses() {
    test_logger();

    // The address of a live term identifies it uniquely, so a pointer-keyed
    // map can attach payloads to terms without hashing their structure. The
    // terms stay protected in the vector while their addresses are keys.
    let mut ids = IdMap::<usize>::new();

    let mut terms = Vec::new();
    for i in 0..100 {
        let term = constant(&format!("scenario_idmap_c{i}"));
        assert_eq!(ids.put(term.index(), term.index() as u64, i), None);
        terms.push(term);
    }

    for (i, term) in terms.iter().enumerate() {
        assert_eq!(ids.get(term.index(), term.index() as u64), Some(i));
    }

    // Reinserting under the same address replaces the payload.
    assert_eq!(ids.put(terms[0].index(), terms[0].index() as u64, 1000), Some(0));
    assert_eq!(ids.get(terms[0].index(), terms[0].index() as u64), Some(1000));
    assert_eq!(ids.len(), 100);
}

#[test]
fn test_indexed_set_of_terms() {
    test_logger();

    let mut set = IndexedSet::<ATerm>::new();

    let a = constant("scenario_set_a");
    let b = constant("scenario_set_b");

    let (index_a, inserted_a) = set.insert(a.clone());
    let (index_b, _) = set.insert(b.clone());
    let (index_a2, inserted_a2) = set.insert(a.clone());

    assert!(inserted_a);
    assert!(!inserted_a2);
    assert_eq!(index_a, index_a2, "Reinsertion yields the stable index");
    assert_ne!(index_a, index_b);
    assert_eq!(set.get(index_a), Some(&a));
}

#[test]
fn test_protected_container_roundtrip() {
    test_logger();

    let f = Symbol::new("scenario_protected_f", 1);

    let mut container = Protected::<Vec<ATermRef<'static>>>::new(vec![]);

    for i in 0..10 {
        let term = ATerm::with_args(&f, &[constant(&format!("scenario_protected_c{i}"))]);
        let mut write = container.write();
        let protected = write.protect(&term);
        write.push(protected);
    }

    let read = container.read();
    assert_eq!(read.len(), 10);
    assert_eq!(read[0].head_symbol().name(), "scenario_protected_f");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_random_sharing() {
    test_logger();

    random_test(50, |rng| {
        let mut by_representation = HashMap::new();

        for _ in 0..200 {
            let term = random_term(
                rng,
                &[("scenario_rand_f".into(), 2), ("scenario_rand_g".into(), 1)],
                &["scenario_rand_a".to_string(), "scenario_rand_b".to_string()],
                16,
            );

            let representation = format!("{term}");
            if let Some(entry) = by_representation.get(&representation) {
                assert_eq!(term, *entry, "Terms with equal structure must be one cell");
            } else {
                by_representation.insert(representation, term);
            }
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_threaded_term_creation() {
    test_logger();

    test_threads(
        4,
        || (),
        |_: &mut ()| {
            let f = Symbol::new("scenario_threaded_f", 2);
            let a = constant("scenario_threaded_a");
            let b = constant("scenario_threaded_b");

            for _ in 0..1000 {
                let t = ATerm::with_args(&f, &[a.copy(), b.copy()]);
                assert_eq!(t.arg(0), a.copy());
                assert_eq!(t.arg(1), b.copy());
            }
        },
    );
}
