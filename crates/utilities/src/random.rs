use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::test_logger;

/// Runs a randomised test. The seed is printed so a failing run can be
/// reproduced, and can be pinned through the MAXTERM_SEED environment variable.
pub fn random_test<F>(iterations: usize, mut test_function: F)
where
    F: FnMut(&mut StdRng),
{
    test_logger();

    let seed: u64 = match std::env::var("MAXTERM_SEED") {
        Ok(seed_str) => {
            let seed = seed_str.parse::<u64>().expect("MAXTERM_SEED must be a valid u64");
            println!("seed: {seed} (fixed by MAXTERM_SEED)");
            seed
        }
        Err(_) => {
            let seed = rand::random();
            println!("random seed: {seed} (use MAXTERM_SEED=<seed> to set a fixed seed)");
            seed
        }
    };

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..iterations {
        test_function(&mut rng);
    }
}

/// Runs a randomised test with a fixed seed.
pub fn random_test_seeded<F>(seed: u64, iterations: usize, mut test_function: F)
where
    F: FnMut(&mut StdRng),
{
    test_logger();

    println!("seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..iterations {
        test_function(&mut rng);
    }
}

/// Spawns `num_threads` threads that each run `iterations` rounds of the test
/// function with their own rng, derived from a shared printed seed.
pub fn random_test_threads<C, F, G>(iterations: usize, num_threads: usize, init_function: G, test_function: F)
where
    C: Send + 'static,
    F: Fn(&mut StdRng, &mut C) + Copy + Send + Sync + 'static,
    G: Fn() -> C,
{
    test_logger();

    let seed: u64 = rand::random();
    println!("seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    let mut threads = vec![];
    for _ in 0..num_threads {
        let mut rng = StdRng::seed_from_u64(rng.next_u64());
        let mut state = init_function();
        threads.push(std::thread::spawn(move || {
            for _ in 0..iterations {
                test_function(&mut rng, &mut state);
            }
        }));
    }

    for thread in threads {
        let _ = thread.join();
    }
}

/// Spawns `num_threads` threads each running the test function once.
pub fn test_threads<C, F, G>(num_threads: usize, init_function: G, test_function: F)
where
    C: Send + 'static,
    F: Fn(&mut C) + Copy + Send + Sync + 'static,
    G: Fn() -> C,
{
    test_logger();

    let mut threads = vec![];
    for _ in 0..num_threads {
        let mut state = init_function();
        threads.push(std::thread::spawn(move || {
            test_function(&mut state);
        }));
    }

    for thread in threads {
        let _ = thread.join();
    }
}
