/// Initialises logging for tests. Safe to call from every test since repeated
/// initialisation is ignored; tests run in parallel within one process.
pub fn test_logger() {
    if cfg!(not(feature = "maxterm_miri")) {
        let _ = env_logger::builder().is_test(true).try_init();
    }
}
