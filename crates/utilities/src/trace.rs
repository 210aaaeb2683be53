//! Tracing that is compiled out unless the maxterm_debug-trace feature is set.

/// Forwards to `log::trace!` when the maxterm_debug-trace feature is enabled,
/// and expands to nothing otherwise.
#[macro_export]
#[cfg(feature = "maxterm_debug-trace")]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        {
            log::trace!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "maxterm_debug-trace"))]
macro_rules! debug_trace {
    ($($arg:tt)*) => {{}};
}
