use core::error::Error;
use core::fmt::Debug;
use core::fmt::Display;

/// The workspace-wide error type. A blanket [`From`] impl exists for every type
/// implementing Rust's [`Error`], so it works as a "catch all" error at the
/// fallible seams of the term library. A backtrace is captured on creation and
/// printed by the [`Debug`] impl.
pub struct TermStoreError {
    inner: Box<ErrorRepr>,
}

impl TermStoreError {
    /// Attempts to downcast the underlying error to the given type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.error.downcast_ref::<E>()
    }
}

/// Boxed representation so that `Result<T, TermStoreError>` carries a thin
/// pointer instead of a fat one. Errors are a cold path, the extra indirection
/// does not matter.
struct ErrorRepr {
    error: Box<dyn Error + Send + Sync + 'static>,
    /// Captured at the point the error was converted.
    backtrace: std::backtrace::Backtrace,
}

// NOTE: the indirect bound gives us From<&str> and From<String> as well.
impl<E> From<E> for TermStoreError
where
    Box<dyn Error + Send + Sync + 'static>: From<E>,
{
    #[cold]
    fn from(error: E) -> Self {
        TermStoreError {
            inner: Box::new(ErrorRepr {
                error: error.into(),
                backtrace: std::backtrace::Backtrace::capture(),
            }),
        }
    }
}

impl Display for TermStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "{}", self.inner.error)
    }
}

impl Debug for TermStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "{:?}", self.inner.error)?;

        if let std::backtrace::BacktraceStatus::Captured = self.inner.backtrace.status() {
            writeln!(f, "{}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_str() {
        fn fails() -> Result<(), TermStoreError> {
            Err("the table is closed")?
        }

        let err = fails().unwrap_err();
        assert_eq!(format!("{err}"), "the table is closed\n");
    }

    #[test]
    fn test_error_downcast() {
        let io: TermStoreError = std::io::Error::other("broken").into();
        assert!(io.downcast_ref::<std::io::Error>().is_some());
    }
}
