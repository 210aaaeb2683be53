use std::fmt;

/// Formats a number with thousands separators, used in the pool metrics
/// reports where counts easily run into the millions.
pub struct CountFormatter<T: ToString>(pub T);

impl<T: ToString> fmt::Display for CountFormatter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();

        let len = digits.len();
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (len - i) % 3 == 0 {
                write!(f, ",")?;
            }
            write!(f, "{ch}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_formatter() {
        assert_eq!(format!("{}", CountFormatter(0)), "0");
        assert_eq!(format!("{}", CountFormatter(999)), "999");
        assert_eq!(format!("{}", CountFormatter(1000)), "1,000");
        assert_eq!(format!("{}", CountFormatter(1234567)), "1,234,567");
    }
}
