/// Returns the payload of the given enum variant, and panics when the value is
/// any other variant.
///
/// Usage: cast!(value, Enum::Variant)
#[macro_export]
macro_rules! cast {
    ($target: expr, $pat: path) => {{
        if let $pat(a) = $target {
            a
        } else {
            panic!("mismatched variant when casting to {}", stringify!($pat));
        }
    }};
}
