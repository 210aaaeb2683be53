use std::hash::BuildHasher;
use std::hash::Hasher;

/// A hasher that returns the value given to `write_u64` unchanged. Used for
/// tables whose entries already store a precomputed hash.
pub struct NoHasher(u64);

impl Hasher for NoHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _bytes: &[u8]) {
        // Only write_u64 carries a meaningful value.
        debug_assert!(false, "NoHasher only supports write_u64");
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

/// Builder for [NoHasher], starting from a hash of zero.
#[derive(Clone, Default)]
pub struct NoHasherBuilder;

impl BuildHasher for NoHasherBuilder {
    type Hasher = NoHasher;

    fn build_hasher(&self) -> Self::Hasher {
        NoHasher(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_hasher_passthrough() {
        let mut hasher = NoHasherBuilder.build_hasher();
        assert_eq!(hasher.finish(), 0);

        hasher.write_u64(0xdead_beef);
        assert_eq!(hasher.finish(), 0xdead_beef);
    }
}
