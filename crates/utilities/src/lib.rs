#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

#[macro_use]
mod cast;

mod error;
mod format;
mod generational_index;
mod no_hasher;
mod phantom;
mod random;
mod test_logger;
mod trace;

pub use error::*;
pub use format::*;
pub use generational_index::*;
pub use no_hasher::*;
pub use phantom::*;
pub use random::*;
pub use test_logger::*;
