#![doc = include_str!("../README.md")]

mod block_allocator;
mod slice_dst;
mod stable_pointer_set;

pub use block_allocator::*;
pub use slice_dst::*;
pub use stable_pointer_set::*;
