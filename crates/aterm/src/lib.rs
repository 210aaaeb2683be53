#![doc = include_str!("../README.md")]

mod aterm;
mod aterm_int;
mod aterm_list;
mod builder;
mod markable;
mod protected;
mod random_term;
mod symbol;
mod transmutable;

pub mod storage;

pub use aterm::*;
pub use aterm_int::*;
pub use aterm_list::*;
pub use builder::*;
pub use markable::*;
pub use protected::*;
pub use random_term::*;
pub use symbol::*;
pub use transmutable::*;
