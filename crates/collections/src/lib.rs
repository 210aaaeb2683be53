#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod id_map;
mod indexed_set;
mod indexed_table;
mod protection_set;

pub use id_map::*;
pub use indexed_set::*;
pub use indexed_table::*;
pub use protection_set::*;
