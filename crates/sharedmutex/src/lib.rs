#![doc = include_str!("../README.md")]

mod bf_sharedmutex;
mod global;
mod recursive_lock;

pub use bf_sharedmutex::*;
pub use global::*;
pub use recursive_lock::*;
