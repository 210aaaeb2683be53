//! The storage layer of the term pool.
//!
//! Terms are stored maximally shared in the global term pool: structurally
//! equal terms occupy the same cell, so term equality is pointer equality.
//! The global pool performs mark and sweep garbage collection over the
//! protection sets registered by the thread-local pools.

mod gc_mutex;
mod global_term_pool;
mod shared_term;
mod symbol_pool;
mod term_storage;
mod thread_term_pool;

pub use gc_mutex::*;
pub use global_term_pool::*;
pub use shared_term::*;
pub use symbol_pool::*;
pub use thread_term_pool::*;
