//! Marker aliases to opt out of auto traits.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::MutexGuard;

/// Makes the containing type !Sync
pub type PhantomUnsync = PhantomData<Cell<()>>;

/// Makes the containing type !Send
pub type PhantomUnsend = PhantomData<MutexGuard<'static, ()>>;
