//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the server:
//! - a [`Slab`] allocator whose indices double as dispatcher tokens,
//! - a [`ByteBuffer`] with an explicit, testable growth policy.

mod buffer;
mod slab;

pub use buffer::ByteBuffer;
pub(crate) use slab::Slab;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
