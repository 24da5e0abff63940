//! TCP sockets on top of the raw syscall layer.
//!
//! It is split into:
//! - [`listener`]: the blocking listening socket,
//! - [`stream`]: non-blocking connected sockets.

pub mod listener;
pub mod stream;
