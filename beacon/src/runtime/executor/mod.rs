//! Fixed-size thread pool with a bounded queue.
//!
//! [`core`] owns submission and shutdown; [`worker`] is the loop every
//! pool thread runs.

pub(crate) mod core;
pub(crate) mod worker;
