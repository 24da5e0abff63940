//! Per-connection protocol handling.
//!
//! [`Session`] is the dispatcher [`Handler`](crate::reactor::Handler) for
//! one client: it drives the TLS handshake, accumulates request frames,
//! asks [`service::serve`] for a reply and writes it back.

mod core;
pub mod service;

pub use core::{Session, SessionError};
pub use service::serve;
