//! TCP networking primitives.
//!
//! This module provides the socket types the server is built on and the
//! accept loop that feeds new connections to the dispatcher:
//! - [`TcpListener`]: blocking listener with a configurable backlog,
//! - [`TcpStream`]: non-blocking connection owning its descriptor,
//! - [`Acceptor`]: the `beacon-acceptor` thread.

mod acceptor;
mod tcp;

pub use acceptor::Acceptor;
pub use tcp::listener::TcpListener;
pub use tcp::stream::TcpStream;
