use crate::net::TcpStream;

use std::io::{self, Read, Write};
use std::net::Shutdown;

/// The raw byte stream under a [`SecureChannel`](super::SecureChannel).
///
/// Reads and writes must be non-blocking: an unready stream reports
/// [`io::ErrorKind::WouldBlock`]. `Ok(0)` from `read` means the peer
/// closed its side.
pub trait Transport: Read + Write + Send + 'static {
    /// Shuts the stream down in both directions.
    ///
    /// This must not release the underlying descriptor: the dispatcher may
    /// still hold it in `epoll` and only the owner's drop closes it.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
