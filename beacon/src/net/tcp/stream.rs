use crate::reactor::poller::platform::{sys_close, sys_read, sys_shutdown, sys_write};

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking TCP connection accepted by a [`TcpListener`].
///
/// `TcpStream` owns its file descriptor and closes it on drop. Reads and
/// writes never block: when the socket is not ready they fail with
/// [`io::ErrorKind::WouldBlock`], and the caller waits for readiness
/// through the dispatcher.
///
/// [`TcpListener`]: super::listener::TcpListener
#[derive(Debug)]
pub struct TcpStream {
    fd: RawFd,
}

impl TcpStream {
    /// Wraps an already connected, non-blocking socket.
    ///
    /// The stream takes ownership of `fd`.
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Shuts down the read, write, or both halves of this connection.
    ///
    /// The descriptor stays open until the stream is dropped.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.fd, how)
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys_read(self.fd, buf)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys_write(self.fd, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpStream {
    /// Closes the socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
