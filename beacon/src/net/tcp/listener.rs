use super::stream::TcpStream;
use crate::reactor::poller::platform::{
    sys_accept, sys_close, sys_listen, sys_local_addr, sys_shutdown,
};

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};

/// A blocking TCP listener.
///
/// `TcpListener` is driven by the acceptor thread, which parks in
/// [`accept`](Self::accept). Accepted streams are non-blocking and ready
/// to be registered with the dispatcher.
#[derive(Debug)]
pub struct TcpListener {
    fd: RawFd,
}

impl TcpListener {
    /// Binds to `address` and starts listening with the given backlog.
    ///
    /// `SO_REUSEADDR` is enabled. An IPv6 address also accepts IPv4
    /// clients. Port 0 picks an ephemeral port, see
    /// [`local_addr`](Self::local_addr).
    pub fn bind(address: SocketAddr, backlog: u32) -> io::Result<Self> {
        Ok(Self {
            fd: sys_listen(address, backlog)?,
        })
    }

    /// Blocks until a client connects.
    ///
    /// Fails with the OS error once the listener has been shut down.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, peer) = sys_accept(self.fd)?;

        Ok((TcpStream::from_raw(fd), peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_local_addr(self.fd)
    }

    /// Stops listening, waking any thread blocked in [`accept`](Self::accept).
    pub fn shutdown(&self) -> io::Result<()> {
        sys_shutdown(self.fd, Shutdown::Both)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn loopback() -> TcpListener {
        TcpListener::bind("127.0.0.1:0".parse().unwrap(), 8).expect("Failed to bind listener")
    }

    #[test]
    fn shutdown_unblocks_accept() {
        let listener = Arc::new(loopback());

        let waiting = listener.clone();
        let handle = thread::spawn(move || waiting.accept().map(|_| ()));

        thread::sleep(Duration::from_millis(50));
        listener.shutdown().unwrap();

        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn accepted_stream_reads_and_writes() {
        let listener = loopback();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let (mut stream, _) = listener.accept().unwrap();
        client.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        let mut read = 0;
        while read < 4 {
            match stream.read(&mut buf[read..]) {
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
                Err(e) => panic!("read failed: {e}"),
            }
        }
        assert_eq!(&buf, b"ping");

        stream.write_all(b"pong").unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
