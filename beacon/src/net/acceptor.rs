use super::tcp::listener::TcpListener;
use super::tcp::stream::TcpStream;
use crate::reactor::{Dispatcher, Handler, Interest};
use crate::utils::lock;

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Pause after a failed `accept`, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// The accept loop.
///
/// An `Acceptor` owns the listening socket and a thread named
/// `beacon-acceptor` that blocks in `accept(2)`. Each accepted connection
/// is turned into a handler by the caller-supplied factory and registered
/// with the dispatcher for read readiness.
///
/// Accept and setup failures are logged and never end the loop.
pub struct Acceptor {
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Starts accepting on `listener`.
    ///
    /// # Arguments
    ///
    /// * `listener` - Bound, listening socket
    /// * `dispatcher` - Dispatcher the connections are registered with
    /// * `make` - Builds the handler for one accepted connection
    pub fn spawn<H, F>(
        listener: TcpListener,
        dispatcher: Arc<Dispatcher<H>>,
        make: F,
    ) -> io::Result<Self>
    where
        H: Handler,
        F: Fn(TcpStream, SocketAddr) -> io::Result<H> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(listener);
        let stopped = Arc::new(AtomicBool::new(false));

        let thread = {
            let listener = listener.clone();
            let stopped = stopped.clone();

            thread::Builder::new()
                .name("beacon-acceptor".into())
                .spawn(move || accept_loop(&listener, &dispatcher, &stopped, make))?
        };

        info!(address = %local_addr, "accepting connections");

        Ok(Self {
            listener,
            local_addr,
            stopped,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the accept loop and joins its thread.
    ///
    /// Connections already registered are left to the dispatcher.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.listener.shutdown() {
            debug!(error = %e, "listener shutdown failed");
        }

        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<H, F>(
    listener: &TcpListener,
    dispatcher: &Dispatcher<H>,
    stopped: &AtomicBool,
    make: F,
) where
    H: Handler,
    F: Fn(TcpStream, SocketAddr) -> io::Result<H>,
{
    loop {
        let accepted = listener.accept();

        if stopped.load(Ordering::Acquire) {
            break;
        }

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
        };

        let fd = stream.as_raw_fd();
        let handler = match make(stream, peer) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(%peer, error = %e, "connection setup failed");
                continue;
            }
        };

        match dispatcher.register(fd, Interest::READABLE, handler) {
            Ok(token) => info!(%token, %peer, "connection accepted"),
            Err(e) => warn!(%peer, error = %e, "registration failed"),
        }
    }

    debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::{Flow, Ready};
    use crate::runtime::PoolConfig;

    use std::io::{Read, Write};

    /// Reads the client's byte, greets it, then hangs up.
    struct Greeter(TcpStream);

    impl Handler for Greeter {
        fn run(&mut self, _ready: Ready) -> Flow {
            let mut buf = [0u8; 16];
            while let Ok(n) = self.0.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }

            let _ = self.0.write_all(b"hello");
            Flow::Close
        }
    }

    #[test]
    fn accepted_connections_reach_the_dispatcher() {
        let dispatcher = Arc::new(Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();

        let acceptor = Acceptor::spawn(listener, dispatcher.clone(), |stream, _peer| {
            Ok(Greeter(stream))
        })
        .unwrap();

        for _ in 0..3 {
            let mut client = std::net::TcpStream::connect(acceptor.local_addr()).unwrap();
            client.write_all(b"?").unwrap();

            let mut greeting = Vec::new();
            client.read_to_end(&mut greeting).unwrap();
            assert_eq!(greeting, b"hello");
        }

        acceptor.stop();
        dispatcher.shutdown();
        assert_eq!(dispatcher.connections(), 0);
    }

    #[test]
    fn failed_setup_does_not_stop_the_loop() {
        let dispatcher = Arc::new(Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = attempts.clone();
        let acceptor = Acceptor::spawn(listener, dispatcher.clone(), move |stream, _peer| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(io::Error::other("refused"));
            }
            Ok(Greeter(stream))
        })
        .unwrap();

        let mut refused = std::net::TcpStream::connect(acceptor.local_addr()).unwrap();
        let mut rest = Vec::new();
        let _ = refused.read_to_end(&mut rest);
        assert!(rest.is_empty());

        let mut client = std::net::TcpStream::connect(acceptor.local_addr()).unwrap();
        client.write_all(b"?").unwrap();
        let mut greeting = Vec::new();
        client.read_to_end(&mut greeting).unwrap();
        assert_eq!(greeting, b"hello");

        drop(acceptor);
        dispatcher.shutdown();
    }
}
