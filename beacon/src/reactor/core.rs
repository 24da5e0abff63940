use super::event::Ready;
use super::poller::common::Interest;
use super::poller::{Events, Poller};
use super::registration::{Flow, Handler, Registration, Token};
use crate::runtime::{Job, PoolConfig, Submitted, WorkerPool};
use crate::utils::{Slab, lock};

use std::io;
use std::os::fd::RawFd;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

/// Maximum number of readiness events harvested per `epoll_wait`.
const EVENT_CAPACITY: usize = 256;

/// Initial number of registration slots.
const INITIAL_SLOTS: usize = 64;

/// Readiness dispatcher.
///
/// The `Dispatcher` owns an `epoll` instance, a slab of registrations and
/// a [`WorkerPool`]. A dedicated thread (`beacon-dispatcher`) waits for
/// readiness; every fired registration is disarmed and its handler is
/// submitted to the pool as one job. When the handler returns, the job
/// re-arms the registration with the interest the handler asked for, or
/// cancels it.
///
/// A handler never runs on two threads at once:
/// - the kernel side is armed with `EPOLLONESHOT`,
/// - the interest set is swapped to empty before dispatch and only the
///   thread that observed it non-empty submits the job,
/// - the registration is re-armed only after the handler returned.
pub struct Dispatcher<H: Handler> {
    shared: Arc<Shared<H>>,
    pool: Arc<WorkerPool<Dispatch<H>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// State reachable from the event loop, the jobs and the public API.
struct Shared<H> {
    poller: Poller,
    registrations: Mutex<Slab<Arc<Registration<H>>>>,

    /// Registration gate. Writers take it, wake the poller, then touch
    /// `epoll`; the event loop takes and releases it once per iteration.
    gate: Mutex<()>,

    shutdown: AtomicBool,

    /// Jobs that found their handler already locked by another job.
    #[cfg(test)]
    contended: std::sync::atomic::AtomicUsize,
}

impl<H: Handler> Dispatcher<H> {
    /// Starts the worker pool and the event-loop thread.
    pub fn spawn(config: PoolConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            poller: Poller::new()?,
            registrations: Mutex::new(Slab::new(INITIAL_SLOTS)),
            gate: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            #[cfg(test)]
            contended: std::sync::atomic::AtomicUsize::new(0),
        });

        let pool = Arc::new(WorkerPool::new(config)?);

        let event_loop = {
            let shared = shared.clone();
            let pool = pool.clone();

            thread::Builder::new()
                .name("beacon-dispatcher".into())
                .spawn(move || shared.run(&pool))?
        };

        Ok(Self {
            shared,
            pool,
            event_loop: Mutex::new(Some(event_loop)),
        })
    }

    /// Registers `fd` for `interest` and takes ownership of `handler`.
    ///
    /// The handler is told its token through [`Handler::bind`] before the
    /// descriptor is armed. Callable from any thread.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `interest` is empty,
    /// - `NotConnected` once the dispatcher is shutting down,
    /// - the `epoll_ctl` error otherwise; the handler is dropped.
    pub fn register(&self, fd: RawFd, interest: Interest, handler: H) -> io::Result<Token> {
        if interest.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot register an empty interest",
            ));
        }

        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "dispatcher is shut down",
            ));
        }

        let _gate = lock(&self.shared.gate);
        self.shared.poller.wake();

        let mut registrations = lock(&self.shared.registrations);
        let index = registrations.insert_with(move |index| {
            let mut handler = handler;
            handler.bind(Token(index));
            Arc::new(Registration::new(Token(index), fd, interest, handler))
        });

        if let Err(e) = self.shared.poller.register(fd, index, interest) {
            registrations.remove(index);
            return Err(e);
        }

        trace!(token = index, fd, ?interest, "registered");
        Ok(Token(index))
    }

    /// Re-arms an idle registration for `interest`.
    ///
    /// Handlers do not need this: returning [`Flow::Await`] re-arms them.
    pub fn rearm(&self, token: Token, interest: Interest) -> io::Result<()> {
        let registration = self.shared.lookup(token).ok_or_else(|| unknown(token))?;
        self.shared.rearm(&registration, interest)
    }

    /// Removes a registration and drops its handler once no job holds it.
    pub fn cancel(&self, token: Token) -> io::Result<()> {
        if self.shared.cancel(token, None) {
            Ok(())
        } else {
            Err(unknown(token))
        }
    }

    /// Number of live registrations.
    pub fn connections(&self) -> usize {
        lock(&self.shared.registrations).len()
    }

    /// Stops the event loop, drains the pool and drops every registration.
    ///
    /// Calling it more than once is harmless.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.poller.wake();
        if let Some(handle) = lock(&self.event_loop).take() {
            let _ = handle.join();
        }

        self.pool.shutdown();

        let remaining = lock(&self.shared.registrations).drain();
        for registration in &remaining {
            let _ = self.shared.poller.deregister(registration.fd);
        }

        debug!(closed = remaining.len(), "dispatcher stopped");
    }
}

impl<H: Handler> Drop for Dispatcher<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<H: Handler> Shared<H> {
    /// Event loop body, run on the `beacon-dispatcher` thread.
    fn run(self: &Arc<Self>, pool: &WorkerPool<Dispatch<H>>) {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poller.poll(&mut events, None) {
                error!(error = %e, "epoll_wait failed, dispatcher exiting");
                break;
            }

            for event in events.iter() {
                let Some(registration) = self.lookup(Token(event.token)) else {
                    continue;
                };

                // Someone else already owns this firing.
                if registration.disarm().is_empty() {
                    continue;
                }

                let job = Dispatch {
                    registration,
                    shared: self.clone(),
                    ready: event.ready,
                };

                if pool.submit(job) == Submitted::RanInline {
                    trace!(token = event.token, "dispatched on the event loop");
                }
            }

            drop(lock(&self.gate));
        }
    }

    fn lookup(&self, token: Token) -> Option<Arc<Registration<H>>> {
        lock(&self.registrations).get(token.0).cloned()
    }

    /// Re-arms `registration` if it still owns its slot. A registration
    /// cancelled while its job ran is left alone, since the slot may
    /// already belong to a new connection.
    fn rearm(&self, registration: &Arc<Registration<H>>, interest: Interest) -> io::Result<()> {
        let _gate = lock(&self.gate);
        self.poller.wake();

        let registrations = lock(&self.registrations);
        if !owns_slot(&registrations, registration) {
            trace!(token = %registration.token, "stale re-arm ignored");
            return Ok(());
        }

        registration.arm(interest);
        self.poller
            .reregister(registration.fd, registration.token.0, interest)
    }

    /// Removes the registration at `token`. With `expected`, only that
    /// registration is removed, never a successor reusing the slot.
    ///
    /// Returns `false` if nothing was removed.
    fn cancel(&self, token: Token, expected: Option<&Arc<Registration<H>>>) -> bool {
        let _gate = lock(&self.gate);
        self.poller.wake();

        let mut registrations = lock(&self.registrations);
        if expected.is_some_and(|registration| !owns_slot(&registrations, registration)) {
            return false;
        }

        let Some(fd) = registrations.get(token.0).map(|r| r.fd) else {
            return false;
        };

        if let Err(e) = self.poller.deregister(fd) {
            debug!(%token, error = %e, "epoll deregistration failed");
        }

        registrations.remove(token.0);
        trace!(%token, "cancelled");
        true
    }
}

/// One invocation of a registration's handler, as queued on the pool.
pub(crate) struct Dispatch<H> {
    registration: Arc<Registration<H>>,
    shared: Arc<Shared<H>>,
    ready: Ready,
}

impl<H: Handler> Job for Dispatch<H> {
    fn run(self) {
        let token = self.registration.token;

        let outcome = {
            let mut handler = match self.registration.handler.try_lock() {
                Ok(handler) => handler,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    error!(%token, "handler dispatched while already running");
                    #[cfg(test)]
                    self.shared.contended.fetch_add(1, Ordering::SeqCst);
                    lock(&self.registration.handler)
                }
            };
            catch_unwind(AssertUnwindSafe(|| handler.run(self.ready)))
        };

        let flow = outcome.unwrap_or_else(|_| {
            error!(%token, "handler panicked, closing connection");
            Flow::Close
        });

        match flow {
            Flow::Await(interest) if !interest.is_empty() => {
                if let Err(e) = self.shared.rearm(&self.registration, interest) {
                    warn!(%token, error = %e, "re-arm failed, closing connection");
                    self.shared.cancel(token, Some(&self.registration));
                }
            }
            _ => {
                self.shared.cancel(token, Some(&self.registration));
            }
        }

        self.shared.poller.wake();
    }
}

fn owns_slot<H>(
    registrations: &Slab<Arc<Registration<H>>>,
    registration: &Arc<Registration<H>>,
) -> bool {
    registrations
        .get(registration.token.0)
        .is_some_and(|current| Arc::ptr_eq(current, registration))
}

fn unknown(token: Token) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no registration for token {token}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc::{Receiver, Sender, channel};
    use std::time::Duration;

    /// Echoes everything it reads and reports each chunk.
    struct Echo {
        stream: UnixStream,
        seen: Sender<Vec<u8>>,
        token: Option<Token>,
    }

    impl Handler for Echo {
        fn bind(&mut self, token: Token) {
            self.token = Some(token);
        }

        fn run(&mut self, _ready: Ready) -> Flow {
            let mut buf = [0u8; 64];
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => return Flow::Close,
                    Ok(n) => {
                        self.stream.write_all(&buf[..n]).unwrap();
                        self.seen.send(buf[..n].to_vec()).unwrap();
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Flow::Await(Interest::READABLE);
                    }
                    Err(_) => return Flow::Close,
                }
            }
        }
    }

    fn echo_pair(seen: Sender<Vec<u8>>) -> (Echo, UnixStream) {
        let (server, client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        (
            Echo {
                stream: server,
                seen,
                token: None,
            },
            client,
        )
    }

    #[test]
    fn handler_is_rearmed_after_each_invocation() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();
        let (tx, rx) = channel();
        let (echo, mut client) = echo_pair(tx);
        let fd = echo.stream.as_raw_fd();

        dispatcher.register(fd, Interest::READABLE, echo).unwrap();

        for round in 0..5u8 {
            client.write_all(&[round]).unwrap();
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), vec![round]);

            let mut back = [0u8; 1];
            client.read_exact(&mut back).unwrap();
            assert_eq!(back[0], round);
        }

        assert_eq!(dispatcher.connections(), 1);
    }

    #[test]
    fn peer_close_cancels_the_registration() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();
        let (tx, _rx) = channel();
        let (echo, client) = echo_pair(tx);
        let fd = echo.stream.as_raw_fd();

        let token = dispatcher.register(fd, Interest::READABLE, echo).unwrap();
        drop(client);

        for _ in 0..200 {
            if dispatcher.connections() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(dispatcher.connections(), 0);
        assert_eq!(
            dispatcher.cancel(token).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn empty_interest_is_rejected() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();
        let (tx, _rx) = channel();
        let (echo, _client) = echo_pair(tx);
        let fd = echo.stream.as_raw_fd();

        let err = dispatcher.register(fd, Interest::NONE, echo).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn register_after_shutdown_fails() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();
        dispatcher.shutdown();

        let (tx, _rx) = channel();
        let (echo, _client) = echo_pair(tx);
        let fd = echo.stream.as_raw_fd();

        let err = dispatcher.register(fd, Interest::READABLE, echo).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    struct Panics;

    impl Handler for Panics {
        fn run(&mut self, _ready: Ready) -> Flow {
            panic!("boom");
        }
    }

    #[test]
    fn panicking_handler_is_cancelled() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();
        let (server, mut client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();

        dispatcher
            .register(server.as_raw_fd(), Interest::READABLE, Panics)
            .unwrap();
        client.write_all(b"x").unwrap();

        for _ in 0..200 {
            if dispatcher.connections() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(dispatcher.connections(), 0);
    }

    /// Parks inside `run` until released, then asks to be re-armed.
    struct Parked {
        _stream: UnixStream,
        entered: Sender<()>,
        release: Receiver<()>,
        dropped: Sender<()>,
    }

    impl Handler for Parked {
        fn run(&mut self, _ready: Ready) -> Flow {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            Flow::Await(Interest::READABLE)
        }
    }

    impl Drop for Parked {
        fn drop(&mut self) {
            let _ = self.dropped.send(());
        }
    }

    #[test]
    fn cancelled_job_leaves_the_reused_slot_alone() {
        let dispatcher = Dispatcher::spawn(PoolConfig::new().workers(2)).unwrap();

        let (server, mut client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let (entered_tx, entered) = channel();
        let (release, release_rx) = channel();
        let (dropped_tx, dropped) = channel();
        let fd = server.as_raw_fd();

        let parked = Parked {
            _stream: server,
            entered: entered_tx,
            release: release_rx,
            dropped: dropped_tx,
        };
        let old = dispatcher.register(fd, Interest::READABLE, parked).unwrap();

        client.write_all(b"x").unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        dispatcher.cancel(old).unwrap();

        let (tx, rx) = channel();
        let (echo, mut echo_client) = echo_pair(tx);
        let fd = echo.stream.as_raw_fd();
        let new = dispatcher.register(fd, Interest::READABLE, echo).unwrap();
        assert_eq!(new, old);

        release.send(()).unwrap();
        dropped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(dispatcher.connections(), 1);

        echo_client.write_all(b"y").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"y");
        let mut back = [0u8; 1];
        echo_client.read_exact(&mut back).unwrap();
        assert_eq!(&back, b"y");
    }

    /// Echo that lingers inside `run` to widen any overlap window.
    struct Slow {
        stream: UnixStream,
    }

    impl Handler for Slow {
        fn run(&mut self, _ready: Ready) -> Flow {
            thread::sleep(Duration::from_micros(200));

            let mut buf = [0u8; 256];
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => return Flow::Close,
                    Ok(n) => {
                        if self.stream.write_all(&buf[..n]).is_err() {
                            return Flow::Close;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Flow::Await(Interest::READABLE);
                    }
                    Err(_) => return Flow::Close,
                }
            }
        }
    }

    #[test]
    fn handler_is_never_dispatched_twice() {
        let dispatcher =
            Dispatcher::spawn(PoolConfig::new().workers(4).queue_capacity(8)).unwrap();

        let clients: Vec<UnixStream> = (0..16)
            .map(|_| {
                let (server, client) = UnixStream::pair().unwrap();
                server.set_nonblocking(true).unwrap();
                let fd = server.as_raw_fd();
                dispatcher
                    .register(fd, Interest::READABLE, Slow { stream: server })
                    .unwrap();
                client
            })
            .collect();

        let handles: Vec<_> = clients
            .into_iter()
            .map(|mut client| {
                thread::spawn(move || {
                    for round in 0..40u8 {
                        // Two writes per round so readiness keeps firing
                        // while the handler may still be running.
                        client.write_all(&[round]).unwrap();
                        client.write_all(&[round]).unwrap();

                        let mut echo = [0u8; 2];
                        client.read_exact(&mut echo).unwrap();
                        assert_eq!(echo, [round, round]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(dispatcher.shared.contended.load(Ordering::SeqCst), 0);
    }
}
