use super::event::Ready;
use super::poller::common::Interest;

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Identifies one registration inside a [`Dispatcher`](super::Dispatcher).
///
/// Tokens are slab indices: they are reused once a registration has been
/// cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a handler wants after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Re-arm the registration for the given readiness.
    ///
    /// An empty interest is treated like [`Flow::Close`]: a registration
    /// that waits for nothing would never run again.
    Await(Interest),

    /// Cancel the registration and drop the handler.
    Close,
}

/// The per-connection logic driven by the dispatcher.
///
/// `run` is invoked on a worker thread each time the registration fires.
/// The dispatcher guarantees that two invocations for the same
/// registration never overlap.
pub trait Handler: Send + 'static {
    /// Called once, under the registration lock, with the token the
    /// dispatcher assigned.
    fn bind(&mut self, _token: Token) {}

    /// Makes as much progress as possible without blocking.
    fn run(&mut self, ready: Ready) -> Flow;
}

/// One slab entry of the dispatcher.
///
/// `interest` is empty exactly while the handler is queued or running.
pub(crate) struct Registration<H> {
    pub(crate) token: Token,
    pub(crate) fd: RawFd,
    interest: AtomicU8,
    pub(crate) handler: Mutex<H>,
}

impl<H> Registration<H> {
    pub(crate) fn new(token: Token, fd: RawFd, interest: Interest, handler: H) -> Self {
        Self {
            token,
            fd,
            interest: AtomicU8::new(interest.bits()),
            handler: Mutex::new(handler),
        }
    }

    /// Clears the interest set and returns what it held.
    ///
    /// Only the caller that observes a non-empty previous value may
    /// dispatch the handler.
    pub(crate) fn disarm(&self) -> Interest {
        Interest::from_bits(self.interest.swap(0, Ordering::AcqRel))
    }

    pub(crate) fn arm(&self, interest: Interest) {
        self.interest.store(interest.bits(), Ordering::Release);
    }
}
