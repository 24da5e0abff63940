//! Readiness polling on Linux.
//!
//! Descriptors are always armed with `EPOLLONESHOT`. After one event the
//! kernel reports nothing more for that descriptor, hang-ups and errors
//! included, until [`EpollPoller::reregister`] arms it again. A connection
//! therefore reaches at most one worker at a time.

use super::common::Interest;
use crate::reactor::event::{Event, Ready};
use crate::reactor::poller::Waker;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Event data of the eventfd. Slab keys never reach it.
const WAKE_TOKEN: u64 = u64::MAX;

fn check(rc: i32) -> io::Result<i32> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// An `epoll` instance plus the eventfd that interrupts it.
///
/// Every method takes `&self`, so descriptors can be armed from worker
/// threads while the dispatcher sits in `epoll_wait`.
pub(crate) struct EpollPoller {
    epoll: RawFd,
    waker: Arc<Waker>,
}

/// Reusable buffer of readiness events filled by [`EpollPoller::poll`].
pub(crate) struct Events {
    raw: Vec<epoll_event>,
    ready: Vec<Event>,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            ready: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Event> {
        self.ready.iter()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ready.len()
    }
}

impl Waker {
    /// Bumps the eventfd counter so the next or current `epoll_wait`
    /// returns.
    pub(crate) fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(self.0, &one as *const u64 as *const _, 8);
        }
    }

    fn drain(&self) {
        let mut count = 0u64;
        unsafe {
            libc::read(self.0, &mut count as *mut u64 as *mut _, 8);
        }
    }
}

impl EpollPoller {
    /// Opens the epoll instance and registers a non-blocking eventfd on it
    /// as a level-triggered wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = check(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;

        let flags = libc::EFD_NONBLOCK | libc::EFD_CLOEXEC;
        let eventfd = match check(unsafe { libc::eventfd(0, flags) }) {
            Ok(fd) => fd,
            Err(e) => {
                unsafe { libc::close(epoll) };
                return Err(e);
            }
        };

        let mut wake = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        if let Err(e) = check(unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut wake) }) {
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(e);
        }

        Ok(Self {
            epoll,
            waker: Arc::new(Waker(eventfd)),
        })
    }

    /// Interrupt a concurrent or upcoming `epoll_wait`.
    pub(crate) fn wake(&self) {
        self.waker.wake();
    }

    /// Register a file descriptor with the poller, armed for one event.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Re-arm an already registered descriptor for one more event.
    pub(crate) fn reregister(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        check(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) })?;
        Ok(())
    }

    fn control(&self, op: i32, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut flags = EPOLLONESHOT | EPOLLRDHUP;

        if interest.is_readable() {
            flags |= EPOLLIN;
        }
        if interest.is_writable() {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token as u64,
        };

        check(unsafe { epoll_ctl(self.epoll, op, fd, &mut event) })?;
        Ok(())
    }

    /// Waits for readiness, a wake-up or the timeout, whichever comes first.
    ///
    /// Wake-ups are consumed here and never show up in `events`. An
    /// interrupted wait returns with no events.
    pub(crate) fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout.map(|t| t.as_millis() as i32).unwrap_or(-1);

        events.ready.clear();
        events.raw.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                events.raw.as_mut_ptr(),
                events.raw.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // SAFETY: epoll_wait initialized the first `n` entries.
        unsafe {
            events.raw.set_len(n as usize);
        }

        for ev in &events.raw {
            let token = ev.u64;
            let flags = ev.events;

            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let hangup = flags & ((EPOLLERR | EPOLLHUP | EPOLLRDHUP) as u32) != 0;
            let readable = hangup || flags & (EPOLLIN as u32) != 0;
            let writable = hangup || flags & (EPOLLOUT as u32) != 0;

            events.ready.push(Event {
                token: token as usize,
                ready: Ready { readable, writable },
            });
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.waker.0);
            libc::close(self.epoll);
        }
    }
}
