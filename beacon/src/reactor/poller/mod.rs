//! OS readiness notification and raw socket calls.
//!
//! The dispatcher blocks in [`Poller`] and is woken through its eventfd
//! whenever a worker re-arms or cancels a connection. Only Linux `epoll`
//! is supported, since one-shot arming maps directly onto its flags.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) use epoll::Events;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
