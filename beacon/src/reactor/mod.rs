//! Readiness dispatcher.
//!
//! This module implements the event-driven half of the server.
//! The dispatcher is responsible for:
//! - waiting for socket readiness with `epoll`,
//! - handing each ready connection to exactly one worker,
//! - re-arming or cancelling the connection when its handler returns.
//!
//! Connections plug into it through the [`Handler`] trait.

mod core;
mod event;
mod registration;

pub(crate) mod poller;

pub use core::Dispatcher;
pub use event::Ready;
pub use poller::common::Interest;
pub use registration::{Flow, Handler, Token};
