//! # Beacon
//!
//! **Beacon** is a TLS session server for location sharing. Clients log in,
//! report where they are and read the last known positions of the people
//! in their circles.
//!
//! Connections are multiplexed by a readiness dispatcher rather than one
//! thread per client:
//!
//! - a blocking **acceptor** thread hands new sockets to the dispatcher,
//! - the **dispatcher** waits on `epoll` and submits every ready connection
//!   to a bounded **worker pool**, one job at a time per connection,
//! - each connection is a [`Session`](session::Session): a small state
//!   machine that steps a non-blocking [`SecureChannel`](tls::SecureChannel),
//!   decodes length-prefixed request frames and writes the replies back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use beacon::config::ServerConfig;
//! use beacon::directory::MemoryDirectory;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::load(Path::new("beacon.toml"))?;
//! config.validate()?;
//!
//! let tls = beacon::tls::load_server_config(
//!     config.tls.cert.as_deref().unwrap(),
//!     config.tls.key.as_deref().unwrap(),
//!     config.tls.client_ca.as_deref(),
//! )?;
//!
//! let server = beacon::server::start(&config, tls, Arc::new(MemoryDirectory::new()))?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration
//! - [`directory`] — Users, circles and locations behind the [`Directory`](directory::Directory) trait
//! - [`net`] — TCP listener, streams and the accept loop
//! - [`protocol`] — Frames, requests and replies
//! - [`reactor`] — The `epoll` dispatcher
//! - [`runtime`] — The worker pool
//! - [`server`] — Wiring everything together
//! - [`session`] — Per-connection state machine and request service
//! - [`tls`] — Non-blocking TLS channel and certificate loading

mod utils;

pub mod config;
pub mod directory;
pub mod net;
pub mod protocol;
pub mod reactor;
pub mod runtime;
pub mod server;
pub mod session;
pub mod tls;

pub use utils::ByteBuffer;
