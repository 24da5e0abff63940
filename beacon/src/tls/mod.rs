//! TLS termination.
//!
//! - [`SecureChannel`]: non-blocking server-side TLS over a [`Transport`],
//!   with explicit handshake stepping and buffered reads and writes,
//! - [`load_server_config`]: PEM loading into a shared
//!   [`rustls::ServerConfig`].

mod channel;
mod config;
mod transport;

pub use channel::{
    APP_BUFFER_SIZE, ChannelError, Handshake, HandshakeStatus, PACKET_BUFFER_SIZE, ReadOutcome,
    SecureChannel,
};
pub use config::{TlsConfigError, build_server_config, load_server_config};
pub use transport::Transport;
