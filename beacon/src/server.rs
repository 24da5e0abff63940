//! Server assembly: dispatcher, listener and acceptor wired together.

use crate::config::{ConfigError, ServerConfig};
use crate::directory::Directory;
use crate::net::{Acceptor, TcpListener, TcpStream};
use crate::protocol::FrameDecoder;
use crate::reactor::Dispatcher;
use crate::session::Session;
use crate::tls::{SecureChannel, TlsConfigError};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::ServerConnection;
use thiserror::Error;
use tracing::info;

/// Startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsConfigError),

    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

type Connection<D> = Session<TcpStream, D>;

/// A started server.
///
/// Dropping it stops accepting and then shuts the dispatcher down, which
/// closes every open connection.
pub struct RunningServer<D: Directory> {
    acceptor: Acceptor,
    dispatcher: Arc<Dispatcher<Connection<D>>>,
}

/// Binds the listener and starts serving.
///
/// Every accepted connection gets a fresh TLS session from `tls` and a
/// [`Session`] backed by `directory`.
pub fn start<D: Directory>(
    config: &ServerConfig,
    tls: Arc<rustls::ServerConfig>,
    directory: Arc<D>,
) -> Result<RunningServer<D>, ServerError> {
    let address = config.bind_addr()?;
    let pool = config.pool_config();
    let decoder = FrameDecoder::new(config.protocol.max_frame_len);

    let dispatcher = Arc::new(Dispatcher::spawn(pool)?);

    let listener = TcpListener::bind(address, config.listener.backlog)
        .map_err(|source| ServerError::Bind { address, source })?;

    let acceptor = Acceptor::spawn(listener, dispatcher.clone(), move |stream, peer| {
        let conn = ServerConnection::new(tls.clone()).map_err(io::Error::other)?;
        let channel = SecureChannel::new(stream, conn);

        Ok(Session::new(channel, directory.clone(), decoder, peer))
    })?;

    info!(
        address = %acceptor.local_addr(),
        workers = pool.worker_count(),
        queue = pool.capacity(),
        "server started"
    );

    Ok(RunningServer {
        acceptor,
        dispatcher,
    })
}

impl<D: Directory> RunningServer<D> {
    /// The bound address; resolves port 0 to the ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Number of open connections.
    pub fn connections(&self) -> usize {
        self.dispatcher.connections()
    }

    pub fn shutdown(&self) {
        self.acceptor.stop();
        self.dispatcher.shutdown();
        info!("server stopped");
    }
}

impl<D: Directory> Drop for RunningServer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
