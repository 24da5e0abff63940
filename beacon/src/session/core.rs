use super::service;
use crate::directory::{Directory, UserId};
use crate::protocol::{FrameDecoder, ProtocolError, Reply, ReplyCode, Request};
use crate::reactor::{Flow, Handler, Interest, Ready, Token};
use crate::tls::{ChannelError, Handshake, ReadOutcome, SecureChannel, Transport};
use crate::utils::ByteBuffer;

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Initial size of the request accumulation buffer.
const REQUEST_BUFFER_SIZE: usize = 4 * 1024;

/// Faults that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete request frame.
    Receiving,

    /// Writing the reply to the last request.
    Sending,
}

/// One client connection.
///
/// A `Session` alternates between receiving one request frame and sending
/// its reply. Each [`Handler::run`] makes as much progress as the channel
/// allows and tells the dispatcher which readiness to wait for next.
pub struct Session<S, D> {
    channel: SecureChannel<S>,
    directory: Arc<D>,
    decoder: FrameDecoder,

    state: State,
    request: ByteBuffer,
    reply: Vec<u8>,
    written: usize,

    identity: Option<UserId>,
    closing: bool,

    token: Option<Token>,
    peer: SocketAddr,
}

impl<S: Transport, D: Directory> Session<S, D> {
    pub fn new(
        channel: SecureChannel<S>,
        directory: Arc<D>,
        decoder: FrameDecoder,
        peer: SocketAddr,
    ) -> Self {
        Self {
            channel,
            directory,
            decoder,
            state: State::Receiving,
            request: ByteBuffer::with_capacity(REQUEST_BUFFER_SIZE),
            reply: Vec::new(),
            written: 0,
            identity: None,
            closing: false,
            token: None,
            peer,
        }
    }

    /// The user this connection logged in as.
    pub fn identity(&self) -> Option<UserId> {
        self.identity
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn step(&mut self) -> Result<Flow, SessionError> {
        loop {
            match self.state {
                State::Sending => {
                    if !self.send()? {
                        return Ok(Flow::Await(Interest::WRITABLE));
                    }

                    trace!(bytes = self.reply.len(), "reply sent");
                    self.state = State::Receiving;
                    self.reply.clear();
                    self.written = 0;

                    // A pipelined request may already sit in the buffer with
                    // no readiness event left to announce it.
                    if !self.decoder.has_frame(self.request.filled())? {
                        return Ok(Flow::Await(Interest::READABLE));
                    }
                }

                State::Receiving => {
                    if self.closing {
                        return Ok(self.close_sequence());
                    }

                    if !self.channel.is_handshake_complete() {
                        if let Handshake::Pending(interest) = self.channel.handshake()? {
                            if self.channel.is_inbound_closed() {
                                debug!("peer left during handshake");
                                self.closing = true;
                                continue;
                            }
                            return Ok(Flow::Await(interest));
                        }
                    }

                    if !self.decoder.has_frame(self.request.filled())? {
                        if let ReadOutcome::Closed = self.channel.read()? {
                            debug!("peer closed the connection");
                            self.closing = true;
                            continue;
                        }

                        // Plaintext decrypted along with the last handshake
                        // flight is picked up here even when the read
                        // itself produced nothing.
                        self.take_plaintext();
                    }

                    let Some(payload) = self.decoder.decode(&mut self.request)? else {
                        return Ok(Flow::Await(Interest::READABLE));
                    };

                    let reply = self.respond(&payload);
                    self.reply = reply.to_frame();
                    self.written = 0;
                    self.state = State::Sending;
                }
            }
        }
    }

    fn take_plaintext(&mut self) {
        let plaintext = self.channel.plaintext();
        if plaintext.is_empty() {
            return;
        }

        let n = plaintext.len();
        self.request.extend_from_slice(plaintext);
        self.channel.consume_plaintext(n);
    }

    fn respond(&mut self, payload: &[u8]) -> Reply {
        match Request::parse(payload) {
            Ok(request) => {
                debug!(tag = request.tag(), "request received");
                service::serve(&*self.directory, &mut self.identity, request)
            }
            Err(e) => {
                debug!(error = %e, "malformed request");
                Reply::new(ReplyCode::UnknownRequestFormat)
            }
        }
    }

    /// Writes as much of the reply as the channel takes. Returns `true`
    /// once every byte, ciphertext included, reached the transport.
    fn send(&mut self) -> Result<bool, ChannelError> {
        while self.written < self.reply.len() {
            let n = self.channel.write(&self.reply[self.written..])?;
            if n == 0 {
                return Ok(false);
            }
            self.written += n;
        }

        Ok(!self.channel.flush()?)
    }

    /// Sends `close_notify`, then shuts the transport down.
    fn close_sequence(&mut self) -> Flow {
        if !self.channel.is_handshake_complete() {
            self.abort();
            return Flow::Close;
        }

        match self.channel.shutdown() {
            Ok(true) => {
                self.abort();
                Flow::Close
            }
            Ok(false) => Flow::Await(Interest::WRITABLE),
            Err(e) => {
                debug!(error = %e, "close_notify not delivered");
                self.abort();
                Flow::Close
            }
        }
    }

    fn abort(&mut self) {
        if let Err(e) = self.channel.close() {
            trace!(error = %e, "transport shutdown failed");
        }
    }
}

impl<S: Transport, D: Directory> Handler for Session<S, D> {
    fn bind(&mut self, token: Token) {
        self.token = Some(token);
    }

    fn run(&mut self, _ready: Ready) -> Flow {
        let span = tracing::debug_span!(
            "session",
            token = %self.token.map_or(-1, |t| t.0 as i64),
            peer = %self.peer
        );
        let _enter = span.enter();

        let flow = match self.step() {
            Ok(flow) => flow,
            Err(e) => {
                warn!(error = %e, "connection fault");
                self.abort();
                Flow::Close
            }
        };

        if flow == Flow::Close {
            info!(user = ?self.identity, "connection closed");
        }

        flow
    }
}
