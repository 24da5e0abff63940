use super::transport::Transport;
use crate::reactor::Interest;
use crate::utils::ByteBuffer;

use std::io::{self, Read, Write};

use rustls::ServerConnection;
use thiserror::Error;
use tracing::{debug, trace};

/// Largest plaintext fragment of one TLS record.
pub const APP_BUFFER_SIZE: usize = 16 * 1024;

/// Largest TLS record on the wire: fragment plus header, padding and tag.
pub const PACKET_BUFFER_SIZE: usize = 16 * 1024 + 325;

/// Errors raised by a [`SecureChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("peer closed the connection during the handshake")]
    ClosedDuringHandshake,

    /// An operation that needs an established session was called too early.
    #[error("{0} called before the handshake completed")]
    NotReady(&'static str),
}

impl From<ChannelError> for io::Error {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Io(e) => e,
            ChannelError::Tls(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            ChannelError::ClosedDuringHandshake => {
                io::Error::new(io::ErrorKind::UnexpectedEof, error.to_string())
            }
            ChannelError::NotReady(_) => io::Error::other(error.to_string()),
        }
    }
}

/// What the TLS engine needs next to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// More ciphertext from the peer is needed.
    NeedUnwrap,

    /// The engine has handshake records to send.
    NeedWrap,

    /// Nothing left to exchange.
    Finished,
}

/// Result of one [`SecureChannel::handshake`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Complete,

    /// Call again once the transport reports this readiness.
    Pending(Interest),
}

/// Result of one [`SecureChannel::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes of plaintext were added to [`SecureChannel::plaintext`].
    /// `n` may be zero.
    Data(usize),

    /// The peer closed the connection, with or without `close_notify`.
    Closed,
}

/// Server side of a TLS session over a non-blocking transport.
///
/// Every method makes as much progress as the transport allows and then
/// returns; nothing blocks. The channel owns three buffers:
///
/// - inbound ciphertext, read from the transport and fed to the engine,
/// - inbound plaintext, drained from the engine for the caller,
/// - outbound ciphertext, produced by the engine and written to the
///   transport.
///
/// Outbound ciphertext is always flushed completely before the engine is
/// asked for more records. CPU-bound handshake work runs inline on the
/// calling thread.
pub struct SecureChannel<S> {
    transport: S,
    conn: ServerConnection,

    in_app: ByteBuffer,
    in_net: ByteBuffer,
    out_net: ByteBuffer,

    handshake_complete: bool,
    inbound_closed: bool,
    close_notify_received: bool,
    shutdown_sent: bool,
    closed: bool,
}

impl<S: Transport> SecureChannel<S> {
    /// Wraps `transport` with a fresh server session.
    pub fn new(transport: S, conn: ServerConnection) -> Self {
        Self {
            transport,
            conn,
            in_app: ByteBuffer::with_capacity(APP_BUFFER_SIZE),
            in_net: ByteBuffer::with_capacity(PACKET_BUFFER_SIZE),
            out_net: ByteBuffer::with_capacity(PACKET_BUFFER_SIZE),
            handshake_complete: false,
            inbound_closed: false,
            close_notify_received: false,
            shutdown_sent: false,
            closed: false,
        }
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Whether the peer has closed its sending side.
    pub fn is_inbound_closed(&self) -> bool {
        self.inbound_closed
    }

    /// Whether ciphertext is waiting for the transport to accept it.
    pub fn has_pending_output(&self) -> bool {
        !self.out_net.is_empty()
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::Finished
        }
    }

    /// Advances the handshake by at most one transport operation.
    ///
    /// A peer that hangs up mid-handshake is reported through
    /// [`is_inbound_closed`](Self::is_inbound_closed) with
    /// `Pending(READABLE)`; a TLS failure or a `close_notify` is an error.
    pub fn handshake(&mut self) -> Result<Handshake, ChannelError> {
        if self.handshake_complete {
            return Ok(Handshake::Complete);
        }

        if self.has_pending_output() {
            if self.flush()? {
                return Ok(Handshake::Pending(Interest::WRITABLE));
            }

            return Ok(match self.handshake_status() {
                HandshakeStatus::Finished => self.complete(),
                HandshakeStatus::NeedUnwrap => Handshake::Pending(Interest::READABLE),
                HandshakeStatus::NeedWrap => Handshake::Pending(Interest::WRITABLE),
            });
        }

        if self.handshake_status() == HandshakeStatus::NeedUnwrap {
            if !self.fill()? {
                self.inbound_closed = true;
                debug!("peer closed during handshake");
                return Ok(Handshake::Pending(Interest::READABLE));
            }

            self.unwrap_records()?;

            if self.close_notify_received {
                return Err(ChannelError::ClosedDuringHandshake);
            }
        }

        match self.handshake_status() {
            HandshakeStatus::Finished => Ok(self.complete()),
            HandshakeStatus::NeedUnwrap => Ok(Handshake::Pending(Interest::READABLE)),
            HandshakeStatus::NeedWrap => {
                self.wrap()?;
                Ok(Handshake::Pending(Interest::WRITABLE))
            }
        }
    }

    /// Reads once from the transport and decrypts everything available.
    pub fn read(&mut self) -> Result<ReadOutcome, ChannelError> {
        if !self.handshake_complete {
            return Err(ChannelError::NotReady("read"));
        }

        if self.inbound_closed {
            return Ok(ReadOutcome::Closed);
        }

        if !self.fill()? {
            self.inbound_closed = true;
            trace!("transport reached end of stream");
            return Ok(ReadOutcome::Closed);
        }

        let n = self.unwrap_records()?;

        if self.close_notify_received {
            self.inbound_closed = true;
            trace!("close_notify received");
            return Ok(ReadOutcome::Closed);
        }

        Ok(ReadOutcome::Data(n))
    }

    /// Decrypted bytes not yet consumed.
    pub fn plaintext(&self) -> &[u8] {
        self.in_app.filled()
    }

    pub fn consume_plaintext(&mut self, n: usize) {
        self.in_app.consume(n);
    }

    /// Encrypts at most one record of `data` and tries to send it.
    ///
    /// Returns the number of plaintext bytes taken, which is zero while
    /// earlier ciphertext is still waiting for the transport.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        if !self.handshake_complete {
            return Err(ChannelError::NotReady("write"));
        }

        if self.flush()? {
            return Ok(0);
        }

        let chunk = &data[..data.len().min(APP_BUFFER_SIZE)];
        let n = self.conn.writer().write(chunk)?;
        self.flush()?;

        trace!(bytes = n, "plaintext written");
        Ok(n)
    }

    /// Writes pending ciphertext to the transport.
    ///
    /// Returns `true` if some of it is still pending.
    pub fn flush(&mut self) -> Result<bool, ChannelError> {
        loop {
            while !self.out_net.is_empty() {
                match self.transport.write(self.out_net.filled()) {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(n) => self.out_net.consume(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            if !self.conn.wants_write() {
                return Ok(false);
            }

            self.wrap()?;
        }
    }

    /// Sends `close_notify` and flushes.
    ///
    /// Returns `true` once the alert and everything before it has reached
    /// the transport. Safe to call repeatedly.
    pub fn shutdown(&mut self) -> Result<bool, ChannelError> {
        if !self.shutdown_sent {
            self.conn.send_close_notify();
            self.shutdown_sent = true;
            debug!("close_notify queued");
        }

        Ok(!self.flush()?)
    }

    /// Shuts the transport down in both directions. Idempotent.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.inbound_closed = true;
        self.transport.close()?;

        Ok(())
    }

    fn complete(&mut self) -> Handshake {
        self.handshake_complete = true;

        debug!(
            version = ?self.conn.protocol_version(),
            suite = ?self.conn.negotiated_cipher_suite().map(|s| s.suite()),
            "handshake complete"
        );

        Handshake::Complete
    }

    /// One non-blocking read of ciphertext. Returns `false` at end of stream.
    fn fill(&mut self) -> Result<bool, ChannelError> {
        if self.in_net.capacity() < PACKET_BUFFER_SIZE {
            self.in_net.grow_to(PACKET_BUFFER_SIZE);
        }

        if self.in_net.spare() == 0 {
            self.in_net.compact();
        }

        if self.in_net.spare() == 0 {
            self.in_net
                .grow_to(self.in_net.capacity() + PACKET_BUFFER_SIZE);
        }

        loop {
            match self.transport.read(self.in_net.spare_mut()) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.in_net.advance(n);
                    trace!(bytes = n, "ciphertext read");
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Feeds buffered ciphertext to the engine and drains the plaintext it
    /// yields. Returns the number of plaintext bytes produced.
    fn unwrap_records(&mut self) -> Result<usize, ChannelError> {
        let mut produced = 0;

        loop {
            let fed = if self.in_net.is_empty() {
                0
            } else {
                let mut pending = self.in_net.filled();
                let n = self.conn.read_tls(&mut pending)?;
                self.in_net.consume(n);
                n
            };

            let state = match self.conn.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    self.send_alert();
                    return Err(e.into());
                }
            };

            if state.peer_has_closed() {
                self.close_notify_received = true;
            }

            produced += self.drain_plaintext()?;

            if fed == 0 || self.in_net.is_empty() {
                return Ok(produced);
            }
        }
    }

    /// Moves decrypted bytes from the engine into the plaintext buffer,
    /// doubling it whenever less than one record of space is left.
    fn drain_plaintext(&mut self) -> Result<usize, ChannelError> {
        let mut total = 0;

        loop {
            if self.in_app.spare() < APP_BUFFER_SIZE {
                self.in_app.reserve(APP_BUFFER_SIZE);
            }

            match self.conn.reader().read(self.in_app.spare_mut()) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    self.in_app.advance(n);
                    total += n;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof
                    ) =>
                {
                    return Ok(total);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Moves every record the engine wants to send into the outbound buffer.
    fn wrap(&mut self) -> Result<(), ChannelError> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.out_net)?;
        }

        Ok(())
    }

    /// Best-effort delivery of the alert describing a fatal TLS error.
    fn send_alert(&mut self) {
        if self.wrap().is_ok() {
            let _ = self.flush();
        }
    }
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("handshake_complete", &self.handshake_complete)
            .field("inbound_closed", &self.inbound_closed)
            .field("in_app", &self.in_app)
            .field("out_net", &self.out_net)
            .finish()
    }
}
