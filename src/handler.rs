//! The collaborator surface invoked by the poll loop.
//!
//! [`EventHandler`] is how applications react to parsed protocol events.
//! Every hook has a no-op default, so a handler implements only what it
//! cares about; an absent hook is not an error.

use std::io::{self, Write};
use std::net::TcpStream;

use crate::error::Result;
use crate::protocol::{Frame, HandshakeRequest};
use crate::registry::SocketId;

/// Write the whole buffer, looping over short writes.
///
/// The sockets here are non-blocking, so a large response can hit
/// `WouldBlock` mid-write; retrying until the kernel buffer drains keeps the
/// single accept/reject response atomic from the peer's point of view.
pub(crate) fn write_fully(stream: &mut TcpStream, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer gone")),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Mutable handshake outcome handed to [`EventHandler::on_handshake`].
///
/// Left untouched, the server sends the default 101 accept. A handler may
/// instead mark the handshake rejected with an HTTP status and body; at most
/// one response is ever written for a connection's handshake phase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    rejection: Option<(u16, String)>,
}

impl HandshakeReply {
    /// Reject the handshake with an HTTP status code and plain-text body.
    pub fn reject(&mut self, status: u16, body: impl Into<String>) {
        self.rejection = Some((status, body.into()));
    }

    /// Whether the handler marked this handshake rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    /// The rejection status and body, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<(u16, &str)> {
        self.rejection
            .as_ref()
            .map(|(status, body)| (*status, body.as_str()))
    }
}

/// Outbound frame writer passed to the message and ping hooks.
///
/// Borrows the peer's stream for the duration of one dispatch, so a handler
/// can answer the frame it was given without owning any socket state.
#[derive(Debug)]
pub struct FrameSink<'a> {
    id: SocketId,
    stream: &'a mut TcpStream,
}

impl<'a> FrameSink<'a> {
    pub(crate) fn new(id: SocketId, stream: &'a mut TcpStream) -> Self {
        Self { id, stream }
    }

    /// Identity of the connection this sink writes to.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Send an arbitrary frame (server frames are never masked).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        write_fully(self.stream, &frame.encode())?;
        Ok(())
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(&Frame::text(text.as_bytes().to_vec()))
    }

    /// Send a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(&Frame::binary(data.to_vec()))
    }

    /// Send a ping frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(&Frame::ping(payload.to_vec()))
    }

    /// Send a pong frame, normally in answer to a ping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        self.send(&Frame::pong(payload.to_vec()))
    }

    /// Send a close frame with optional status code and reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the write fails.
    pub fn send_close(&mut self, code: Option<u16>, reason: &str) -> Result<()> {
        self.send(&Frame::close(code, reason))
    }
}

/// Per-event callbacks driven by the poll loop.
///
/// All hooks default to no-ops. The reactor calls them from its single
/// thread, so implementations need no synchronization.
pub trait EventHandler {
    /// A complete upgrade request was parsed. Mark `reply` rejected to
    /// refuse the connection; otherwise the default accept is sent.
    fn on_handshake(&mut self, _request: &HandshakeRequest, _reply: &mut HandshakeReply) {}

    /// The handshake completed and the connection is established.
    fn on_open(&mut self, _socket: SocketId) {}

    /// A data frame arrived (text, binary, continuation, or pong).
    fn on_message(&mut self, _frame: &Frame, _sink: &mut FrameSink<'_>) {}

    /// A ping frame arrived. Answering with a pong is the handler's call.
    fn on_ping(&mut self, _frame: &Frame, _sink: &mut FrameSink<'_>) {}

    /// The client sent a close frame.
    fn on_close_request(&mut self, _socket: SocketId) {}

    /// A read returned zero bytes or failed: the peer is gone. The
    /// connection is unregistered right after this hook returns.
    fn on_lost_packet(&mut self, _socket: SocketId) {}
}

/// The do-nothing handler; useful as a placeholder and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}
