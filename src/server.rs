//! The readiness-driven poll loop.
//!
//! One thread, one [`Poller`], one [`ConnectionRegistry`]. Each iteration
//! blocks until at least one tracked socket is readable, then services the
//! ready set: the listener accepts, awaiting-handshake sockets feed the
//! handshake parser, established sockets feed the frame codec and dispatch
//! decoded frames to the [`EventHandler`].
//!
//! Per-socket state machine:
//!
//! ```text
//! Listening --accept--> AwaitingHandshake --handshake ok--> Established --EOF--> removed
//!                              |
//!                              +--rejected / malformed / EOF--> removed
//! ```
//!
//! The poller is oneshot: every socket still tracked after being serviced
//! is re-armed for readability before the next wait.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};

use bytes::BytesMut;
use log::{debug, trace, warn};
use polling::{Event, Events, Poller};

use crate::config::{RunMode, ServerConfig};
use crate::error::{Error, Result};
use crate::handler::{EventHandler, FrameSink, HandshakeReply, write_fully};
use crate::protocol::{
    Frame, HandshakeRequest, OpCode, build_accept_response, build_reject_response,
    compute_accept_key,
};
use crate::registry::{ConnectionRegistry, ConnectionState, Socket, SocketId};

/// Poller key of the accept socket.
const LISTENER_ID: SocketId = SocketId::new(0);

/// Drain everything currently readable from a non-blocking stream.
///
/// An empty buffer means the read immediately returned zero bytes: the peer
/// disconnected or half-closed (the "lost packet" case).
fn read_available(stream: &mut TcpStream, chunk_size: usize) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// A single-threaded, readiness-polled WebSocket server.
///
/// ```no_run
/// use tideway::{EventHandler, FrameSink, ServerConfig, WebSocketServer};
/// use tideway::protocol::Frame;
///
/// struct Echo;
///
/// impl EventHandler for Echo {
///     fn on_message(&mut self, frame: &Frame, sink: &mut FrameSink<'_>) {
///         let _ = sink.send_binary(frame.payload());
///     }
/// }
///
/// # fn main() -> tideway::Result<()> {
/// let config = ServerConfig::new("127.0.0.1", 9001);
/// WebSocketServer::bind(config, Echo)?.run()
/// # }
/// ```
pub struct WebSocketServer<H: EventHandler> {
    config: ServerConfig,
    handler: H,
    poller: Poller,
    registry: ConnectionRegistry,
    events: Events,
    next_id: usize,
    local_addr: SocketAddr,
}

impl<H: EventHandler> WebSocketServer<H> {
    /// Bind the listening socket and prepare the poll loop.
    ///
    /// The listener is non-blocking; `SO_REUSEADDR` is set by the standard
    /// library on Unix targets.
    ///
    /// # Errors
    ///
    /// Setup errors are fatal: [`Error::InvalidConfig`] for an unusable
    /// configuration, [`Error::Io`] if bind/listen or poller creation
    /// fails.
    pub fn bind(config: ServerConfig, handler: H) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let poller = Poller::new()?;
        // SAFETY: the listener is moved into the registry right below and
        // stays there for the server's lifetime, so the fd outlives its
        // poller registration.
        unsafe {
            add_source(&poller, &listener, LISTENER_ID)?;
        }

        let mut registry = ConnectionRegistry::new();
        registry.register(
            LISTENER_ID,
            Socket::Listener(listener),
            ConnectionState::Listening,
        );

        debug!("listening on {local_addr}");
        Ok(Self {
            config,
            handler,
            poller,
            registry,
            events: Events::new(),
            next_id: 1,
            local_addr,
        })
    }

    /// The address the listener actually bound, useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The tracked socket set.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Run the server according to the configured [`RunMode`].
    ///
    /// Never returns under normal operation.
    ///
    /// # Errors
    ///
    /// Only poller failures escape; per-connection protocol and I/O
    /// problems are handled inside the loop.
    pub fn run(&mut self) -> Result<()> {
        match self.config.mode {
            RunMode::Poll => loop {
                self.poll_once()?;
            },
        }
    }

    /// One reactor iteration: block until ≥1 socket is readable (bounded by
    /// `poll_timeout` if configured), then service every ready socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the readiness wait itself fails.
    pub fn poll_once(&mut self) -> Result<()> {
        self.events.clear();
        self.poller
            .wait(&mut self.events, self.config.poll_timeout)?;

        let ready: Vec<usize> = self.events.iter().map(|ev| ev.key).collect();
        for key in ready {
            let id = SocketId::new(key);
            if id == LISTENER_ID {
                self.accept_pending()?;
            } else {
                self.service_connection(id)?;
            }
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> SocketId {
        let id = SocketId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Accept every connection queued on the listener.
    fn accept_pending(&mut self) -> Result<()> {
        loop {
            let accepted = match self.registry.get(LISTENER_ID) {
                Some(entry) => match &entry.socket {
                    Socket::Listener(listener) => listener.accept(),
                    Socket::Stream(_) => unreachable!("listener id holds a stream"),
                },
                None => unreachable!("listener not tracked"),
            };
            match accepted {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    let id = self.alloc_id();
                    // SAFETY: the stream is moved into the registry right
                    // after this add and is only dropped after
                    // `drop_connection` deletes it from the poller.
                    unsafe {
                        add_source(&self.poller, &stream, id)?;
                    }
                    self.registry.register(
                        id,
                        Socket::Stream(stream),
                        ConnectionState::AwaitingHandshake,
                    );
                    debug!("accepted {peer} as {id}, awaiting handshake");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.rearm(LISTENER_ID)
    }

    /// Service one readable, non-listener socket.
    fn service_connection(&mut self, id: SocketId) -> Result<()> {
        let chunk_size = self.config.read_buffer_size;
        let (state, read) = match self.registry.get_mut(id) {
            Some(entry) => match &mut entry.socket {
                Socket::Stream(stream) => (entry.state, read_available(stream, chunk_size)),
                Socket::Listener(_) => unreachable!("connection id holds the listener"),
            },
            // Already dropped earlier in this iteration.
            None => return Ok(()),
        };

        let buf = match read {
            Ok(buf) if !buf.is_empty() => buf,
            Ok(_) => {
                trace!("zero-byte read on {id}, treating as disconnect");
                self.lost_packet(id);
                return Ok(());
            }
            Err(e) => {
                warn!("read error on {id}: {e}");
                self.lost_packet(id);
                return Ok(());
            }
        };

        match state {
            ConnectionState::AwaitingHandshake => self.drive_handshake(id, &buf),
            ConnectionState::Established => self.dispatch_frames(id, &buf),
            ConnectionState::Listening => unreachable!("listener serviced as connection"),
        }

        if self.registry.contains(id) {
            self.rearm(id)?;
        }
        Ok(())
    }

    /// Feed handshake bytes to the parser and act on the outcome.
    fn drive_handshake(&mut self, id: SocketId, buf: &[u8]) {
        let request = match HandshakeRequest::parse_with_limit(buf, self.config.max_handshake_size)
        {
            Ok(request) => request,
            Err(err) if err.is_incomplete() => {
                // Header terminator not seen yet; wait for the next read.
                trace!("handshake on {id} incomplete, waiting for more bytes");
                return;
            }
            Err(err) => {
                warn!("malformed handshake on {id}: {err}");
                self.refuse(id, 400, "malformed websocket handshake");
                return;
            }
        };

        let mut reply = HandshakeReply::default();
        self.handler.on_handshake(&request, &mut reply);
        if let Some((status, body)) = reply.rejection() {
            debug!("handshake on {id} rejected by handler with status {status}");
            let body = body.to_string();
            self.refuse(id, status, &body);
            return;
        }

        let accept = compute_accept_key(&request.key);
        let response = build_accept_response(&accept);
        let written = match self.registry.get_mut(id) {
            Some(entry) => match &mut entry.socket {
                Socket::Stream(stream) => write_fully(stream, &response),
                Socket::Listener(_) => unreachable!("connection id holds the listener"),
            },
            None => return,
        };
        if let Err(e) = written {
            warn!("failed to write accept response to {id}: {e}");
            self.lost_packet(id);
            return;
        }

        self.registry.transition(id, ConnectionState::Established);
        debug!("handshake on {id} complete ({} {})", request.method, request.path);
        self.handler.on_open(id);
    }

    /// Drain decoded frames from one read and dispatch them by opcode.
    fn dispatch_frames(&mut self, id: SocketId, buf: &[u8]) {
        let mut offset = 0;
        while offset < buf.len() {
            match Frame::parse_client(&buf[offset..]) {
                Ok((frame, consumed)) => {
                    offset += consumed;
                    if let Err(err) = frame.validate() {
                        warn!("invalid control frame on {id}: {err}, ignored");
                        continue;
                    }
                    self.dispatch_one(id, &frame);
                    if !self.registry.contains(id) {
                        break;
                    }
                }
                Err(err) if err.is_incomplete() => {
                    // The tail of this read is a partial frame. It is
                    // dropped rather than buffered across iterations; see
                    // DESIGN.md for the trade-off.
                    debug!("partial frame on {id} dropped ({err})");
                    break;
                }
                Err(err) => {
                    // Undecodable input: skip the remainder of this read
                    // and keep the connection.
                    warn!("undecodable frame on {id}: {err}, skipped");
                    break;
                }
            }
        }
    }

    /// Invoke the handler hook for one decoded frame.
    fn dispatch_one(&mut self, id: SocketId, frame: &Frame) {
        trace!(
            "{} frame on {id} ({} payload bytes)",
            frame.opcode,
            frame.payload().len()
        );
        match frame.opcode {
            OpCode::Close => self.handler.on_close_request(id),
            OpCode::Ping | OpCode::Text | OpCode::Binary | OpCode::Pong | OpCode::Continuation => {
                let Some(entry) = self.registry.get_mut(id) else {
                    return;
                };
                let Socket::Stream(stream) = &mut entry.socket else {
                    return;
                };
                let mut sink = FrameSink::new(id, stream);
                if frame.opcode == OpCode::Ping {
                    self.handler.on_ping(frame, &mut sink);
                } else {
                    self.handler.on_message(frame, &mut sink);
                }
            }
        }
    }

    /// Write an HTTP rejection and drop the connection.
    fn refuse(&mut self, id: SocketId, status: u16, body: &str) {
        if let Some(entry) = self.registry.get_mut(id) {
            if let Socket::Stream(stream) = &mut entry.socket {
                if let Err(e) = write_fully(stream, &build_reject_response(status, body)) {
                    debug!("failed to write rejection to {id}: {e}");
                }
            }
        }
        self.drop_connection(id);
    }

    /// The lost-packet path: notify the handler, then untrack.
    fn lost_packet(&mut self, id: SocketId) {
        self.handler.on_lost_packet(id);
        self.drop_connection(id);
    }

    /// Untrack a connection and remove it from the poller. Dropping the
    /// entry closes the socket.
    fn drop_connection(&mut self, id: SocketId) {
        if let Some(entry) = self.registry.unregister(id) {
            if let Err(e) = self.poller.delete(&entry.socket) {
                trace!("poller delete for {id} failed: {e}");
            }
            debug!("dropped {id}");
        }
    }

    /// Re-arm a oneshot registration for the next readability event.
    fn rearm(&mut self, id: SocketId) -> Result<()> {
        let entry = self
            .registry
            .get(id)
            .unwrap_or_else(|| panic!("re-arming untracked socket {id}"));
        self.poller
            .modify(&entry.socket, Event::readable(id.as_usize()))
            .map_err(Error::from)
    }
}

/// Register `source` with the poller for readability.
///
/// # Safety
///
/// The caller must keep `source` alive (and its fd open) until it is
/// deleted from the poller.
unsafe fn add_source(
    poller: &Poller,
    source: impl polling::AsRawSource,
    id: SocketId,
) -> io::Result<()> {
    unsafe { poller.add(source, Event::readable(id.as_usize())) }
}
