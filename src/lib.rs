//! # tideway - Readiness-polled WebSocket Server
//!
//! `tideway` is a single-process, single-threaded WebSocket server core:
//! a readiness poll loop that accepts raw TCP connections, performs the
//! RFC 6455 opening handshake over plain HTTP, and dispatches decoded
//! frames to user-supplied handlers.
//!
//! ## Design
//!
//! - **One thread, no locks** - the reactor exclusively owns all connection
//!   state; handlers run inline on the poll thread
//! - **Explicit state machine** - every socket is `Listening`,
//!   `AwaitingHandshake`, or `Established`, and upgrades exactly once
//! - **Partial input is never an error** - incomplete handshakes and frames
//!   signal "wait for the next readiness event"
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tideway::{EventHandler, FrameSink, ServerConfig, WebSocketServer};
//! use tideway::protocol::Frame;
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_message(&mut self, frame: &Frame, sink: &mut FrameSink<'_>) {
//!         let _ = sink.send_binary(frame.payload());
//!     }
//!     fn on_ping(&mut self, frame: &Frame, sink: &mut FrameSink<'_>) {
//!         let _ = sink.send_pong(frame.payload());
//!     }
//! }
//!
//! # fn main() -> tideway::Result<()> {
//! let config = ServerConfig::new("127.0.0.1", 9001);
//! WebSocketServer::bind(config, Echo)?.run()
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

pub use config::{RunMode, ServerConfig};
pub use error::{Error, Result};
pub use handler::{EventHandler, FrameSink, HandshakeReply, NoopHandler};
pub use protocol::{Frame, HandshakeRequest, OpCode, WS_GUID, compute_accept_key};
pub use registry::{ConnectionRegistry, ConnectionState, SocketId};
pub use server::WebSocketServer;
