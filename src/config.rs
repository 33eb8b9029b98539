//! Server configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// How the server drives I/O once started.
///
/// Only readiness polling is implemented; the enum exists so callers select
/// the mode explicitly and new modes can be added without breaking the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum RunMode {
    /// Single-threaded readiness polling (block until a socket is readable).
    #[default]
    Poll,
}

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, e.g. `"127.0.0.1"`.
    pub address: String,

    /// Bind port. Port 0 asks the OS for an ephemeral port; use
    /// [`WebSocketServer::local_addr`](crate::server::WebSocketServer::local_addr)
    /// to discover the assignment.
    pub port: u16,

    /// I/O mode selector.
    pub mode: RunMode,

    /// Size of the chunk used when draining a readable socket (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,

    /// Upper bound on a single readiness wait.
    ///
    /// `None` blocks indefinitely, which means the server can only react to
    /// socket events. Set a bound if the process needs to interleave
    /// periodic work (idle eviction, ping sweeps) with polling.
    ///
    /// Default: None
    pub poll_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Create a configuration for the given bind address and port.
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            mode: RunMode::default(),
            read_buffer_size: 8192,
            max_handshake_size: 8192,
            poll_timeout: None,
        }
    }

    /// Set the I/O mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the read chunk size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the maximum handshake size.
    #[must_use]
    pub const fn with_max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }

    /// Bound each readiness wait instead of blocking indefinitely.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Check that the configuration can actually be bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the address is empty or a buffer
    /// size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::InvalidConfig("bind address must be set".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "read buffer size must be non-zero".into(),
            ));
        }
        if self.max_handshake_size == 0 {
            return Err(Error::InvalidConfig(
                "max handshake size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The `address:port` string handed to the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
