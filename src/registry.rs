//! Connection tracking for the poll loop.
//!
//! Every socket the reactor watches lives here, keyed by a [`SocketId`]
//! allocated from a monotonic counter so an identity is never reused while
//! a connection is tracked. The registry is exclusively owned by the
//! reactor; the single-threaded model means no synchronization is needed.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};

/// Stable identity of a tracked socket. Doubles as the poller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(usize);

impl SocketId {
    /// Wrap a raw key value.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// The raw key value handed to the poller.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a tracked socket.
///
/// `AwaitingHandshake → Established` happens exactly once, on handshake
/// success. There is no edge back: an established connection can only leave
/// the registry by being unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The accept socket.
    Listening,
    /// Accepted, upgrade request not yet completed.
    AwaitingHandshake,
    /// Handshake done; bytes on this socket are WebSocket frames.
    Established,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Listening => "Listening",
            ConnectionState::AwaitingHandshake => "AwaitingHandshake",
            ConnectionState::Established => "Established",
        };
        write!(f, "{name}")
    }
}

/// A tracked OS socket: either the accept socket or a peer connection.
#[derive(Debug)]
pub enum Socket {
    /// The listening socket.
    Listener(TcpListener),
    /// An accepted peer connection.
    Stream(TcpStream),
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Socket::Listener(l) => l.as_fd(),
            Socket::Stream(s) => s.as_fd(),
        }
    }
}

/// One registry slot: the socket handle plus its lifecycle state.
#[derive(Debug)]
pub struct Entry {
    /// The tracked socket.
    pub socket: Socket,
    /// Current lifecycle state.
    pub state: ConnectionState,
}

/// Socket identity → (state, socket handle) mapping.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<SocketId, Entry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a socket.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already tracked; identities must be unique for the
    /// lifetime of a connection, so a collision is a reactor defect.
    pub fn register(&mut self, id: SocketId, socket: Socket, state: ConnectionState) {
        let prev = self.entries.insert(id, Entry { socket, state });
        assert!(prev.is_none(), "socket id {id} registered twice");
    }

    /// Move a tracked socket to `new_state`.
    ///
    /// # Panics
    ///
    /// The only legal transition is `AwaitingHandshake → Established`.
    /// Anything else (including transitioning an untracked id) is a defect
    /// in the reactor logic, not a runtime condition, and panics.
    pub fn transition(&mut self, id: SocketId, new_state: ConnectionState) {
        let entry = self
            .entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("transition on untracked socket {id}"));
        assert!(
            entry.state == ConnectionState::AwaitingHandshake
                && new_state == ConnectionState::Established,
            "invalid transition {} -> {new_state} for socket {id}",
            entry.state
        );
        entry.state = new_state;
    }

    /// Stop tracking a socket, returning its entry so the caller can
    /// deregister it from the poller before the handle is dropped.
    pub fn unregister(&mut self, id: SocketId) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Whether `id` is tracked and established.
    #[must_use]
    pub fn is_established(&self, id: SocketId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.state == ConnectionState::Established)
    }

    /// Whether `id` is tracked at all.
    #[must_use]
    pub fn contains(&self, id: SocketId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Shared access to a tracked entry.
    #[must_use]
    pub fn get(&self, id: SocketId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Mutable access to a tracked entry.
    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    /// All tracked sockets with their states.
    pub fn iter(&self) -> impl Iterator<Item = (SocketId, &Entry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Number of tracked sockets (the listener included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// A connected loopback stream for tests that need a real socket.
    fn loopback_stream() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        TcpStream::connect(addr).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        let id = SocketId::new(7);
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );

        assert!(registry.contains(id));
        assert!(!registry.is_established(id));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(id).unwrap().state,
            ConnectionState::AwaitingHandshake
        );
    }

    #[test]
    fn test_transition_to_established() {
        let mut registry = ConnectionRegistry::new();
        let id = SocketId::new(1);
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );

        registry.transition(id, ConnectionState::Established);
        assert!(registry.is_established(id));
    }

    #[test]
    #[should_panic(expected = "invalid transition")]
    fn test_transition_from_established_panics() {
        let mut registry = ConnectionRegistry::new();
        let id = SocketId::new(2);
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );
        registry.transition(id, ConnectionState::Established);

        // Re-running the handshake path on an established socket is a bug.
        registry.transition(id, ConnectionState::Established);
    }

    #[test]
    #[should_panic(expected = "untracked socket")]
    fn test_transition_untracked_panics() {
        let mut registry = ConnectionRegistry::new();
        registry.transition(SocketId::new(99), ConnectionState::Established);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_register_panics() {
        let mut registry = ConnectionRegistry::new();
        let id = SocketId::new(3);
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );
    }

    #[test]
    fn test_unregister_removes_identity() {
        let mut registry = ConnectionRegistry::new();
        let id = SocketId::new(4);
        registry.register(
            id,
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );

        assert!(registry.unregister(id).is_some());
        assert!(!registry.contains(id));
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_iter_covers_all_states() {
        let mut registry = ConnectionRegistry::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        registry.register(
            SocketId::new(0),
            Socket::Listener(listener),
            ConnectionState::Listening,
        );
        registry.register(
            SocketId::new(1),
            Socket::Stream(loopback_stream()),
            ConnectionState::AwaitingHandshake,
        );

        let mut states: Vec<ConnectionState> =
            registry.iter().map(|(_, entry)| entry.state).collect();
        states.sort_by_key(|s| format!("{s}"));
        assert_eq!(
            states,
            vec![ConnectionState::AwaitingHandshake, ConnectionState::Listening]
        );
    }
}
