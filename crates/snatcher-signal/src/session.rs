//! Session state for the signaling relay
//!
//! A session is a rendezvous record bounding exactly two peers. Peers are
//! identified only by their channel: each handle carries a process-unique id
//! assigned at connection time, never exposed on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound queue depth per peer
///
/// Signaling traffic is a handful of small messages; a stalled reader hits
/// this ceiling long before it can pin 64 KiB per queued message until the
/// hard expiry reclaims the session.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// A live peer channel within a session
///
/// Cloning is cheap; clones refer to the same underlying channel. Sends are
/// best-effort by policy: a dead channel or a backed-up queue drops the
/// message, and the channel is corrected at the next disconnect detection,
/// not eagerly.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    id: u64,
    tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    /// Wrap an outbound channel in a new handle with a fresh identity
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Process-unique channel identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message for delivery without blocking
    ///
    /// Returns false if the channel is gone or the queue is full; the
    /// message is dropped either way.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}

/// A session where two peers exchange signaling messages
pub struct Session {
    /// Session identifier (registry key)
    pub id: String,

    /// Join token required from connecting peers, set at creation
    join_token: Option<String>,

    /// When the session was created
    created_at: Instant,

    /// Connected peers, in insertion order
    peers: Vec<PeerHandle>,
}

impl Session {
    /// Create a tokenless session (walk-in path)
    pub fn new(id: String) -> Self {
        Self {
            id,
            join_token: None,
            created_at: Instant::now(),
            peers: Vec::new(),
        }
    }

    /// Create a session gated by a join token (issuer path)
    pub fn with_token(id: String, join_token: String) -> Self {
        Self {
            join_token: Some(join_token),
            ..Self::new(id)
        }
    }

    /// Check a presented token against the session's token
    ///
    /// A session without a stored token accepts any presented token. This is
    /// a permissive fallback for walk-in sessions, not a security guarantee.
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match &self.join_token {
            Some(token) => presented == Some(token.as_str()),
            None => true,
        }
    }

    /// Add a peer to the session, enforcing the capacity ceiling
    pub fn add_peer(&mut self, handle: PeerHandle, max_peers: usize) -> Result<(), SessionError> {
        if self.peers.len() >= max_peers {
            return Err(SessionError::Full);
        }
        self.peers.push(handle);
        Ok(())
    }

    /// Remove a peer by channel identity; no-op if already removed
    pub fn remove_peer(&mut self, peer_id: u64) {
        let before = self.peers.len();
        self.peers.retain(|p| p.id() != peer_id);
        if self.peers.len() < before {
            debug!("Peer {} removed from session {}", peer_id, self.id);
        }
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Check if the session has no peers
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of all peer handles (snapshot-then-notify discipline)
    pub fn peers_snapshot(&self) -> Vec<PeerHandle> {
        self.peers.clone()
    }

    /// Snapshot of every peer except the one identified by `peer_id`
    pub fn peers_except(&self, peer_id: u64) -> Vec<PeerHandle> {
        self.peers
            .iter()
            .filter(|p| p.id() != peer_id)
            .cloned()
            .collect()
    }

    /// Age of the session since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_peer() -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        (PeerHandle::new(tx), rx)
    }

    #[test]
    fn test_session_capacity() {
        let mut session = Session::new("test-session-1".into());
        let (a, _rx_a) = make_peer();
        let (b, _rx_b) = make_peer();
        let (c, _rx_c) = make_peer();

        session.add_peer(a, 2).unwrap();
        session.add_peer(b, 2).unwrap();
        assert_eq!(session.peer_count(), 2);

        assert_eq!(session.add_peer(c, 2), Err(SessionError::Full));
        assert_eq!(session.peer_count(), 2);
    }

    #[test]
    fn test_token_authorization() {
        let session = Session::with_token("test-session-1".into(), "secret".into());
        assert!(session.authorize(Some("secret")));
        assert!(!session.authorize(Some("wrong")));
        assert!(!session.authorize(None));

        // Tokenless sessions accept anything
        let open = Session::new("test-session-2".into());
        assert!(open.authorize(None));
        assert!(open.authorize(Some("whatever")));
    }

    #[test]
    fn test_remove_peer_idempotent() {
        let mut session = Session::new("test-session-1".into());
        let (a, _rx) = make_peer();
        let id = a.id();

        session.add_peer(a, 2).unwrap();
        session.remove_peer(id);
        assert!(session.is_empty());

        // Second removal is a no-op
        session.remove_peer(id);
        assert!(session.is_empty());
    }

    #[test]
    fn test_snapshot_excludes_self() {
        let mut session = Session::new("test-session-1".into());
        let (a, _rx_a) = make_peer();
        let (b, _rx_b) = make_peer();
        let a_id = a.id();
        let b_id = b.id();

        session.add_peer(a, 2).unwrap();
        session.add_peer(b, 2).unwrap();

        let others = session.peers_except(a_id);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), b_id);

        assert_eq!(session.peers_snapshot().len(), 2);
    }

    #[test]
    fn test_handle_send_after_receiver_dropped() {
        let (handle, rx) = make_peer();
        assert!(handle.send(Message::Text("{}".into())));
        drop(rx);
        assert!(!handle.send(Message::Text("{}".into())));
    }

    #[test]
    fn test_send_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(2);
        let handle = PeerHandle::new(tx);

        assert!(handle.send(Message::Text("first".into())));
        assert!(handle.send(Message::Text("second".into())));

        // Queue full: the message is dropped, nothing blocks
        assert!(!handle.send(Message::Text("overflow".into())));

        // Draining frees capacity; earlier messages are intact
        assert!(matches!(rx.try_recv().unwrap(), Message::Text(t) if t == "first"));
        assert!(handle.send(Message::Text("third".into())));
    }
}
